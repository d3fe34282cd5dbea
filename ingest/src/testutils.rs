use crate::error::WriteError;
use crate::row::{EntityRow, NaturalKey};
use crate::store::{SqlStore, Store};
use crate::table::{Column, Encoding, TableDescriptor};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{Value, json};
use std::sync::Mutex;
use tempfile::TempDir;

/// Records every upsert instead of writing it.
#[derive(Default)]
pub struct RecordingStore {
    writes: Mutex<Vec<(&'static str, Vec<EntityRow>)>>,
    fail_on: Option<&'static str>,
}

impl RecordingStore {
    /// Fails every upsert into `table`.
    pub fn failing_on(table: &'static str) -> Self {
        RecordingStore {
            fail_on: Some(table),
            ..Default::default()
        }
    }

    pub fn writes(&self) -> Vec<(&'static str, Vec<NaturalKey>)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(table, rows)| (*table, rows.iter().map(|r| r.key.clone()).collect()))
            .collect()
    }

    /// All rows written to `table`, in write order.
    pub fn rows(&self, table: &str) -> Vec<EntityRow> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(written, _)| *written == table)
            .flat_map(|(_, rows)| rows.clone())
            .collect()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn upsert(&self, table: &TableDescriptor, rows: &[EntityRow]) -> Result<(), WriteError> {
        if self.fail_on == Some(table.table) {
            return Err(WriteError::Upsert {
                entity: table.entity,
                key: None,
                source: sqlx::Error::Protocol("injected failure".to_string()),
            });
        }

        self.writes
            .lock()
            .unwrap()
            .push((table.table, rows.to_vec()));
        Ok(())
    }

    async fn latest_timestamp(
        &self,
        _table: &'static TableDescriptor,
        _column: &'static str,
    ) -> Result<Option<NaiveDateTime>, WriteError> {
        Ok(None)
    }
}

fn column_ddl(column: &Column, tables: &[&'static TableDescriptor]) -> String {
    let sql_type = match column.encoding {
        Encoding::Integer | Encoding::Bool => "INTEGER",
        Encoding::Float => "REAL",
        Encoding::Text | Encoding::Timestamp | Encoding::Opaque => "TEXT",
        Encoding::Reference { entity } => {
            return match tables.iter().find(|t| t.entity == entity) {
                Some(target) => format!(
                    "\"{}\" INTEGER REFERENCES \"{}\" (\"{}\")",
                    column.name, target.table, target.key
                ),
                None => format!("\"{}\" INTEGER", column.name),
            };
        }
    };
    format!("\"{}\" {sql_type}", column.name)
}

fn table_ddl(table: &TableDescriptor, tables: &[&'static TableDescriptor]) -> String {
    let mut parts: Vec<_> = table
        .columns
        .iter()
        .map(|column| column_ddl(column, tables))
        .collect();
    let key = table
        .conflict
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    parts.push(format!("PRIMARY KEY ({key})"));

    format!("CREATE TABLE \"{}\" ({})", table.table, parts.join(", "))
}

/// A file-backed SQLite store with `tables` created, foreign keys enforced.
pub async fn sqlite_store(tables: &[&'static TableDescriptor]) -> (TempDir, SqlStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("sync.db").display());
    let store = SqlStore::connect(&url, 1).await.unwrap();

    for table in tables {
        sqlx::query(&table_ddl(table, tables))
            .execute(store.pool())
            .await
            .unwrap();
    }

    (dir, store)
}

/// A Cratejoy subscription. Nested IDs are derived from `id` so every record of a page
/// has its own dependents: address `1000 + id` up to term `6000 + id`.
pub fn subscription_json(id: i64) -> Value {
    json!({
        "id": id,
        "autorenew": true,
        "billing_name": "Ada Lovelace",
        "end_date": null,
        "is_test": false,
        "note": "",
        "product_billing_id": 3,
        "skipped_date": null,
        "source": 1,
        "start_date": "2024-03-05T10:15:00Z",
        "status": "active",
        "store_id": 77,
        "type": "subscription",
        "url": format!("/v1/subscriptions/{id}/"),
        "address": {
            "id": 1000 + id,
            "city": "London",
            "company": null,
            "country": "GB",
            "icon": "",
            "phone_number": "555-0100",
            "state": "LDN",
            "status": 0,
            "status_message": null,
            "street": "12 St James's Square",
            "to": "Ada Lovelace",
            "type": "address",
            "unit": "",
            "zip_code": "SW1Y 4LB"
        },
        "billing": {
            "id": 2000 + id,
            "rebill_day": 1,
            "rebill_months": 1,
            "rebill_weeks": [1, 3],
            "rebill_window": 3,
            "store_id": 77,
            "type": "billing"
        },
        "customer": {
            "id": 3000 + id,
            "country": "GB",
            "email": format!("ada{id}@example.com"),
            "first_name": "Ada",
            "last_name": "Lovelace",
            "location": "London",
            "name": "Ada Lovelace",
            "status": {"active": true},
            "type": "customer"
        },
        "product": {
            "id": 4000 + id,
            "deleted": false,
            "description": "Monthly box",
            "display_order": 2,
            "flat_ship_price": 4.5,
            "gift_shipping": 0,
            "giftable": true,
            "listed": true,
            "max_subs": null,
            "meta": {"color": "blue"},
            "mp_visible": true,
            "name": "Box",
            "product_billing_id": 3,
            "product_type": 1,
            "reviewable": false,
            "ship_option": 2,
            "ship_weight": 1.25,
            "single_purchasable": false,
            "sku": "BOX",
            "slug": "box",
            "store_id": 77,
            "subscribe_flow": true,
            "subscribe_flow_data": {"steps": []},
            "visible": true
        },
        "product_instance": {
            "id": 5000 + id,
            "name": "Box / M",
            "price": 19.99,
            "product_id": 4000 + id,
            "sku": "BOX-M"
        },
        "term": {
            "id": 6000 + id,
            "description": "Monthly",
            "enabled": true,
            "name": "1 month",
            "num_cycles": 1,
            "type": "term",
            "images": [
                {
                    "id": 1,
                    "subscription_type_term_id": 6000 + id,
                    "type": "main",
                    "url": "https://img/1.png"
                }
            ]
        }
    })
}

pub fn order_json(id: i64, placed_at: &str) -> Value {
    json!({
        "id": id,
        "card_refunded_amount": 0,
        "credit_applied": 0.0,
        "customer_id": 3000 + id,
        "financial_status": "paid",
        "fulfillment_status": "unfulfilled",
        "gift_card_discount": 0,
        "gift_message": null,
        "gift_renewal_notif": "none",
        "gross_shipping": 4.5,
        "is_gift": false,
        "order_gift_info": {"from": "Bob"},
        "is_renewal": true,
        "is_test": false,
        "note": "leave at door",
        "placed_at": placed_at,
        "prorated_charge": 0,
        "refund_applied": 0,
        "refunded_amount": 0,
        "status": "active",
        "store_id": 77,
        "sub_total": 21.0,
        "total": 25.5,
        "total_app_fees": 0,
        "total_label_cost": 0,
        "total_pending_fees": 0,
        "total_price": 21.0,
        "total_shipping": 4.5,
        "total_tax": 0,
        "transaction_fees": 0.9,
        "transaction_fee_status": "settled",
        "type": "order",
        "url": format!("/v1/orders/{id}/")
    })
}
