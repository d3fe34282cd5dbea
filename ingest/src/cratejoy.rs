//! Cratejoy subscriptions and orders.
//!
//! Both endpoints page with a `{count, next, prev, results}` envelope. A subscription
//! carries six nested objects that are written to their own tables before the
//! subscription row; orders are flat.

use crate::error::{ParseError, SyncError};
use crate::fetcher::{Credentials, Fetcher};
use crate::orchestrator::PageSync;
use crate::pager::{CursorDecoder, DrainStats, drain};
use crate::store::Store;
use crate::table::{Column, Dependent, Encoding, FeedSchema, TableDescriptor};
use crate::timestamp;
use reqwest::Url;
use serde::Deserialize;
use tracing::Instrument;

use Encoding::{Bool, Float, Integer, Opaque, Text, Timestamp};

pub const DEFAULT_BASE_URL: &str = "https://api.cratejoy.com/v1/";

pub static ADDRESSES: TableDescriptor = TableDescriptor {
    entity: "address",
    table: "cj_addresses",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("city", Text),
        Column::new("company", Text),
        Column::new("country", Text),
        Column::new("icon", Text),
        Column::new("phone_number", Text),
        Column::new("state", Text),
        Column::new("status", Integer),
        Column::new("status_message", Text),
        Column::new("street", Text),
        Column::renamed("to_name", "to", Text),
        Column::new("type", Text),
        Column::new("unit", Text),
        Column::new("zip_code", Text),
    ],
};

pub static BILLINGS: TableDescriptor = TableDescriptor {
    entity: "billing",
    table: "cj_billings",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("rebill_day", Integer),
        Column::new("rebill_months", Integer),
        Column::new("rebill_weeks", Opaque),
        Column::new("rebill_window", Integer),
        Column::new("store_id", Integer),
        Column::new("type", Text),
    ],
};

pub static CUSTOMERS: TableDescriptor = TableDescriptor {
    entity: "customer",
    table: "cj_customers",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("country", Text),
        Column::new("email", Text),
        Column::new("first_name", Text),
        Column::new("last_name", Text),
        Column::new("location", Text),
        Column::new("name", Text),
        Column::new("status", Opaque),
        Column::new("type", Text),
    ],
};

pub static PRODUCTS: TableDescriptor = TableDescriptor {
    entity: "product",
    table: "cj_products",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("deleted", Bool),
        Column::new("description", Text),
        Column::new("display_order", Integer),
        Column::new("flat_ship_price", Float),
        Column::new("gift_shipping", Integer),
        Column::new("giftable", Bool),
        Column::new("listed", Bool),
        Column::new("max_subs", Opaque),
        Column::new("meta", Opaque),
        Column::new("mp_visible", Bool),
        Column::new("name", Text),
        Column::new("product_billing_id", Integer),
        Column::new("product_type", Integer),
        Column::new("reviewable", Bool),
        Column::new("ship_option", Integer),
        Column::new("ship_weight", Float),
        Column::new("single_purchasable", Bool),
        Column::new("sku", Text),
        Column::new("slug", Text),
        Column::new("store_id", Integer),
        Column::new("subscribe_flow", Bool),
        Column::new("subscribe_flow_data", Opaque),
        Column::new("visible", Bool),
    ],
};

pub static PRODUCT_INSTANCES: TableDescriptor = TableDescriptor {
    entity: "product_instance",
    table: "cj_product_instances",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("name", Text),
        Column::new("price", Float),
        Column::new("product_id", Integer),
        Column::new("sku", Text),
    ],
};

pub static TERMS: TableDescriptor = TableDescriptor {
    entity: "term",
    table: "cj_terms",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("description", Text),
        Column::new("enabled", Bool),
        Column::new("name", Text),
        Column::new("num_cycles", Integer),
        Column::new("type", Text),
        Column::new("images", Opaque),
    ],
};

pub static SUBSCRIPTIONS: TableDescriptor = TableDescriptor {
    entity: "subscription",
    table: "cj_subscriptions",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::reference("address_id", "address", "address"),
        Column::reference("billing_id", "billing", "billing"),
        Column::reference("customer_id", "customer", "customer"),
        Column::reference("product_id", "product", "product"),
        Column::reference("product_instance_id", "product_instance", "product_instance"),
        Column::reference("term_id", "term", "term"),
        Column::new("autorenew", Bool),
        Column::new("billing_name", Text),
        Column::new("credit", Opaque),
        Column::new("end_date", Timestamp),
        Column::new("is_test", Bool),
        Column::new("note", Text),
        Column::new("skipped_date", Opaque),
        Column::new("source", Integer),
        Column::new("start_date", Timestamp),
        Column::new("status", Text),
        Column::new("store_id", Integer),
        Column::new("type", Text),
        Column::new("url", Text),
    ],
};

pub static ORDERS: TableDescriptor = TableDescriptor {
    entity: "order",
    table: "cj_orders",
    key: "id",
    conflict: &["id"],
    columns: &[
        Column::new("id", Integer),
        Column::new("card_refunded_amount", Float),
        Column::new("credit_applied", Float),
        Column::new("customer_id", Integer),
        Column::new("financial_status", Text),
        Column::new("fulfillment_status", Text),
        Column::new("gift_card_discount", Float),
        Column::new("gift_message", Text),
        Column::new("gift_renewal_notif", Text),
        Column::new("gross_shipping", Float),
        Column::new("is_gift", Bool),
        Column::new("order_gift_info", Opaque),
        Column::new("is_renewal", Bool),
        Column::new("is_test", Bool),
        Column::new("note", Text),
        Column::new("placed_at", Timestamp),
        Column::new("prorated_charge", Float),
        Column::new("refund_applied", Float),
        Column::new("refunded_amount", Float),
        Column::new("status", Text),
        Column::new("store_id", Integer),
        Column::new("sub_total", Float),
        Column::new("total", Float),
        Column::new("total_app_fees", Float),
        Column::new("total_label_cost", Float),
        Column::new("total_pending_fees", Float),
        Column::new("total_price", Float),
        Column::new("total_shipping", Float),
        Column::new("total_tax", Float),
        Column::new("transaction_fees", Float),
        Column::new("transaction_fee_status", Text),
        Column::new("type", Text),
        Column::new("url", Text),
    ],
};

/// Dependents in the order they are written.
pub static SUBSCRIPTION_FEED: FeedSchema = FeedSchema {
    dependents: &[
        Dependent {
            field: "address",
            table: &ADDRESSES,
        },
        Dependent {
            field: "billing",
            table: &BILLINGS,
        },
        Dependent {
            field: "customer",
            table: &CUSTOMERS,
        },
        Dependent {
            field: "product",
            table: &PRODUCTS,
        },
        Dependent {
            field: "product_instance",
            table: &PRODUCT_INSTANCES,
        },
        Dependent {
            field: "term",
            table: &TERMS,
        },
    ],
    top: &SUBSCRIPTIONS,
};

pub static ORDER_FEED: FeedSchema = FeedSchema {
    dependents: &[],
    top: &ORDERS,
};

/// The two Cratejoy feeds, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CratejoyFeed {
    Orders,
    Subscriptions,
}

/// Everything a Cratejoy pass needs once secrets have been read.
#[derive(Clone, Debug)]
pub struct Settings {
    pub base_url: Url,
    pub credentials: Credentials,
    pub subscription_page_size: u32,
    pub order_page_size: u32,
    /// Days subtracted from the newest stored order before asking for newer ones.
    pub order_lookback_days: u32,
    pub feeds: Vec<CratejoyFeed>,
}

fn endpoint(base: &Url, resource: &str) -> Result<Url, ParseError> {
    Ok(base.join(resource)?)
}

pub fn subscriptions_url(base: &Url, limit: u32) -> Result<Url, ParseError> {
    let mut url = endpoint(base, "subscriptions/")?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

/// First page of the order feed. Without a lower bound every order is fetched.
pub fn orders_url(base: &Url, limit: u32, placed_after: Option<&str>) -> Result<Url, ParseError> {
    let mut url = endpoint(base, "orders/")?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(placed_after) = placed_after {
            query.append_pair("placed_at__gt", placed_after);
        }
        query.append_pair("limit", &limit.to_string());
    }
    Ok(url)
}

pub async fn sync_subscriptions<S>(
    fetcher: &Fetcher,
    store: &S,
    settings: &Settings,
) -> Result<DrainStats, SyncError>
where
    S: Store + ?Sized,
{
    let decoder = CursorDecoder::new(endpoint(&settings.base_url, "subscriptions/")?);
    let first = subscriptions_url(&settings.base_url, settings.subscription_page_size)?;
    let mut handler = PageSync::new(&SUBSCRIPTION_FEED, store);

    drain(fetcher, first, &decoder, &mut handler)
        .instrument(tracing::info_span!("feed", feed = "cratejoy_subscriptions"))
        .await
}

/// Incremental order sync: starts `order_lookback_days` before the newest stored
/// `placed_at`, or from the beginning when nothing is stored yet.
pub async fn sync_orders<S>(
    fetcher: &Fetcher,
    store: &S,
    settings: &Settings,
) -> Result<DrainStats, SyncError>
where
    S: Store + ?Sized,
{
    let latest = store.latest_timestamp(&ORDERS, "placed_at").await?;
    let placed_after =
        latest.map(|latest| timestamp::lookback_filter(latest, settings.order_lookback_days));

    match &placed_after {
        Some(placed_after) => tracing::info!(%placed_after, "Fetching orders placed after"),
        None => tracing::info!("No stored orders, fetching full history"),
    }

    let decoder = CursorDecoder::new(endpoint(&settings.base_url, "orders/")?);
    let first = orders_url(
        &settings.base_url,
        settings.order_page_size,
        placed_after.as_deref(),
    )?;
    let mut handler = PageSync::new(&ORDER_FEED, store);

    drain(fetcher, first, &decoder, &mut handler)
        .instrument(tracing::info_span!("feed", feed = "cratejoy_orders"))
        .await
}

/// Runs the enabled feeds in order. A failing feed ends the pass.
pub async fn sync<S>(fetcher: &Fetcher, store: &S, settings: &Settings) -> Result<DrainStats, SyncError>
where
    S: Store + ?Sized,
{
    let mut total = DrainStats::default();

    for feed in [CratejoyFeed::Orders, CratejoyFeed::Subscriptions] {
        if !settings.feeds.contains(&feed) {
            tracing::debug!(?feed, "Feed disabled, skipping");
            continue;
        }

        let stats = match feed {
            CratejoyFeed::Orders => sync_orders(fetcher, store, settings).await?,
            CratejoyFeed::Subscriptions => sync_subscriptions(fetcher, store, settings).await?,
        };
        total.pages += stats.pages;
        total.records += stats.records;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::RetryPolicy;
    use crate::testutils::{order_json, sqlite_store, subscription_json};
    use serde_json::{Value, json};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, feeds: Vec<CratejoyFeed>) -> Settings {
        Settings {
            base_url: Url::parse(&format!("{}/v1/", server.uri())).unwrap(),
            credentials: Credentials::new("client", "key"),
            subscription_page_size: 500,
            order_page_size: 150,
            order_lookback_days: 5,
            feeds,
        }
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(
            Credentials::new("client", "key"),
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
        )
        .unwrap()
    }

    fn envelope(results: Vec<Value>, next: &str) -> Value {
        json!({"count": results.len(), "next": next, "prev": null, "results": results})
    }

    #[test]
    fn test_first_page_urls() {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            subscriptions_url(&base, 500).unwrap().as_str(),
            "https://api.cratejoy.com/v1/subscriptions/?limit=500"
        );
        assert_eq!(
            orders_url(&base, 150, None).unwrap().as_str(),
            "https://api.cratejoy.com/v1/orders/?limit=150"
        );

        let url = orders_url(&base, 150, Some("2024-02-29T10:15:00Z")).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("placed_at__gt".to_string(), "2024-02-29T10:15:00Z".to_string()),
                ("limit".to_string(), "150".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_subscription_pages_land_in_every_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                vec![subscription_json(1), subscription_json(2)],
                "?limit=500&page=2",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(envelope(vec![subscription_json(3)], "")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tables: Vec<_> = SUBSCRIPTION_FEED.tables().collect();
        let (_dir, store) = sqlite_store(&tables).await;
        let settings = settings(&server, vec![CratejoyFeed::Subscriptions]);

        let stats = sync_subscriptions(&fetcher(), &store, &settings)
            .await
            .unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 3);

        for table in &tables {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.table))
                .fetch_one(store.pool())
                .await
                .unwrap();
            assert_eq!(count, 3, "{}", table.table);
        }

        let (address_id, term_id): (i64, i64) =
            sqlx::query_as("SELECT address_id, term_id FROM cj_subscriptions WHERE id = 2")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!((address_id, term_id), (1002, 6002));
    }

    #[tokio::test]
    async fn test_orders_backfill_when_table_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/"))
            .and(query_param("limit", "150"))
            .and(query_param_is_missing("placed_at__gt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                vec![order_json(1, "2024-03-05T10:15:00Z")],
                "",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, store) = sqlite_store(&[&ORDERS]).await;
        let settings = settings(&server, vec![CratejoyFeed::Orders]);

        sync_orders(&fetcher(), &store, &settings).await.unwrap();
        let latest = store.latest_timestamp(&ORDERS, "placed_at").await.unwrap();
        assert_eq!(latest.unwrap().to_string(), "2024-03-05 10:15:00");
    }

    #[tokio::test]
    async fn test_orders_resume_with_lookback() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/"))
            .and(query_param("placed_at__gt", "2024-02-29T10:15:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
                vec![order_json(2, "2024-03-06T09:00:00Z")],
                "",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, store) = sqlite_store(&[&ORDERS]).await;
        let seed = crate::decompose::flatten(&ORDERS, &order_json(1, "2024-03-05T10:15:00Z"))
            .unwrap();
        store.upsert(&ORDERS, &[seed]).await.unwrap();

        let settings = settings(&server, vec![CratejoyFeed::Orders]);
        let stats = sync_orders(&fetcher(), &store, &settings).await.unwrap();
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_order_failure_ends_pass() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(vec![], "")))
            .expect(0)
            .mount(&server)
            .await;

        let tables: Vec<_> = SUBSCRIPTION_FEED.tables().chain([&ORDERS]).collect();
        let (_dir, store) = sqlite_store(&tables).await;
        let settings = settings(
            &server,
            vec![CratejoyFeed::Orders, CratejoyFeed::Subscriptions],
        );

        let err = sync(&fetcher(), &store, &settings).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));
    }
}
