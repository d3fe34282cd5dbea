use crate::error::WriteError;
use crate::metrics_defs::{ROWS_UPSERTED, UPSERT_DURATION};
use crate::row::{EntityRow, IdentityMap, IdentityMaps, NaturalKey, SqlValue};
use crate::store::Store;
use crate::table::TableDescriptor;
use indexmap::IndexMap;
use shared::{counter, histogram};
use std::time::Instant;

/// Generic writer over table descriptors.
pub struct UpsertWriter<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> UpsertWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        UpsertWriter { store }
    }

    /// Writes a batch of dependent rows and returns the identity map the top-level
    /// rows of the same page resolve their references through.
    pub async fn upsert_batch(
        &self,
        table: &'static TableDescriptor,
        rows: Vec<EntityRow>,
    ) -> Result<IdentityMap, WriteError> {
        let rows = dedupe(rows);
        self.write(table, &rows).await?;

        let mut identities = IdentityMap::default();
        for row in rows {
            // Natural keys are the primary keys, so the stored ID is the vendor ID
            identities.insert(row.key.clone(), row.key);
        }
        Ok(identities)
    }

    /// Resolves reference columns through `identities`, then writes all rows in one
    /// transaction.
    pub async fn upsert_top_level(
        &self,
        table: &'static TableDescriptor,
        rows: Vec<EntityRow>,
        identities: &IdentityMaps,
    ) -> Result<usize, WriteError> {
        let mut rows = dedupe(rows);
        for row in &mut rows {
            resolve_references(table, row, identities)?;
        }

        self.write(table, &rows).await?;
        Ok(rows.len())
    }

    async fn write(
        &self,
        table: &'static TableDescriptor,
        rows: &[EntityRow],
    ) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        self.store.upsert(table, rows).await?;
        let elapsed = start.elapsed();

        counter!(ROWS_UPSERTED, "table" => table.table).increment(rows.len() as u64);
        histogram!(UPSERT_DURATION, "table" => table.table).record(elapsed.as_secs_f64());

        tracing::info!(
            table = table.table,
            records = rows.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Upserted batch"
        );

        Ok(())
    }
}

/// Keeps the last occurrence of every key.
fn dedupe(rows: Vec<EntityRow>) -> Vec<EntityRow> {
    let total = rows.len();
    let mut by_key: IndexMap<NaturalKey, EntityRow> = IndexMap::with_capacity(total);
    for row in rows {
        by_key.insert(row.key.clone(), row);
    }

    if by_key.len() < total {
        tracing::debug!(
            duplicates = total - by_key.len(),
            "Collapsed duplicate keys in batch"
        );
    }

    by_key.into_values().collect()
}

fn resolve_references(
    table: &'static TableDescriptor,
    row: &mut EntityRow,
    identities: &IdentityMaps,
) -> Result<(), WriteError> {
    for (column, entity) in table.references() {
        let Some(value) = row.values.get_mut(column) else {
            continue;
        };
        let Some(vendor) = NaturalKey::from_value(value) else {
            // Absent nested object
            continue;
        };

        let stored = identities
            .get(entity)
            .and_then(|map| map.get(&vendor))
            .ok_or_else(|| WriteError::UnresolvedReference {
                entity: table.entity,
                column,
                key: vendor.clone(),
            })?;
        *value = SqlValue::from(stored.clone());
    }

    Ok(())
}
