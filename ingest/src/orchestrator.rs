use crate::decompose::{Decomposed, decompose};
use crate::error::SyncError;
use crate::metrics_defs::PAGES_SYNCED;
use crate::pager::PageHandler;
use crate::row::IdentityMaps;
use crate::store::Store;
use crate::table::FeedSchema;
use crate::writer::UpsertWriter;
use async_trait::async_trait;
use serde_json::Value;
use shared::counter;
use tracing::Instrument;

/// Applies one page of a feed: every record is decomposed, then dependent tables are
/// written in schema order, then the top-level rows with their references resolved.
///
/// Nothing carries over from one page to the next.
pub struct PageSync<'a, S: Store + ?Sized> {
    schema: &'static FeedSchema,
    writer: UpsertWriter<'a, S>,
    page: u64,
}

impl<'a, S: Store + ?Sized> PageSync<'a, S> {
    pub fn new(schema: &'static FeedSchema, store: &'a S) -> Self {
        PageSync {
            schema,
            writer: UpsertWriter::new(store),
            page: 0,
        }
    }

    /// Returns the number of top-level rows written.
    pub async fn apply(&self, records: &[Value]) -> Result<usize, SyncError> {
        if records.is_empty() {
            tracing::debug!("Empty page, nothing to write");
            return Ok(0);
        }

        // A malformed record fails the page before anything is written
        let decomposed = records
            .iter()
            .map(|record| decompose(self.schema, record))
            .collect::<Result<Vec<Decomposed>, _>>()?;

        let mut identities = IdentityMaps::new();
        for (index, dependent) in self.schema.dependents.iter().enumerate() {
            let rows = decomposed
                .iter()
                .filter_map(|d| d.dependents[index].clone())
                .collect();
            let identity = self.writer.upsert_batch(dependent.table, rows).await?;
            identities.insert(dependent.table.entity, identity);
        }

        let top = decomposed.into_iter().map(|d| d.top).collect();
        let written = self
            .writer
            .upsert_top_level(self.schema.top, top, &identities)
            .await?;

        Ok(written)
    }
}

#[async_trait]
impl<'a, S: Store + ?Sized> PageHandler for PageSync<'a, S> {
    async fn handle_page(&mut self, records: Vec<Value>) -> Result<(), SyncError> {
        self.page += 1;
        let span = tracing::info_span!("page", table = self.schema.top.table, page = self.page);

        let written = self.apply(&records).instrument(span).await?;
        counter!(PAGES_SYNCED, "table" => self.schema.top.table).increment(1);
        tracing::debug!(
            table = self.schema.top.table,
            page = self.page,
            written,
            "Page committed"
        );

        Ok(())
    }
}
