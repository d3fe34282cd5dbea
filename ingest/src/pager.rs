use crate::error::{ParseError, SyncError};
use crate::fetcher::Fetcher;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

/// One decoded page of results and where the following page lives.
#[derive(Debug, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    /// `None` ends the stream.
    pub next: Option<Url>,
}

/// Turns a response body into a page, resolving the vendor's cursor into a URL.
pub trait PageDecoder: Send + Sync {
    fn decode(&self, url: &Url, body: &[u8]) -> Result<Page, ParseError>;
}

/// Receives every page in order. An error aborts the drain.
#[async_trait]
pub trait PageHandler: Send {
    async fn handle_page(&mut self, records: Vec<Value>) -> Result<(), SyncError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub pages: u64,
    pub records: u64,
}

/// Follows the cursor from `first` until a page has no successor.
///
/// Pages handled before a failure stay written; nothing is checkpointed, so a later
/// run starts again from `first`.
pub async fn drain<D, H>(
    fetcher: &Fetcher,
    first: Url,
    decoder: &D,
    handler: &mut H,
) -> Result<DrainStats, SyncError>
where
    D: PageDecoder + ?Sized,
    H: PageHandler + ?Sized,
{
    let mut stats = DrainStats::default();
    let mut next = Some(first);

    while let Some(url) = next.take() {
        let fetched = fetcher.fetch(&url).await?;
        let page = decoder.decode(&url, &fetched.body)?;

        tracing::debug!(
            %url,
            records = page.records.len(),
            has_next = page.next.is_some(),
            "Fetched page"
        );

        stats.pages += 1;
        stats.records += page.records.len() as u64;

        handler.handle_page(page.records).await?;
        next = page.next;
    }

    tracing::info!(pages = stats.pages, records = stats.records, "Drained feed");

    Ok(stats)
}

#[derive(Deserialize)]
struct CursorEnvelope {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    next: Option<String>,
    results: Vec<Value>,
}

/// Decodes `{count, next, prev, results}` envelopes. `next` is a URL or URL fragment
/// resolved against the endpoint; empty or missing means last page.
pub struct CursorDecoder {
    endpoint: Url,
}

impl CursorDecoder {
    pub fn new(endpoint: Url) -> Self {
        CursorDecoder { endpoint }
    }
}

impl PageDecoder for CursorDecoder {
    fn decode(&self, _url: &Url, body: &[u8]) -> Result<Page, ParseError> {
        let envelope: CursorEnvelope = serde_json::from_slice(body)?;

        let next = match envelope.next.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(cursor) => Some(self.endpoint.join(cursor)?),
        };

        tracing::trace!(total = envelope.count, "Decoded cursor envelope");

        Ok(Page {
            records: envelope.results,
            next,
        })
    }
}
