//! Mailchimp list members.
//!
//! Lists page with `count`/`offset` and report `total_items`. Every member row is
//! tagged with the list it came from, since one contact can sit on several lists.

use crate::error::{ParseError, SyncError};
use crate::fetcher::{Credentials, Fetcher};
use crate::orchestrator::PageSync;
use crate::pager::{DrainStats, Page, PageDecoder, drain};
use crate::store::Store;
use crate::table::{Column, Encoding, FeedSchema, TableDescriptor};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::Instrument;

pub const DEFAULT_BASE_URL: &str = "https://us6.api.mailchimp.com/3.0/";

const MEMBER_FIELDS: &str = "members.email_address,members.status,members.full_name,\
                             members.contact_id,total_items";

pub static MEMBERS: TableDescriptor = TableDescriptor {
    entity: "member",
    table: "mailchimp",
    key: "contact_id",
    conflict: &["list_id", "contact_id"],
    columns: &[
        Column::new("list_id", Encoding::Text),
        Column::new("contact_id", Encoding::Text),
        Column::renamed("email", "email_address", Encoding::Text),
        Column::new("status", Encoding::Text),
        Column::new("full_name", Encoding::Text),
    ],
};

pub static MEMBER_FEED: FeedSchema = FeedSchema {
    dependents: &[],
    top: &MEMBERS,
};

#[derive(Clone, Debug)]
pub struct Settings {
    pub base_url: Url,
    pub credentials: Credentials,
    pub list_ids: Vec<String>,
    pub page_size: u32,
}

/// First page of a list's members.
pub fn members_url(base: &Url, list_id: &str, count: u32) -> Result<Url, ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ParseError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(["lists", list_id, "members"]);
    url.query_pairs_mut()
        .append_pair("fields", MEMBER_FIELDS)
        .append_pair("count", &count.to_string())
        .append_pair("offset", "0");
    Ok(url)
}

fn with_offset(url: &Url, offset: u64) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != "offset")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut next = url.clone();
    next.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("offset", &offset.to_string());
    next
}

fn current_offset(url: &Url) -> u64 {
    url.query_pairs()
        .find(|(name, _)| name == "offset")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct MembersEnvelope {
    #[serde(default)]
    members: Vec<Value>,
    #[serde(default)]
    total_items: u64,
}

/// Decodes `{members, total_items}` pages and advances `offset` by the number of
/// members received.
pub struct OffsetDecoder {
    list_id: String,
}

impl OffsetDecoder {
    pub fn new(list_id: impl Into<String>) -> Self {
        OffsetDecoder {
            list_id: list_id.into(),
        }
    }
}

impl PageDecoder for OffsetDecoder {
    fn decode(&self, url: &Url, body: &[u8]) -> Result<Page, ParseError> {
        let envelope: MembersEnvelope = serde_json::from_slice(body)?;

        let records = envelope
            .members
            .into_iter()
            .map(|mut member| {
                let object = member.as_object_mut().ok_or(ParseError::NotAnObject {
                    entity: MEMBERS.entity,
                })?;
                object.insert("list_id".to_string(), Value::String(self.list_id.clone()));
                Ok(member)
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let offset = current_offset(url) + records.len() as u64;
        let next = if records.is_empty() || offset >= envelope.total_items {
            None
        } else {
            Some(with_offset(url, offset))
        };

        tracing::debug!(
            list_id = %self.list_id,
            offset,
            total = envelope.total_items,
            "Decoded members page"
        );

        Ok(Page { records, next })
    }
}

pub async fn sync_list<S>(
    fetcher: &Fetcher,
    store: &S,
    settings: &Settings,
    list_id: &str,
) -> Result<DrainStats, SyncError>
where
    S: Store + ?Sized,
{
    let first = members_url(&settings.base_url, list_id, settings.page_size)?;
    let decoder = OffsetDecoder::new(list_id);
    let mut handler = PageSync::new(&MEMBER_FEED, store);

    drain(fetcher, first, &decoder, &mut handler)
        .instrument(tracing::info_span!("feed", feed = "mailchimp", list_id))
        .await
}

/// Syncs every configured list in turn. The first failing list ends the pass.
pub async fn sync<S>(fetcher: &Fetcher, store: &S, settings: &Settings) -> Result<DrainStats, SyncError>
where
    S: Store + ?Sized,
{
    let mut total = DrainStats::default();

    for list_id in &settings.list_ids {
        let stats = sync_list(fetcher, store, settings, list_id).await?;
        total.pages += stats.pages;
        total.records += stats.records;
    }

    Ok(total)
}
