#![recursion_limit = "256"]

//! Pulls Cratejoy and Mailchimp records page by page and upserts them into SQL.

pub mod config;
pub mod cratejoy;
pub mod decompose;
pub mod error;
pub mod fetcher;
pub mod mailchimp;
pub mod metrics_defs;
pub mod opaque;
pub mod orchestrator;
pub mod pager;
pub mod row;
pub mod store;
pub mod table;
pub mod timestamp;
pub mod writer;

#[cfg(test)]
mod testutils;

use config::Settings;
use cratejoy::CratejoyFeed;
use error::SyncError;
use fetcher::{Credentials, Fetcher};
use metrics_defs::FEED_FAILURES;
use pager::DrainStats;
use shared::counter;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use store::{SqlStore, Store};

/// A feed that can be selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feed {
    Mailchimp,
    CratejoyOrders,
    CratejoySubscriptions,
}

impl Feed {
    pub const ALL: [Feed; 3] = [
        Feed::Mailchimp,
        Feed::CratejoyOrders,
        Feed::CratejoySubscriptions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Mailchimp => "mailchimp",
            Feed::CratejoyOrders => "cratejoy-orders",
            Feed::CratejoySubscriptions => "cratejoy-subscriptions",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown feed {0:?}, expected mailchimp, cratejoy-orders or cratejoy-subscriptions")]
pub struct UnknownFeed(String);

impl FromStr for Feed {
    type Err = UnknownFeed;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feed::ALL
            .into_iter()
            .find(|feed| feed.as_str() == s)
            .ok_or_else(|| UnknownFeed(s.to_string()))
    }
}

/// Outcome of one vendor pass.
#[derive(Debug)]
pub struct PassReport {
    pub vendor: &'static str,
    pub outcome: Result<DrainStats, SyncError>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: Vec<PassReport>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.passes.iter().filter(|p| p.outcome.is_err()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

/// Connects to the database and runs every configured pass.
///
/// Only a connection failure is returned as an error; failing passes are reported in
/// the [`RunReport`].
pub async fn run(settings: &Settings, selection: &[Feed]) -> Result<RunReport, SyncError> {
    let store = SqlStore::connect(&settings.database_url, settings.max_connections).await?;
    Ok(run_with_store(settings, &store, selection).await)
}

/// Runs Mailchimp, then Cratejoy. An empty `selection` runs everything configured.
///
/// Passes are independent: a failure ends its own pass and the next one still runs.
pub async fn run_with_store<S>(settings: &Settings, store: &S, selection: &[Feed]) -> RunReport
where
    S: Store + ?Sized,
{
    let selected = |feed: Feed| selection.is_empty() || selection.contains(&feed);
    let mut report = RunReport::default();

    if let Some(vendor) = settings.mailchimp.as_ref().filter(|_| selected(Feed::Mailchimp)) {
        let outcome = pass(settings, &vendor.credentials, |fetcher| async move {
            mailchimp::sync(&fetcher, store, vendor).await
        })
        .await;
        report.passes.push(finish("mailchimp", outcome));
    }

    if let Some(configured) = &settings.cratejoy {
        let mut vendor = configured.clone();
        vendor.feeds.retain(|feed| match feed {
            CratejoyFeed::Orders => selected(Feed::CratejoyOrders),
            CratejoyFeed::Subscriptions => selected(Feed::CratejoySubscriptions),
        });

        if !vendor.feeds.is_empty() {
            let vendor = &vendor;
            let outcome = pass(settings, &vendor.credentials, |fetcher| async move {
                cratejoy::sync(&fetcher, store, vendor).await
            })
            .await;
            report.passes.push(finish("cratejoy", outcome));
        }
    }

    if report.passes.is_empty() {
        tracing::warn!(?selection, "No configured feed matches the selection");
    }

    report
}

async fn pass<F, Fut>(
    settings: &Settings,
    credentials: &Credentials,
    body: F,
) -> Result<DrainStats, SyncError>
where
    F: FnOnce(Fetcher) -> Fut,
    Fut: Future<Output = Result<DrainStats, SyncError>>,
{
    let fetcher = Fetcher::new(credentials.clone(), settings.timeout, settings.retry.clone())?;
    body(fetcher).await
}

fn finish(vendor: &'static str, outcome: Result<DrainStats, SyncError>) -> PassReport {
    match &outcome {
        Ok(stats) => tracing::info!(
            vendor,
            pages = stats.pages,
            records = stats.records,
            "Sync pass finished"
        ),
        Err(err) => {
            counter!(FEED_FAILURES, "vendor" => vendor).increment(1);
            tracing::error!(vendor, error = %err, "Sync pass failed");
        }
    }

    PassReport { vendor, outcome }
}
