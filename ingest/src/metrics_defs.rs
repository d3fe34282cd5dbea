//! Metrics definitions for the sync job.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "http.requests",
    metric_type: MetricType::Counter,
    description: "Number of HTTP requests sent to vendor APIs, retries included",
};

pub const HTTP_RETRIES: MetricDef = MetricDef {
    name: "http.retries",
    metric_type: MetricType::Counter,
    description: "Number of vendor API requests that were retried",
};

pub const PAGES_SYNCED: MetricDef = MetricDef {
    name: "sync.pages",
    metric_type: MetricType::Counter,
    description: "Number of result pages fully written to the database",
};

pub const ROWS_UPSERTED: MetricDef = MetricDef {
    name: "sync.rows_upserted",
    metric_type: MetricType::Counter,
    description: "Number of rows upserted, tagged by table",
};

pub const UPSERT_DURATION: MetricDef = MetricDef {
    name: "sync.upsert.duration",
    metric_type: MetricType::Histogram,
    description: "Time to upsert one batch in seconds, tagged by table",
};

pub const FEED_FAILURES: MetricDef = MetricDef {
    name: "sync.feed.failures",
    metric_type: MetricType::Counter,
    description: "Number of feed passes that ended with an error",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUESTS,
    HTTP_RETRIES,
    PAGES_SYNCED,
    ROWS_UPSERTED,
    UPSERT_DURATION,
    FEED_FAILURES,
];
