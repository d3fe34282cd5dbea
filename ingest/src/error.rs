use crate::config::ConfigError;
use crate::fetcher::FetchError;
use crate::row::NaturalKey;
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors that end a sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A page or record that cannot be turned into rows. Never skipped.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid page URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("{entity} record is not a JSON object")]
    NotAnObject { entity: &'static str },

    #[error("{entity} record has no natural key in field {field:?}")]
    MissingKey {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}.{field}: expected {expected}, found {found}")]
    UnexpectedType {
        entity: &'static str,
        field: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("{entity}.{field}: malformed timestamp {value:?}")]
    Timestamp {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
}

/// A database failure. The statement or transaction it came from was rolled back.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("unsupported database URL scheme: {0}")]
    UnsupportedDatabase(String),

    #[error("could not connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to upsert {entity}{}: {source}", describe_key(.key))]
    Upsert {
        entity: &'static str,
        key: Option<NaturalKey>,
        #[source]
        source: sqlx::Error,
    },

    #[error("{entity}.{column} references {key}, which was not written on this page")]
    UnresolvedReference {
        entity: &'static str,
        column: &'static str,
        key: NaturalKey,
    },

    #[error("query on {table} failed: {source}")]
    Query {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{table}.{column} holds an unreadable timestamp {value:?}")]
    StoredTimestamp {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

fn describe_key(key: &Option<NaturalKey>) -> String {
    match key {
        Some(key) => format!(" (key {key})"),
        None => String::new(),
    }
}
