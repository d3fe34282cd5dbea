use crate::error::WriteError;
use crate::row::{EntityRow, SqlValue};
use crate::table::TableDescriptor;
use crate::timestamp;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::any::AnyPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{Any, AnyPool, QueryBuilder};

/// Persistence used by the writer. Every call is atomic: either all rows are written or
/// none are.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert-or-overwrite `rows` into `table`.
    async fn upsert(&self, table: &TableDescriptor, rows: &[EntityRow]) -> Result<(), WriteError>;

    /// The newest value of a timestamp column, `None` when the table is empty.
    async fn latest_timestamp(
        &self,
        table: &'static TableDescriptor,
        column: &'static str,
    ) -> Result<Option<NaiveDateTime>, WriteError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, WriteError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(WriteError::UnsupportedDatabase(other.to_string())),
        }
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        // Schema-qualified names are quoted part by part
        name.split('.')
            .map(|part| match self {
                Dialect::MySql => format!("`{}`", part.replace('`', "``")),
                Dialect::Sqlite => format!("\"{}\"", part.replace('"', "\"\"")),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Upper bound on bind parameters in one statement.
    pub fn max_bind_params(&self) -> usize {
        match self {
            Dialect::MySql => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }

    /// `INSERT INTO t (a, b, c) `, ready for the `VALUES` tuples.
    pub fn insert_prefix(&self, table: &TableDescriptor) -> String {
        let columns = table
            .column_names()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({columns}) ",
            self.quote_identifier(table.table)
        )
    }

    /// Clause that turns the insert into an overwrite of every non-key column.
    pub fn upsert_suffix(&self, table: &TableDescriptor) -> String {
        let updates: Vec<_> = table.update_columns().collect();

        match self {
            Dialect::MySql => {
                let assignments = if updates.is_empty() {
                    // Still has to be an upsert, so assign the key to itself
                    let key = self.quote_identifier(table.key);
                    vec![format!("{key} = {key}")]
                } else {
                    updates
                        .iter()
                        .map(|c| {
                            let c = self.quote_identifier(c);
                            format!("{c} = VALUES({c})")
                        })
                        .collect()
                };
                format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
            }
            Dialect::Sqlite => {
                let target = table
                    .conflict
                    .iter()
                    .map(|c| self.quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                if updates.is_empty() {
                    return format!(" ON CONFLICT ({target}) DO NOTHING");
                }
                let assignments = updates
                    .iter()
                    .map(|c| {
                        let c = self.quote_identifier(c);
                        format!("{c} = excluded.{c}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON CONFLICT ({target}) DO UPDATE SET {assignments}")
            }
        }
    }

    fn latest_sql(&self, table: &TableDescriptor, column: &str) -> String {
        let text_type = match self {
            Dialect::MySql => "CHAR",
            Dialect::Sqlite => "TEXT",
        };
        format!(
            "SELECT CAST(MAX({}) AS {text_type}) FROM {}",
            self.quote_identifier(column),
            self.quote_identifier(table.table)
        )
    }
}

/// A [`Store`] over a sqlx `Any` pool. MySQL in production, SQLite for local runs and
/// tests.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, WriteError> {
        let dialect = Dialect::from_url(url)?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(WriteError::Connect)?;

        tracing::info!(?dialect, "Connected to database");

        Ok(SqlStore { pool, dialect })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn rows_per_statement(&self, table: &TableDescriptor) -> usize {
        (self.dialect.max_bind_params() / table.columns.len().max(1)).max(1)
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn upsert(&self, table: &TableDescriptor, rows: &[EntityRow]) -> Result<(), WriteError> {
        if rows.is_empty() {
            return Ok(());
        }

        let failed = |rows: &[EntityRow], source| WriteError::Upsert {
            entity: table.entity,
            key: match rows {
                [only] => Some(only.key.clone()),
                _ => None,
            },
            source,
        };

        let mut tx = self.pool.begin().await.map_err(|e| failed(rows, e))?;

        let prefix = self.dialect.insert_prefix(table);
        let suffix = self.dialect.upsert_suffix(table);

        for chunk in rows.chunks(self.rows_per_statement(table)) {
            let mut query = QueryBuilder::<Any>::new(&prefix);
            query.push_values(chunk, |mut tuple, row| {
                for value in row.values.values() {
                    push_value(&mut tuple, value);
                }
            });
            query.push(&suffix);

            // Dropping the transaction on error rolls it back
            query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| failed(chunk, e))?;
        }

        tx.commit().await.map_err(|e| failed(rows, e))?;
        Ok(())
    }

    async fn latest_timestamp(
        &self,
        table: &'static TableDescriptor,
        column: &'static str,
    ) -> Result<Option<NaiveDateTime>, WriteError> {
        let sql = self.dialect.latest_sql(table, column);
        let latest: Option<String> = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| WriteError::Query {
                table: table.table,
                source,
            })?;

        latest
            .map(|raw| {
                timestamp::parse_stored(&raw).ok_or(WriteError::StoredTimestamp {
                    table: table.table,
                    column,
                    value: raw,
                })
            })
            .transpose()
    }
}

fn push_value(tuple: &mut Separated<'_, '_, Any, &'static str>, value: &SqlValue) {
    match value {
        SqlValue::Null => tuple.push_bind(None::<String>),
        SqlValue::Int(v) => tuple.push_bind(*v),
        SqlValue::Float(v) => tuple.push_bind(*v),
        SqlValue::Bool(v) => tuple.push_bind(*v),
        SqlValue::Text(v) => tuple.push_bind(v.clone()),
    };
}
