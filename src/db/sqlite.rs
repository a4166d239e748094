//! Embedded SQLite driver.
//!
//! Built on sqlx. Database-level pragmas (journaling, cache, mmap) are
//! applied once per physical connection at open; the per-statement session
//! program re-applies the tunables that pool recycling can lose, because the
//! pool may hand back any peer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::{DatabaseDescriptor, EngineKind};
use crate::db::session::{sqlite_session_program, SessionConfig};
use crate::db::statement::{is_write, scan_params};
use crate::db::value::SqlValue;
use crate::db::{Driver, ParamMap, QueryOutcome, Record};
use crate::errors::{GatewayError, Result};

pub struct SqliteDriver {
    descriptor: DatabaseDescriptor,
    pool: RwLock<SqlitePool>,
}

impl SqliteDriver {
    /// Opens the pool and verifies liveness before handing the driver out.
    pub async fn connect(descriptor: DatabaseDescriptor) -> Result<Self> {
        let pool = Self::build_pool(&descriptor).await?;
        Ok(Self {
            descriptor,
            pool: RwLock::new(pool),
        })
    }

    fn is_memory(descriptor: &DatabaseDescriptor) -> bool {
        descriptor.path.as_deref() == Some(":memory:")
    }

    fn connect_options(descriptor: &DatabaseDescriptor) -> Result<SqliteConnectOptions> {
        let path = descriptor
            .path
            .as_deref()
            .ok_or_else(|| GatewayError::DriverConnect("sqlite descriptor without path".into()))?;

        let memory = Self::is_memory(descriptor);
        let journal = descriptor.journal_mode.as_deref().unwrap_or("wal");
        let journal_mode = parse_journal_mode(journal)?;
        let busy_timeout = descriptor.busy_timeout_ms.unwrap_or(5_000);

        let mut options = if memory {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(!descriptor.read_only)
                .read_only(descriptor.read_only)
        };

        options = options
            .busy_timeout(Duration::from_millis(busy_timeout))
            .journal_mode(journal_mode)
            .foreign_keys(true)
            .pragma("wal_autocheckpoint", "1000")
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", "-64000")
            .pragma("mmap_size", "268435456");

        if journal_mode == SqliteJournalMode::Wal {
            options = options.synchronous(SqliteSynchronous::Normal);
        }

        Ok(options)
    }

    async fn build_pool(descriptor: &DatabaseDescriptor) -> Result<SqlitePool> {
        let options = Self::connect_options(descriptor)?;

        // Every `:memory:` connection is its own database, so the pool must
        // stay pinned to a single connection to present one coherent store.
        let max_open = if Self::is_memory(descriptor) {
            1
        } else {
            descriptor.pool.max_open.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_open)
            .min_connections(descriptor.pool.max_idle.min(max_open))
            .max_lifetime(Duration::from_secs(descriptor.pool.max_lifetime_sec))
            .idle_timeout(Duration::from_secs(descriptor.pool.max_idle_time_sec))
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("sqlite open: {e}")))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("sqlite ping: {e}")))?;

        Ok(pool)
    }

    async fn run(
        &self,
        session: &SessionConfig,
        sql: &str,
        params: &ParamMap,
    ) -> Result<QueryOutcome> {
        let pool = self.pool.read().await.clone();
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| GatewayError::DriverQuery(format!("acquire: {e}")))?;

        let program = sqlite_session_program(session);
        sqlx::raw_sql(&program)
            .execute(&mut *conn)
            .await
            .map_err(|e| GatewayError::DriverQuery(format!("session apply: {e}")))?;

        let names = scan_params(sql)?;

        if is_write(sql)? {
            let mut query = sqlx::query(sql);
            for name in &names {
                query = bind_value(query, params.get(name));
            }

            // Writable connections take the reserved lock up front rather
            // than upgrading a deferred lock mid-statement, which can fail
            // with SQLITE_BUSY under concurrent writers.
            let immediate = !self.descriptor.read_only;
            if immediate {
                sqlx::raw_sql("BEGIN IMMEDIATE")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| GatewayError::DriverQuery(format!("lock: {e}")))?;
            }

            let result = query.execute(&mut *conn).await;

            if immediate {
                match &result {
                    Ok(_) => {
                        sqlx::raw_sql("COMMIT")
                            .execute(&mut *conn)
                            .await
                            .map_err(|e| GatewayError::DriverQuery(format!("commit: {e}")))?;
                    }
                    Err(_) => {
                        let _ = sqlx::raw_sql("ROLLBACK").execute(&mut *conn).await;
                    }
                }
            }

            let result =
                result.map_err(|e| GatewayError::DriverQuery(format!("execute: {e}")))?;
            Ok(QueryOutcome {
                rows: Vec::new(),
                rows_affected: result.rows_affected(),
                duration_ms: 0,
            })
        } else {
            let mut query = sqlx::query(sql);
            for name in &names {
                query = bind_value(query, params.get(name));
            }
            let rows = query
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| GatewayError::DriverQuery(format!("execute: {e}")))?;

            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                records.push(scan_row(row)?);
            }
            Ok(QueryOutcome {
                rows: records,
                rows_affected: 0,
                duration_ms: 0,
            })
        }
    }
}

/// Journal modes accepted by the descriptor's `journal_mode` knob.
pub fn parse_journal_mode(mode: &str) -> Result<SqliteJournalMode> {
    match mode.to_ascii_lowercase().as_str() {
        "delete" => Ok(SqliteJournalMode::Delete),
        "truncate" => Ok(SqliteJournalMode::Truncate),
        "persist" => Ok(SqliteJournalMode::Persist),
        "memory" => Ok(SqliteJournalMode::Memory),
        "wal" => Ok(SqliteJournalMode::Wal),
        "off" => Ok(SqliteJournalMode::Off),
        other => Err(GatewayError::ConfigValidate(vec![format!(
            "invalid journal mode '{other}'"
        )])),
    }
}

/// SQLite assigns named-placeholder indexes in first-occurrence order, so
/// binding the deduplicated scan order positionally lines up with `@name`
/// references in the text.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: Option<&SqlValue>,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        None | Some(SqlValue::Null) => query.bind(None::<String>),
        Some(SqlValue::Bool(b)) => query.bind(*b),
        Some(SqlValue::Int(i)) => query.bind(*i),
        Some(SqlValue::Float(f)) => query.bind(*f),
        Some(SqlValue::Text(s)) => query.bind(s.clone()),
        Some(SqlValue::Timestamp(ts)) => query.bind(ts.to_rfc3339()),
        Some(SqlValue::Bytes(b)) => query.bind(b.clone()),
        Some(SqlValue::Json(v)) => query.bind(v.to_string()),
    }
}

fn scan_row(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?;

        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" => SqlValue::Int(
                    row.try_get::<i64, _>(idx)
                        .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?,
                ),
                "REAL" | "NUMERIC" => SqlValue::Float(
                    row.try_get::<f64, _>(idx)
                        .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?,
                ),
                "BOOLEAN" => SqlValue::Bool(
                    row.try_get::<bool, _>(idx)
                        .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?,
                ),
                "BLOB" => {
                    let bytes: Vec<u8> = row
                        .try_get(idx)
                        .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(
                    row.try_get::<String, _>(idx)
                        .map_err(|e| GatewayError::DriverQuery(format!("scan: {e}")))?,
                ),
            }
        };

        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn read_only(&self) -> bool {
        self.descriptor.read_only
    }

    fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        session: &SessionConfig,
        sql: &str,
        params: &ParamMap,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();
        let run_fut: std::pin::Pin<Box<dyn std::future::Future<Output = Result<QueryOutcome>> + Send + '_>> =
            Box::pin(self.run(session, sql, params));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                Err(GatewayError::Cancelled(format!(
                    "query against '{}' aborted", self.descriptor.name
                )))
            }
            result = run_fut => result,
        };
        outcome.map(|mut o| {
            o.duration_ms = start.elapsed().as_millis() as u64;
            o
        })
    }

    async fn ping(&self) -> Result<()> {
        let pool = self.pool.read().await.clone();
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("ping: {e}")))?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = Self::build_pool(&self.descriptor)
            .await
            .map_err(|e| GatewayError::DriverReconnect(e.to_string()))?;

        let old = {
            let mut guard = self.pool.write().await;
            std::mem::replace(&mut *guard, fresh)
        };
        debug!(database = %self.descriptor.name, "sqlite pool replaced");
        old.close().await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let pool = self.pool.read().await.clone();
        pool.close().await;
        Ok(())
    }
}
