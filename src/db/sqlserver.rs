//! SQL Server driver.
//!
//! Built on tiberius over tokio TCP, pooled with bb8. Statements arrive with
//! `@name` placeholders; the engine wants positional `@P<n>` markers, so the
//! text is rewritten in first-occurrence order before binding. The session
//! program runs on every acquisition because pool identity is not stable.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use tiberius::{AuthMethod, Client, ColumnData, Config as TdsConfig, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::{DatabaseDescriptor, EngineKind};
use crate::db::session::{sqlserver_session_program, SessionConfig};
use crate::db::statement::{is_write, scan_params};
use crate::db::value::SqlValue;
use crate::db::{Driver, ParamMap, QueryOutcome, Record};
use crate::errors::{GatewayError, Result};

type TdsClient = Client<Compat<TcpStream>>;
type TdsPool = bb8::Pool<SqlServerConnectionManager>;

/// bb8 connection factory for one descriptor.
pub struct SqlServerConnectionManager {
    config: TdsConfig,
}

#[async_trait]
impl bb8::ManageConnection for SqlServerConnectionManager {
    type Connection = TdsClient;
    type Error = GatewayError;

    async fn connect(&self) -> Result<TdsClient> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(self.config.clone(), tcp.compat_write()).await?;
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut TdsClient) -> Result<()> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut TdsClient) -> bool {
        false
    }
}

pub struct SqlServerDriver {
    descriptor: DatabaseDescriptor,
    pool: RwLock<Option<TdsPool>>,
}

impl SqlServerDriver {
    pub async fn connect(descriptor: DatabaseDescriptor) -> Result<Self> {
        let pool = Self::build_pool(&descriptor).await?;
        Ok(Self {
            descriptor,
            pool: RwLock::new(Some(pool)),
        })
    }

    fn tds_config(descriptor: &DatabaseDescriptor) -> Result<TdsConfig> {
        let required = |field: &Option<String>, label: &str| -> Result<String> {
            field.clone().filter(|s| !s.is_empty()).ok_or_else(|| {
                GatewayError::DriverConnect(format!("sqlserver descriptor without {label}"))
            })
        };

        let mut config = TdsConfig::new();
        config.host(required(&descriptor.host, "host")?);
        config.port(descriptor.port.ok_or_else(|| {
            GatewayError::DriverConnect("sqlserver descriptor without port".into())
        })?);
        config.database(required(&descriptor.database, "database")?);
        config.authentication(AuthMethod::sql_server(
            required(&descriptor.user, "user")?,
            required(&descriptor.password, "password")?,
        ));
        config.application_name("sqlgate");

        match descriptor.encrypt.as_deref().unwrap_or("disable") {
            "disable" => config.encryption(EncryptionLevel::NotSupported),
            "true" => config.encryption(EncryptionLevel::Required),
            "false" => config.encryption(EncryptionLevel::Off),
            other => {
                return Err(GatewayError::DriverConnect(format!(
                    "invalid encrypt mode '{other}'"
                )))
            }
        }

        if descriptor.read_only {
            config.readonly(true);
        }

        Ok(config)
    }

    async fn build_pool(descriptor: &DatabaseDescriptor) -> Result<TdsPool> {
        let manager = SqlServerConnectionManager {
            config: Self::tds_config(descriptor)?,
        };

        let pool = bb8::Pool::builder()
            .max_size(descriptor.pool.max_open.max(1))
            .min_idle(Some(descriptor.pool.max_idle))
            .max_lifetime(Some(Duration::from_secs(descriptor.pool.max_lifetime_sec)))
            .idle_timeout(Some(Duration::from_secs(descriptor.pool.max_idle_time_sec)))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("sqlserver pool: {e}")))?;

        // Initial liveness check before the pool is handed out.
        {
            let mut conn = pool.get().await.map_err(acquire_error)?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| GatewayError::DriverConnect(format!("sqlserver ping: {e}")))?
                .into_row()
                .await
                .map_err(|e| GatewayError::DriverConnect(format!("sqlserver ping: {e}")))?;
        }

        Ok(pool)
    }

    async fn current_pool(&self) -> Result<TdsPool> {
        self.pool.read().await.clone().ok_or_else(|| {
            GatewayError::DriverConnect(format!("database '{}' is closed", self.descriptor.name))
        })
    }

    async fn run(
        &self,
        session: &SessionConfig,
        sql: &str,
        params: &ParamMap,
    ) -> Result<QueryOutcome> {
        let pool = self.current_pool().await?;
        let mut conn = pool.get().await.map_err(acquire_error)?;

        let program = sqlserver_session_program(session);
        conn.simple_query(program)
            .await
            .map_err(|e| GatewayError::DriverQuery(format!("session apply: {e}")))?
            .into_results()
            .await
            .map_err(|e| GatewayError::DriverQuery(format!("session apply: {e}")))?;

        let names = scan_params(sql)?;
        let rewritten = rewrite_placeholders(sql, &names)?;

        let mut query = Query::new(rewritten);
        for name in &names {
            bind_param(&mut query, params.get(name));
        }

        if is_write(sql)? {
            let result = query
                .execute(&mut *conn)
                .await
                .map_err(|e| GatewayError::DriverQuery(format!("execute: {e}")))?;
            let rows_affected = result.rows_affected().iter().sum();
            Ok(QueryOutcome {
                rows: Vec::new(),
                rows_affected,
                duration_ms: 0,
            })
        } else {
            let stream = query
                .query(&mut *conn)
                .await
                .map_err(|e| GatewayError::DriverQuery(format!("execute: {e}")))?;
            let rows = stream
                .into_first_result()
                .await
                .map_err(|e| GatewayError::DriverQuery(format!("iterate: {e}")))?;

            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
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

fn acquire_error(err: bb8::RunError<GatewayError>) -> GatewayError {
    match err {
        bb8::RunError::User(e) => e,
        bb8::RunError::TimedOut => {
            GatewayError::DriverQuery("acquire: pool checkout timed out".into())
        }
    }
}

/// Rewrites `@name` placeholders to positional `@P<n>` markers matching the
/// deduplicated first-occurrence bind order. Repeated names share a marker.
fn rewrite_placeholders(sql: &str, names: &[String]) -> Result<String> {
    let re = Regex::new(r"@(\w+)")?;
    let rewritten = re.replace_all(sql, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match names.iter().position(|n| n == name) {
            Some(idx) => format!("@P{}", idx + 1),
            None => caps[0].to_string(),
        }
    });
    Ok(rewritten.into_owned())
}

fn bind_param(query: &mut Query<'_>, value: Option<&SqlValue>) {
    match value {
        None | Some(SqlValue::Null) => query.bind(None::<String>),
        Some(SqlValue::Bool(b)) => query.bind(*b),
        Some(SqlValue::Int(i)) => query.bind(*i),
        Some(SqlValue::Float(f)) => query.bind(*f),
        Some(SqlValue::Text(s)) => query.bind(s.clone()),
        Some(SqlValue::Timestamp(ts)) => query.bind(ts.naive_utc()),
        Some(SqlValue::Bytes(b)) => query.bind(String::from_utf8_lossy(b).into_owned()),
        Some(SqlValue::Json(v)) => query.bind(v.to_string()),
    }
}

fn scan_row(row: tiberius::Row) -> Result<Record> {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let mut record = Record::new();
    for (idx, data) in row.into_iter().enumerate() {
        let name = names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("column{idx}"));
        record.insert(name, column_data_to_value(data)?);
    }
    Ok(record)
}

fn column_data_to_value(data: ColumnData<'static>) -> Result<SqlValue> {
    let scan_err = |e: tiberius::error::Error| GatewayError::DriverQuery(format!("scan: {e}"));

    let value = match data {
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null),
        ColumnData::U8(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I16(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I32(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I64(v) => v.map(SqlValue::Int).unwrap_or(SqlValue::Null),
        ColumnData::F32(v) => v
            .map(|n| SqlValue::Float(n as f64))
            .unwrap_or(SqlValue::Null),
        ColumnData::F64(v) => v.map(SqlValue::Float).unwrap_or(SqlValue::Null),
        ColumnData::String(v) => v
            .map(|s| SqlValue::Text(s.into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Guid(v) => v
            .map(|g| SqlValue::Text(g.to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Text(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Numeric(v) => v
            .map(|n| SqlValue::Float(n.value() as f64 / 10f64.powi(n.scale() as i32)))
            .unwrap_or(SqlValue::Null),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::Text(x.to_string()))
            .unwrap_or(SqlValue::Null),
        data @ ColumnData::DateTimeOffset(_) => {
            let ts: Option<DateTime<FixedOffset>> =
                FromSql::from_sql(&data).map_err(scan_err)?;
            ts.map(SqlValue::Timestamp).unwrap_or(SqlValue::Null)
        }
        data @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => {
            let ts: Option<NaiveDateTime> = FromSql::from_sql(&data).map_err(scan_err)?;
            ts.map(|naive| {
                SqlValue::Timestamp(DateTime::<FixedOffset>::from_naive_utc_and_offset(
                    naive,
                    FixedOffset::east_opt(0).expect("zero offset is valid"),
                ))
            })
            .unwrap_or(SqlValue::Null)
        }
        data @ ColumnData::Date(_) => {
            let d: Option<NaiveDate> = FromSql::from_sql(&data).map_err(scan_err)?;
            d.map(|d| SqlValue::Text(d.to_string()))
                .unwrap_or(SqlValue::Null)
        }
        data @ ColumnData::Time(_) => {
            let t: Option<NaiveTime> = FromSql::from_sql(&data).map_err(scan_err)?;
            t.map(|t| SqlValue::Text(t.to_string()))
                .unwrap_or(SqlValue::Null)
        }
    };

    Ok(value)
}

#[async_trait]
impl Driver for SqlServerDriver {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Sqlserver
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
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                Err(GatewayError::Cancelled(format!(
                    "query against '{}' aborted", self.descriptor.name
                )))
            }
            result = self.run(session, sql, params) => result,
        };
        outcome.map(|mut o| {
            o.duration_ms = start.elapsed().as_millis() as u64;
            o
        })
    }

    async fn ping(&self) -> Result<()> {
        let pool = self.current_pool().await?;
        let mut conn = pool.get().await.map_err(acquire_error)?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("ping: {e}")))?
            .into_row()
            .await
            .map_err(|e| GatewayError::DriverConnect(format!("ping: {e}")))?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = Self::build_pool(&self.descriptor)
            .await
            .map_err(|e| GatewayError::DriverReconnect(e.to_string()))?;

        let _old = {
            let mut guard = self.pool.write().await;
            guard.replace(fresh)
        };
        debug!(database = %self.descriptor.name, "sqlserver pool replaced");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.write().await.take();
        Ok(())
    }
}
