//! Database driver abstraction.
//!
//! Each configured database is owned by a [`Driver`]: a pooled connection
//! group plus the per-engine logic for session tuning, parameter binding and
//! row scanning. Drivers expose one uniform parameterized-query surface; the
//! [`manager::DbManager`] mediates concurrent access to the named set of them.

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::config::model::{DatabaseDescriptor, EngineKind};
use crate::db::session::SessionConfig;
use crate::db::value::SqlValue;
use crate::errors::Result;

pub mod manager;
pub mod session;
pub mod sqlite;
pub mod sqlserver;
pub mod statement;
pub mod value;

/// One result row: column name to value, preserving engine column order.
pub type Record = IndexMap<String, SqlValue>;

/// Named parameter values bound into a statement. Absent names bind SQL NULL;
/// extra names are ignored.
pub type ParamMap = IndexMap<String, SqlValue>;

/// Outcome of one statement execution.
///
/// Reads materialize `rows` fully before returning; writes carry
/// `rows_affected`. The unused half stays empty/zero.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Record>,
    pub rows_affected: u64,
    pub duration_ms: u64,
}

/// Uniform contract over the per-engine drivers.
///
/// Every execution acquires a dedicated pooled connection, applies the
/// engine's session program, runs the statement and releases the connection.
/// Drivers never retry internally; transport errors propagate to the caller.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name from the descriptor.
    fn name(&self) -> &str;

    fn kind(&self) -> EngineKind;

    fn read_only(&self) -> bool;

    fn descriptor(&self) -> &DatabaseDescriptor;

    /// Executes one parameterized statement. `@name` placeholders resolve
    /// against `params`; the write classifier decides between affected-count
    /// and materialized-row results.
    async fn query(
        &self,
        cancel: &CancellationToken,
        session: &SessionConfig,
        sql: &str,
        params: &ParamMap,
    ) -> Result<QueryOutcome>;

    /// Liveness probe against the current pool.
    async fn ping(&self) -> Result<()>;

    /// Replaces the connection pool. The new pool is opened, configured and
    /// pinged before the old one is swapped out and closed; on failure the
    /// old pool stays in place.
    async fn reconnect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
