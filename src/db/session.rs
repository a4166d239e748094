use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::model::{DatabaseDescriptor, QuerySessionOverrides};
use crate::errors::{GatewayError, Result};

/// Transaction isolation levels accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    /// Keyword used in the SQL Server session program.
    pub fn sqlserver_keyword(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            other => Err(GatewayError::ConfigValidate(vec![format!(
                "invalid isolation level '{other}'"
            )])),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::RepeatableRead => "repeatable_read",
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::Snapshot => "snapshot",
        };
        f.write_str(s)
    }
}

/// Deadlock victim priority for SQL Server sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlockPriority {
    Low,
    Normal,
    High,
}

impl DeadlockPriority {
    pub fn sqlserver_keyword(&self) -> &'static str {
        match self {
            DeadlockPriority::Low => "LOW",
            DeadlockPriority::Normal => "NORMAL",
            DeadlockPriority::High => "HIGH",
        }
    }
}

impl FromStr for DeadlockPriority {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(DeadlockPriority::Low),
            "normal" => Ok(DeadlockPriority::Normal),
            "high" => Ok(DeadlockPriority::High),
            other => Err(GatewayError::ConfigValidate(vec![format!(
                "invalid deadlock priority '{other}'"
            )])),
        }
    }
}

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_JOURNAL_MODE: &str = "wal";

/// Effective per-statement tuning, merged from descriptor defaults and
/// per-query overrides before every execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub isolation: IsolationLevel,
    pub lock_timeout_ms: u64,
    pub deadlock_priority: DeadlockPriority,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
}

/// Merges descriptor defaults with per-query overrides.
///
/// Precedence per field: query override > descriptor > implicit default. The
/// implicit isolation default follows the descriptor's read-only flag. Enum
/// strings are validated here; an invalid value is a configuration error, not
/// a runtime fallback, so the loader calls this during validation as well.
pub fn resolve(
    descriptor: &DatabaseDescriptor,
    overrides: Option<&QuerySessionOverrides>,
) -> Result<SessionConfig> {
    let default_isolation = if descriptor.read_only {
        IsolationLevel::ReadUncommitted
    } else {
        IsolationLevel::ReadCommitted
    };

    let pick = |query: &Option<String>, desc: &Option<String>| -> Option<String> {
        query
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(desc.as_deref().filter(|s| !s.is_empty()))
            .map(str::to_string)
    };

    let empty = QuerySessionOverrides::default();
    let overrides = overrides.unwrap_or(&empty);

    let isolation = match pick(&overrides.isolation, &descriptor.isolation) {
        Some(s) => s.parse()?,
        None => default_isolation,
    };

    let deadlock_priority = match pick(&overrides.deadlock_priority, &descriptor.deadlock_priority)
    {
        Some(s) => s.parse()?,
        None => DeadlockPriority::Low,
    };

    let lock_timeout_ms = overrides
        .lock_timeout_ms
        .or(descriptor.lock_timeout_ms)
        .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);

    let busy_timeout_ms = overrides
        .busy_timeout_ms
        .or(descriptor.busy_timeout_ms)
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

    let journal_mode = pick(&overrides.journal_mode, &descriptor.journal_mode)
        .unwrap_or_else(|| DEFAULT_JOURNAL_MODE.to_string());

    Ok(SessionConfig {
        isolation,
        lock_timeout_ms,
        deadlock_priority,
        busy_timeout_ms,
        journal_mode,
    })
}

/// The SQL Server session program, applied in one round-trip on every pooled
/// connection acquisition. The literal statement text is part of the contract
/// the gateway imposes on the engine.
pub fn sqlserver_session_program(config: &SessionConfig) -> String {
    format!(
        "SET TRANSACTION ISOLATION LEVEL {}; SET LOCK_TIMEOUT {}; SET DEADLOCK_PRIORITY {}; SET NOCOUNT ON; SET IMPLICIT_TRANSACTIONS OFF; SET ARITHABORT ON",
        config.isolation.sqlserver_keyword(),
        config.lock_timeout_ms,
        config.deadlock_priority.sqlserver_keyword(),
    )
}

/// The SQLite session program. Isolation and deadlock fields do not apply;
/// WAL journaling additionally relaxes synchronous mode.
pub fn sqlite_session_program(config: &SessionConfig) -> String {
    let mut program = format!(
        "PRAGMA busy_timeout={}; PRAGMA journal_mode={}; PRAGMA foreign_keys=ON;",
        config.busy_timeout_ms, config.journal_mode,
    );
    if config.journal_mode.eq_ignore_ascii_case("wal") {
        program.push_str(" PRAGMA synchronous=NORMAL;");
    }
    program
}
