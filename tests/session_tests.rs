use sqlgate::config::model::{DatabaseDescriptor, EngineKind, QuerySessionOverrides};
use sqlgate::db::session::{
    resolve, sqlite_session_program, sqlserver_session_program, DeadlockPriority, IsolationLevel,
};

fn sqlite_descriptor(read_only: bool) -> DatabaseDescriptor {
    DatabaseDescriptor {
        name: "db".into(),
        kind: EngineKind::Sqlite,
        read_only,
        path: Some(":memory:".into()),
        ..Default::default()
    }
}

#[test]
fn test_query_override_wins() {
    let mut descriptor = sqlite_descriptor(false);
    descriptor.isolation = Some("serializable".into());
    descriptor.lock_timeout_ms = Some(1_000);

    let overrides = QuerySessionOverrides {
        isolation: Some("snapshot".into()),
        lock_timeout_ms: Some(250),
        ..Default::default()
    };

    let session = resolve(&descriptor, Some(&overrides)).unwrap();
    assert_eq!(session.isolation, IsolationLevel::Snapshot);
    assert_eq!(session.lock_timeout_ms, 250);
}

#[test]
fn test_descriptor_fills_when_override_empty() {
    let mut descriptor = sqlite_descriptor(false);
    descriptor.isolation = Some("repeatable_read".into());
    descriptor.deadlock_priority = Some("high".into());

    // Empty-string overrides count as unset.
    let overrides = QuerySessionOverrides {
        isolation: Some(String::new()),
        ..Default::default()
    };

    let session = resolve(&descriptor, Some(&overrides)).unwrap();
    assert_eq!(session.isolation, IsolationLevel::RepeatableRead);
    assert_eq!(session.deadlock_priority, DeadlockPriority::High);
}

#[test]
fn test_read_only_flag_decides_default() {
    let session = resolve(&sqlite_descriptor(true), None).unwrap();
    assert_eq!(session.isolation, IsolationLevel::ReadUncommitted);

    let session = resolve(&sqlite_descriptor(false), None).unwrap();
    assert_eq!(session.isolation, IsolationLevel::ReadCommitted);

    assert_eq!(session.lock_timeout_ms, 5_000);
    assert_eq!(session.deadlock_priority, DeadlockPriority::Low);
    assert_eq!(session.journal_mode, "wal");
}

#[test]
fn test_invalid_enum_is_config_error() {
    let mut descriptor = sqlite_descriptor(false);
    descriptor.deadlock_priority = Some("urgent".into());
    let err = resolve(&descriptor, None).unwrap_err();
    assert!(err.to_string().contains("invalid deadlock priority"));
}

#[test]
fn test_sqlserver_program_is_literal() {
    let mut descriptor = sqlite_descriptor(false);
    descriptor.isolation = Some("snapshot".into());
    descriptor.lock_timeout_ms = Some(2_500);
    descriptor.deadlock_priority = Some("high".into());

    let session = resolve(&descriptor, None).unwrap();
    assert_eq!(
        sqlserver_session_program(&session),
        "SET TRANSACTION ISOLATION LEVEL SNAPSHOT; SET LOCK_TIMEOUT 2500; \
         SET DEADLOCK_PRIORITY HIGH; SET NOCOUNT ON; SET IMPLICIT_TRANSACTIONS OFF; \
         SET ARITHABORT ON"
    );
}

#[test]
fn test_sqlite_program_wal_adds_synchronous() {
    let session = resolve(&sqlite_descriptor(false), None).unwrap();
    assert_eq!(
        sqlite_session_program(&session),
        "PRAGMA busy_timeout=5000; PRAGMA journal_mode=wal; PRAGMA foreign_keys=ON; \
         PRAGMA synchronous=NORMAL;"
    );

    let mut descriptor = sqlite_descriptor(false);
    descriptor.journal_mode = Some("delete".into());
    let session = resolve(&descriptor, None).unwrap();
    assert_eq!(
        sqlite_session_program(&session),
        "PRAGMA busy_timeout=5000; PRAGMA journal_mode=delete; PRAGMA foreign_keys=ON;"
    );
}
