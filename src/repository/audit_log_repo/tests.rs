use super::AuditLogRepository;
use crate::domain::audit_log::{AuditAction, AuditEntry};
use chrono::{Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = crate::db::open_in_memory().unwrap();
    Arc::new(Mutex::new(conn))
}

fn make_entry(action: AuditAction, actor: &str, entity_id: &str, minute: i64) -> AuditEntry {
    let base = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    AuditEntry::new(action, actor, base + Duration::minutes(minute)).with_entity_id(entity_id)
}

#[test]
fn test_insert_and_find_by_entity() {
    let repo = AuditLogRepository::new(setup_test_db());

    repo.insert(
        &make_entry(AuditAction::StartTransaction, "op1", "t1", 0)
            .with_after(serde_json::json!({"status": "pending"})),
    )
    .unwrap();
    repo.insert(&make_entry(AuditAction::CompleteTransaction, "op1", "t1", 5))
        .unwrap();
    repo.insert(&make_entry(AuditAction::StartTransaction, "op2", "t2", 1))
        .unwrap();

    let trail = repo.find_by_entity_id("t1").unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].action, "START_TRANSACTION");
    assert_eq!(trail[0].after_state, Some(serde_json::json!({"status": "pending"})));
    assert_eq!(trail[1].action, "COMPLETE_TRANSACTION");
}

#[test]
fn test_find_by_actor_respects_limit() {
    let repo = AuditLogRepository::new(setup_test_db());
    for i in 0..5 {
        repo.insert(&make_entry(AuditAction::CaptureWeight, "op1", "t1", i))
            .unwrap();
    }
    repo.insert(&make_entry(AuditAction::CaptureWeight, "op2", "t1", 9))
        .unwrap();

    let logs = repo.find_by_actor("op1", 3).unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.actor == "op1"));
    assert_eq!(repo.count().unwrap(), 6);
}

#[test]
fn test_failures_are_queryable() {
    let repo = AuditLogRepository::new(setup_test_db());
    repo.insert(&make_entry(AuditAction::VoidTransaction, "op1", "t1", 0).failed("权限不足"))
        .unwrap();
    repo.insert(&make_entry(AuditAction::VoidTransaction, "sup", "t1", 1))
        .unwrap();

    let failures = repo.find_recent_failures(10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason.as_deref(), Some("权限不足"));
    assert!(!failures[0].is_success());
}
