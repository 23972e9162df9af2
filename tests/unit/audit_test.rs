//! Tests for audit sink

use prometheus_jobs::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        7,
        "reindex",
        Some("tenant-1".to_string()),
        AuditAction::Scheduled,
        Some("payload".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].job_id, 7);
    assert_eq!(events[0].action, AuditAction::Scheduled);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, "job-1", None, AuditAction::Scheduled, None));
    sink.record(build_audit_event(2, "job-2", None, AuditAction::Scheduled, None));
    sink.record(build_audit_event(3, "job-3", None, AuditAction::Scheduled, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].job_id, 2); // First one popped
    assert_eq!(events[1].job_id, 3);
}

#[test]
fn test_actions_for_filters_by_job() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(1, "a", None, AuditAction::Scheduled, None));
    sink.record(build_audit_event(2, "b", None, AuditAction::Scheduled, None));
    sink.record(build_audit_event(1, "a", None, AuditAction::Started, None));

    assert_eq!(
        sink.actions_for(1),
        vec![AuditAction::Scheduled, AuditAction::Started]
    );
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        42,
        "flush",
        Some("orders".to_string()),
        AuditAction::Blocked,
        Some("gate".to_string()),
    );

    assert_eq!(event.job_id, 42);
    assert_eq!(event.job_name, "flush");
    assert_eq!(event.domain.as_deref(), Some("orders"));
    assert_eq!(event.detail.as_deref(), Some("gate"));
    assert!(!event.event_id.is_empty());
    assert!(event.created_at_ms > 0);
}

#[test]
fn test_audit_event_serializes_action_snake_case() {
    let event = build_audit_event(1, "job", None, AuditAction::Expired, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "expired");
    assert_eq!(AuditAction::Resumed.to_string(), "resumed");
}
