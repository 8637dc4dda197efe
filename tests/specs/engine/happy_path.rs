//! Scenario: immediate READ plan completes end-to-end with an ordered,
//! fully masked event stream.

use crate::prelude::*;
use cdr_core::test_support::probe_plan;
use cdr_core::{AuditKind, ExecutionStatus, Mode, StepStatus, SubmitOptions};

#[tokio::test(start_paused = true)]
async fn immediate_read_plan_completes() {
    let s = spec();

    // FAST + short expected duration: the immediate path
    let receipt = s
        .dispatcher
        .submit(
            probe_plan("asset-1"),
            "actor-1",
            &tenant(),
            SubmitOptions::default(),
        )
        .unwrap();
    assert_eq!(receipt.mode, Mode::Immediate);

    let status = s.drive(&receipt.execution_id).await;
    assert_eq!(status, ExecutionStatus::Completed);

    let steps = s.store.steps_of(&receipt.execution_id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Succeeded);
    assert_eq!(steps[0].attempt, 1);

    // Ordered stream: creation, queued, running, step start, step
    // success, progress, terminal — sequences strictly increasing
    let events = s.store.events_since(&receipt.execution_id, 0);
    for pair in events.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
    }

    let to_statuses: Vec<Option<&str>> = events
        .iter()
        .filter(|e| e.kind == AuditKind::StateChange)
        .map(|e| e.to_status.as_deref())
        .collect();
    assert_eq!(
        to_statuses,
        vec![
            Some("approved"),
            Some("queued"),
            Some("running"),
            Some("running"),
            Some("succeeded"),
            Some("completed"),
        ]
    );

    // A progress row was emitted along the way
    assert!(events.iter().any(|e| e.kind == AuditKind::Progress));
}

#[tokio::test(start_paused = true)]
async fn queue_item_is_consumed_exactly_once() {
    let s = spec();
    let id = s.submit(probe_plan("asset-1"));
    s.drive(&id).await;

    assert!(s
        .store
        .lease(10, "another-worker", std::time::Duration::from_secs(5))
        .unwrap()
        .is_empty());
    assert_eq!(s.adapter.calls_for("asset-1"), 1);
}
