//! Scenario: transient adapter failure retried per policy, succeeding
//! on the second attempt.

use crate::prelude::*;
use cdr_adapters::ScriptedOutcome;
use cdr_core::test_support::probe_plan;
use cdr_core::{AdapterVerdict, AuditKind, ExecutionStatus, StepStatus};

#[tokio::test(start_paused = true)]
async fn transient_then_ok_completes_with_two_attempts() {
    let s = spec();
    s.adapter.script(
        "asset-1",
        ScriptedOutcome::Fail {
            verdict: AdapterVerdict::Transient,
        },
    );

    let id = s.submit(probe_plan("asset-1"));
    let status = s.drive(&id).await;
    assert_eq!(status, ExecutionStatus::Completed);

    // Attempt accounting: one failed attempt, one success
    let step = s.store.steps_of(&id).remove(0);
    assert_eq!(step.status, StepStatus::Succeeded);
    assert_eq!(step.attempt, 2);
    assert_eq!(s.adapter.calls_for("asset-1"), 2);

    // One failed-attempt state change, one retry with a backoff delay,
    // one success
    let events = s.store.events_since(&id, 0);
    let failed_rows = events
        .iter()
        .filter(|e| e.to_status.as_deref() == Some("failed"))
        .count();
    assert_eq!(failed_rows, 1);

    let retry_rows: Vec<_> = events
        .iter()
        .filter(|e| e.kind == AuditKind::Retry)
        .collect();
    assert_eq!(retry_rows.len(), 1);
    assert!(retry_rows[0].payload["delay_ms"].as_u64().unwrap() > 0);

    let succeeded_rows = events
        .iter()
        .filter(|e| e.to_status.as_deref() == Some("succeeded"))
        .count();
    assert_eq!(succeeded_rows, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_events_do_not_duplicate_terminal_outcomes() {
    let s = spec();
    s.adapter.script(
        "asset-1",
        ScriptedOutcome::Fail {
            verdict: AdapterVerdict::Transient,
        },
    );
    let id = s.submit(probe_plan("asset-1"));
    s.drive(&id).await;

    let terminal_rows = s
        .store
        .events_since(&id, 0)
        .into_iter()
        .filter(|e| e.to_status.as_deref() == Some("completed"))
        .count();
    assert_eq!(terminal_rows, 1);
}
