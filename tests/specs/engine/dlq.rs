//! Scenario: poisoned work parks in the DLQ; manual requeue re-runs it
//! without duplicating the poison history.

use crate::prelude::*;
use cdr_adapters::ScriptedOutcome;
use cdr_core::test_support::probe_plan;
use cdr_core::{AdapterVerdict, ErrorKind, ExecutionStatus};

#[tokio::test(start_paused = true)]
async fn permanent_poison_parks_in_dlq() {
    let s = spec();
    s.adapter.set_default(ScriptedOutcome::Fail {
        verdict: AdapterVerdict::Permanent,
    });

    let id = s.submit(probe_plan("asset-1"));
    let status = s.drive(&id).await;
    assert_eq!(status, ExecutionStatus::Failed);

    let dlq = s.store.list_dlq(None);
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].execution_id, id);
    assert_eq!(dlq[0].kind, ErrorKind::Permanent);
    assert!(!dlq[0].requeued);
}

#[tokio::test(start_paused = true)]
async fn requeue_reruns_and_reparks_without_duplicating() {
    let s = spec();
    s.adapter.set_default(ScriptedOutcome::Fail {
        verdict: AdapterVerdict::Permanent,
    });

    let id = s.submit(probe_plan("asset-1"));
    assert_eq!(s.drive(&id).await, ExecutionStatus::Failed);

    let first_dlq = s.store.list_dlq(None).remove(0);
    s.store.requeue_dlq(&first_dlq.id).unwrap();

    // The execution is runnable again and fails the same way
    assert_eq!(
        s.store.get_execution(id.as_str()).unwrap().status,
        ExecutionStatus::Queued
    );
    assert_eq!(s.drive(&id).await, ExecutionStatus::Failed);

    // Exactly one additional terminal event after the requeue
    let terminal_rows = s
        .store
        .events_since(&id, 0)
        .into_iter()
        .filter(|e| e.to_status.as_deref() == Some("failed"))
        .count();
    assert_eq!(terminal_rows, 2);

    // Prior row marked requeued; the fresh failure parks a new row
    let dlq = s.store.list_dlq(None);
    assert_eq!(dlq.len(), 2);
    let requeued = dlq.iter().filter(|d| d.requeued).count();
    assert_eq!(requeued, 1);

    // The consumed row cannot be requeued twice
    assert!(s.store.requeue_dlq(&first_dlq.id).is_err());
}

#[tokio::test(start_paused = true)]
async fn requeue_after_fix_completes_the_execution() {
    let s = spec();
    s.adapter.script(
        "asset-1",
        ScriptedOutcome::Fail {
            verdict: AdapterVerdict::Permanent,
        },
    );

    let id = s.submit(probe_plan("asset-1"));
    assert_eq!(s.drive(&id).await, ExecutionStatus::Failed);

    let dlq_id = s.store.list_dlq(None).remove(0).id;
    s.store.requeue_dlq(&dlq_id).unwrap();

    // The underlying fault is fixed (default outcome succeeds): the
    // requeued run reaches exactly one more terminal, COMPLETED.
    assert_eq!(s.drive(&id).await, ExecutionStatus::Completed);
    let completed_rows = s
        .store
        .events_since(&id, 0)
        .into_iter()
        .filter(|e| e.to_status.as_deref() == Some("completed"))
        .count();
    assert_eq!(completed_rows, 1);
}
