//! Scenario: two executions target the same asset; the mutex serializes
//! them and the loser waits or retries.

use crate::prelude::*;
use cdr_core::test_support::{plan_of, probe_plan};
use cdr_core::{ActionClass, AssetId, AuditKind, ExecutionStatus, SlaClass};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn contended_asset_is_retried_until_the_lock_frees() {
    let s = spec();

    // A foreign holder pins asset a1 with a short TTL and no heartbeat;
    // it goes stale and the reaper or expiry frees it.
    s.store
        .acquire_lock(
            &tenant(),
            &AssetId::new("a1"),
            "exec-other/worker-9/step-0",
            Duration::from_secs(3),
        )
        .unwrap();

    let id = s.submit(plan_of(&[("a1", ActionClass::Read)], SlaClass::Medium));
    let status = s.drive(&id).await;

    // The first attempt failed ASSET_BUSY, a retry was scheduled, and
    // after the backoff (fake clock advanced past the foreign TTL) the
    // step acquired the lock and succeeded.
    assert_eq!(status, ExecutionStatus::Completed);
    let events = s.store.events_since(&id, 0);
    assert!(events.iter().any(|e| e.kind == AuditKind::Retry));

    let step = s.store.steps_of(&id).remove(0);
    assert!(step.attempt >= 2);
}

#[tokio::test(start_paused = true)]
async fn distinct_assets_do_not_contend() {
    let s = spec();
    let first = s.submit(probe_plan("a1"));
    let second = s.submit(probe_plan("a2"));

    assert_eq!(s.drive(&first).await, ExecutionStatus::Completed);
    assert_eq!(s.drive(&second).await, ExecutionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn no_locks_survive_a_finished_execution() {
    let s = spec();
    let id = s.submit(probe_plan("a1"));
    s.drive(&id).await;
    assert!(s.store.list_locks().is_empty());
}
