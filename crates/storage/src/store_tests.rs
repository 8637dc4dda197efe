// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cdr_core::test_support::{execution_with_status, probe_plan};
use cdr_core::{FakeClock, NackReason};
use std::time::Duration;
use tempfile::TempDir;

fn open_store(dir: &TempDir, clock: FakeClock) -> Store<FakeClock> {
    Store::open(dir.path(), clock).unwrap()
}

fn queued_execution(id: &str) -> Execution {
    execution_with_status(id, probe_plan("asset-1"), ExecutionStatus::Queued)
}

fn execution_with_key(id: &str, key: &str) -> Execution {
    let mut execution = queued_execution(id);
    execution.idempotency_key = Some(key.to_string());
    execution
}

#[test]
fn create_and_get_execution() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());

    let id = store.create_execution(queued_execution("exec-1")).unwrap();
    assert_eq!(id.as_str(), "exec-1");

    let fetched = store.get_execution("exec-1").unwrap();
    assert_eq!(fetched.status, ExecutionStatus::Queued);
    assert_eq!(store.steps_of(&id).len(), 1);
}

#[test]
fn duplicate_idempotency_key_hits() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());

    store
        .create_execution(execution_with_key("exec-1", "k"))
        .unwrap();
    let err = store
        .create_execution(execution_with_key("exec-2", "k"))
        .unwrap_err();

    match err {
        StoreError::IdempotentHit { execution_id } => assert_eq!(execution_id, "exec-1"),
        other => panic!("expected IdempotentHit, got {other:?}"),
    }
    assert!(store.get_execution("exec-2").is_none());
}

#[test]
fn idempotency_key_recycles_after_window() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());

    store
        .create_execution(execution_with_key("exec-1", "k"))
        .unwrap();
    store
        .transition_execution(
            &ExecutionId::new("exec-1"),
            ExecutionStatus::Queued,
            ExecutionStatus::Cancelled,
            None,
            None,
        )
        .unwrap();

    // Still within the 24h window: HIT
    clock.advance(Duration::from_secs(60));
    assert!(store
        .create_execution(execution_with_key("exec-2", "k"))
        .is_err());

    // Past the window: the key is recyclable
    clock.advance(Duration::from_secs(24 * 60 * 60));
    assert!(store
        .create_execution(execution_with_key("exec-3", "k"))
        .is_ok());
}

#[test]
fn invalid_transition_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let id = store.create_execution(queued_execution("exec-1")).unwrap();

    let err = store
        .transition_execution(
            &id,
            ExecutionStatus::Queued,
            ExecutionStatus::Completed,
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[test]
fn stale_from_precondition_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let id = store.create_execution(queued_execution("exec-1")).unwrap();

    store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
        .unwrap();

    // A racing writer with the stale precondition loses
    let err = store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Cancelled, None, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[test]
fn second_terminal_transition_fails() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let id = store.create_execution(queued_execution("exec-1")).unwrap();

    store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
        .unwrap();
    store
        .transition_execution(&id, ExecutionStatus::Running, ExecutionStatus::Completed, None, None)
        .unwrap();

    let err = store
        .transition_execution(&id, ExecutionStatus::Running, ExecutionStatus::Failed, None, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    // Exactly one terminal state-change in the audit log
    let terminal_rows = store
        .events_since(&id, 0)
        .into_iter()
        .filter(|r| r.to_status.as_deref() == Some("completed"))
        .count();
    assert_eq!(terminal_rows, 1);
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    {
        let store = open_store(&dir, clock.clone());
        let id = store.create_execution(queued_execution("exec-1")).unwrap();
        store
            .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
            .unwrap();
        store.flush().unwrap();
    }

    let store = open_store(&dir, clock);
    let execution = store.get_execution("exec-1").unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(store.events_since(&execution.id, 0).len(), 2);
}

#[test]
fn checkpoint_then_reopen_preserves_state_and_sequences() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    {
        let store = open_store(&dir, clock.clone());
        let id = store.create_execution(queued_execution("exec-1")).unwrap();
        store.checkpoint().unwrap();
        // Post-checkpoint writes land in the truncated WAL
        store
            .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
            .unwrap();
        store.flush().unwrap();
    }

    let store = open_store(&dir, clock);
    assert_eq!(
        store.get_execution("exec-1").unwrap().status,
        ExecutionStatus::Running
    );
}

// ── queue ───────────────────────────────────────────────────────────────

#[test]
fn lease_orders_by_priority_then_age() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    for (exec, priority) in [("exec-a", 200), ("exec-b", 50), ("exec-c", 100)] {
        let execution = queued_execution(exec);
        store.create_execution(execution).unwrap();
        store
            .enqueue(&ExecutionId::new(exec), None, priority, Duration::ZERO)
            .unwrap();
    }

    let grants = store.lease(2, "worker-0", Duration::from_secs(10)).unwrap();
    assert_eq!(grants.len(), 2);
    assert_eq!(grants[0].execution_id, "exec-b");
    assert_eq!(grants[1].execution_id, "exec-c");
}

#[test]
fn delayed_items_are_not_leasable_until_available() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(
            &ExecutionId::new("exec-1"),
            None,
            100,
            Duration::from_secs(30),
        )
        .unwrap();

    assert!(store
        .lease(1, "worker-0", Duration::from_secs(10))
        .unwrap()
        .is_empty());

    clock.advance(Duration::from_secs(31));
    assert_eq!(
        store.lease(1, "worker-0", Duration::from_secs(10)).unwrap().len(),
        1
    );
}

#[test]
fn renew_requires_live_matching_token() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();
    let grant = store
        .lease(1, "worker-0", Duration::from_secs(10))
        .unwrap()
        .remove(0);

    // Wrong token
    assert!(matches!(
        store.renew_lease(&grant.queue_id, "bogus", Duration::from_secs(10)),
        Err(StoreError::StaleLease)
    ));

    // Valid renewal extends the lease
    clock.advance(Duration::from_secs(3));
    let new_expiry = store
        .renew_lease(&grant.queue_id, &grant.lease_token, Duration::from_secs(10))
        .unwrap();
    assert!(new_expiry > grant.lease_expires_at_ms);

    // Expired lease cannot be renewed
    clock.advance(Duration::from_secs(60));
    assert!(matches!(
        store.renew_lease(&grant.queue_id, &grant.lease_token, Duration::from_secs(10)),
        Err(StoreError::StaleLease)
    ));
}

#[test]
fn ack_is_idempotent_but_rejects_stale_tokens() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();
    let grant = store
        .lease(1, "worker-0", Duration::from_secs(10))
        .unwrap()
        .remove(0);

    assert!(matches!(
        store.ack(&grant.queue_id, "bogus"),
        Err(StoreError::StaleLease)
    ));
    store.ack(&grant.queue_id, &grant.lease_token).unwrap();
    // Duplicate ack is accepted
    store.ack(&grant.queue_id, &grant.lease_token).unwrap();
}

#[test]
fn nack_requeues_with_delay_until_attempts_exhaust() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    // FAST plan with a READ step: max_attempts = 3
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();

    for attempt in 1..3 {
        let grant = store
            .lease(1, "worker-0", Duration::from_secs(10))
            .unwrap()
            .remove(0);
        let outcome = store
            .nack(
                &grant.queue_id,
                &grant.lease_token,
                Duration::from_secs(1),
                NackReason::WorkerException,
            )
            .unwrap();
        assert!(
            matches!(outcome, NackOutcome::Requeued { .. }),
            "attempt {attempt} should requeue"
        );
        clock.advance(Duration::from_secs(2));
    }

    // Third delivery failure exhausts the budget
    let grant = store
        .lease(1, "worker-0", Duration::from_secs(10))
        .unwrap()
        .remove(0);
    let outcome = store
        .nack(
            &grant.queue_id,
            &grant.lease_token,
            Duration::from_secs(1),
            NackReason::WorkerException,
        )
        .unwrap();
    let NackOutcome::DeadLettered { dlq_id } = outcome else {
        panic!("expected dead letter, got {outcome:?}");
    };
    assert_eq!(store.list_dlq(None).len(), 1);
    assert!(!store.list_dlq(None)[0].requeued);

    // The item is consumed; nothing leasable remains
    assert!(store
        .lease(1, "worker-0", Duration::from_secs(10))
        .unwrap()
        .is_empty());
    let _ = dlq_id;
}

#[test]
fn reaper_recovers_expired_leases() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();
    store.lease(1, "worker-0", Duration::from_secs(5)).unwrap();

    // Nothing to reap while the lease is live
    assert!(store.reap_expired_leases().unwrap().is_empty());

    clock.advance(Duration::from_secs(6));
    let reaped = store.reap_expired_leases().unwrap();
    assert_eq!(reaped.len(), 1);

    // Item is available again for another worker
    let grants = store.lease(1, "worker-1", Duration::from_secs(5)).unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].attempt_count, 1);
}

// ── locks ───────────────────────────────────────────────────────────────

fn tenant() -> TenantId {
    TenantId::new("tenant-1")
}

fn asset(id: &str) -> AssetId {
    AssetId::new(id)
}

#[test]
fn lock_exclusivity_per_asset() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());

    store
        .acquire_lock(&tenant(), &asset("a1"), "owner-1", Duration::from_secs(10))
        .unwrap();
    assert!(matches!(
        store.acquire_lock(&tenant(), &asset("a1"), "owner-2", Duration::from_secs(10)),
        Err(StoreError::LockBusy)
    ));

    // A different asset is independent
    assert!(store
        .acquire_lock(&tenant(), &asset("a2"), "owner-2", Duration::from_secs(10))
        .is_ok());
}

#[test]
fn lock_release_then_reacquire() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());

    let lock_id = store
        .acquire_lock(&tenant(), &asset("a1"), "owner-1", Duration::from_secs(10))
        .unwrap();
    store.release_lock(&lock_id, "owner-1").unwrap();
    assert!(store
        .acquire_lock(&tenant(), &asset("a1"), "owner-2", Duration::from_secs(10))
        .is_ok());
}

#[test]
fn releasing_unowned_lock_is_stale() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let lock_id = store
        .acquire_lock(&tenant(), &asset("a1"), "owner-1", Duration::from_secs(10))
        .unwrap();
    assert!(matches!(
        store.release_lock(&lock_id, "intruder"),
        Err(StoreError::StaleLock)
    ));
    assert!(matches!(
        store.release_lock("lock-missing", "owner-1"),
        Err(StoreError::StaleLock)
    ));
}

#[test]
fn admin_release_is_audited_on_the_owning_execution() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let id = store.create_execution(queued_execution("exec-1")).unwrap();

    let lock_id = store
        .acquire_lock(
            &tenant(),
            &asset("a1"),
            "exec-1/worker-0/exec-1/0",
            Duration::from_secs(10),
        )
        .unwrap();
    let before = store.events_since(&id, 0).len();

    store.release_lock_admin(&lock_id, "operator-9").unwrap();

    assert!(store.list_locks().is_empty());
    let events = store.events_since(&id, 0);
    assert_eq!(events.len(), before + 1);
    let row = events.last().unwrap();
    assert_eq!(row.kind, cdr_core::AuditKind::Audit);
    assert_eq!(row.actor_id.as_deref(), Some("operator-9"));
    assert_eq!(row.payload["lock_id"].as_str(), Some(lock_id.as_str()));
}

#[test]
fn expired_lock_is_reacquirable_and_reapable() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());

    store
        .acquire_lock(&tenant(), &asset("a1"), "owner-1", Duration::from_secs(5))
        .unwrap();
    clock.advance(Duration::from_secs(6));

    // Expired: another owner may take it
    let second = store
        .acquire_lock(&tenant(), &asset("a1"), "owner-2", Duration::from_secs(5))
        .unwrap();

    clock.advance(Duration::from_secs(20));
    let reaped = store.reap_expired_locks().unwrap();
    assert_eq!(reaped, vec![second]);
    assert!(store.list_locks().is_empty());
}

#[test]
fn heartbeat_extends_only_live_owned_locks() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    let lock_id = store
        .acquire_lock(&tenant(), &asset("a1"), "owner-1", Duration::from_secs(6))
        .unwrap();

    clock.advance(Duration::from_secs(2));
    let expiry = store.heartbeat_lock(&lock_id, "owner-1").unwrap();
    assert_eq!(expiry, clock.epoch_ms() + 6_000);

    assert!(matches!(
        store.heartbeat_lock(&lock_id, "intruder"),
        Err(StoreError::StaleLock)
    ));

    clock.advance(Duration::from_secs(60));
    assert!(matches!(
        store.heartbeat_lock(&lock_id, "owner-1"),
        Err(StoreError::StaleLock)
    ));
}

// ── dlq ─────────────────────────────────────────────────────────────────

/// Lease and nack until the item dead-letters; returns the DLQ id.
fn drive_to_dlq(store: &Store<FakeClock>) -> String {
    loop {
        let grant = store.lease(1, "w", Duration::from_secs(5)).unwrap().remove(0);
        match store
            .nack(
                &grant.queue_id,
                &grant.lease_token,
                Duration::ZERO,
                NackReason::WorkerException,
            )
            .unwrap()
        {
            NackOutcome::DeadLettered { dlq_id } => return dlq_id,
            NackOutcome::Requeued { .. } => {}
        }
    }
}

#[test]
fn requeue_dlq_reopens_terminal_execution() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let id = store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
        .unwrap();
    store
        .transition_execution(&id, ExecutionStatus::Running, ExecutionStatus::Failed, None, None)
        .unwrap();
    store.enqueue(&id, None, 100, Duration::ZERO).unwrap();
    drive_to_dlq(&store);

    let dlq = store.list_dlq(None);
    assert_eq!(dlq.len(), 1);

    let queue_id = store.requeue_dlq(&dlq[0].id).unwrap();
    assert!(!queue_id.is_empty());

    // Execution is runnable again and the DLQ row is marked, not deleted
    assert_eq!(
        store.get_execution("exec-1").unwrap().status,
        ExecutionStatus::Queued
    );
    let dlq = store.list_dlq(None);
    assert_eq!(dlq.len(), 1);
    assert!(dlq[0].requeued);

    // A second requeue of the same row is refused
    assert!(matches!(
        store.requeue_dlq(&dlq[0].id),
        Err(StoreError::AlreadyRequeued(_))
    ));
}

#[test]
fn list_dlq_filters_by_tenant() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, FakeClock::new());
    let mut execution = queued_execution("exec-1");
    execution.tenant_id = TenantId::new("tenant-a");
    store.create_execution(execution).unwrap();

    // Drive into DLQ via repeated nacks
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();
    drive_to_dlq(&store);

    assert_eq!(store.list_dlq(Some(&TenantId::new("tenant-a"))).len(), 1);
    assert!(store.list_dlq(Some(&TenantId::new("tenant-b"))).is_empty());
}

// ── retention ───────────────────────────────────────────────────────────

#[test]
fn prune_drops_old_completed_queue_rows() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let store = open_store(&dir, clock.clone());
    store.create_execution(queued_execution("exec-1")).unwrap();
    store
        .enqueue(&ExecutionId::new("exec-1"), None, 100, Duration::ZERO)
        .unwrap();
    let grant = store.lease(1, "w", Duration::from_secs(5)).unwrap().remove(0);
    store.ack(&grant.queue_id, &grant.lease_token).unwrap();

    assert_eq!(store.prune().unwrap(), 0);

    clock.advance(Duration::from_secs(25 * 60 * 60));
    assert_eq!(store.prune().unwrap(), 1);
    assert!(store.with_state(|s| s.queue.is_empty()));
}
