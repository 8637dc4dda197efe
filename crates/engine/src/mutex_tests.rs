// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cdr_core::FakeClock;
use tempfile::TempDir;

fn service(dir: &TempDir, clock: FakeClock) -> Arc<MutexService<FakeClock>> {
    let store = Arc::new(Store::open(dir.path(), clock.clone()).unwrap());
    Arc::new(MutexService::new(store, clock))
}

fn tenant() -> TenantId {
    TenantId::new("tenant-1")
}

fn assets(ids: &[&str]) -> Vec<AssetId> {
    ids.iter().map(|id| AssetId::new(*id)).collect()
}

#[tokio::test]
async fn acquire_single_asset() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, FakeClock::new());

    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-1",
            Duration::from_secs(10),
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let AcquireOutcome::Acquired(handles) = outcome else {
        panic!("expected acquisition");
    };
    assert_eq!(handles.len(), 1);
}

#[tokio::test]
async fn multi_asset_acquisition_is_ordered_and_deduplicated() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let service = service(&dir, clock.clone());

    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["b", "a", "b"]),
            "owner-1",
            Duration::from_secs(10),
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let AcquireOutcome::Acquired(handles) = outcome else {
        panic!("expected acquisition");
    };
    assert_eq!(handles.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn contended_asset_reports_busy_after_wait_budget() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, FakeClock::new());

    let first = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-1",
            Duration::from_secs(30),
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(first, AcquireOutcome::Acquired(_)));

    let second = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-2",
            Duration::from_secs(30),
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(second, AcquireOutcome::Busy));
}

#[tokio::test(start_paused = true)]
async fn partial_acquisition_releases_held_locks_on_busy() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, FakeClock::new());

    // Owner-1 holds a2 only
    let blocker = service
        .acquire_all(
            &tenant(),
            &assets(&["a2"]),
            "owner-1",
            Duration::from_secs(30),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(blocker, AcquireOutcome::Acquired(_)));

    // Owner-2 wants a1 + a2; a1 succeeds, a2 is busy, a1 must be freed
    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["a1", "a2"]),
            "owner-2",
            Duration::from_secs(30),
            Duration::from_millis(400),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::Busy));

    // a1 is acquirable again immediately
    let retry = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-3",
            Duration::from_secs(30),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(retry, AcquireOutcome::Acquired(_)));
}

#[tokio::test]
async fn cancellation_aborts_the_wait() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, FakeClock::new());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-1",
            Duration::from_secs(30),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::Cancelled));
}

#[tokio::test]
async fn heartbeat_refreshes_held_locks() {
    let dir = TempDir::new().unwrap();
    let clock = FakeClock::new();
    let service = service(&dir, clock.clone());

    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-1",
            Duration::from_secs(6),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let AcquireOutcome::Acquired(handles) = outcome else {
        panic!("expected acquisition");
    };

    clock.advance(Duration::from_secs(2));
    service.heartbeat(&handles).unwrap();

    // Without the heartbeat the lock would expire at +6s
    clock.advance(Duration::from_secs(5));
    assert!(service.heartbeat(&handles).is_ok());
}

#[tokio::test]
async fn release_is_stale_tolerant() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir, FakeClock::new());

    let outcome = service
        .acquire_all(
            &tenant(),
            &assets(&["a1"]),
            "owner-1",
            Duration::from_secs(6),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let AcquireOutcome::Acquired(handles) = outcome else {
        panic!("expected acquisition");
    };

    service.release_all(&handles);
    // Releasing again must not blow up
    service.release_all(&handles);
}
