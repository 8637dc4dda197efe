//! Scenario: submissions sharing a tenant-scoped idempotency key
//! collapse onto one execution.

use crate::prelude::*;
use cdr_core::test_support::probe_plan;
use cdr_core::{SubmitOptions, TenantId};

fn keyed(key: &str) -> SubmitOptions {
    SubmitOptions {
        idempotency_key: Some(key.to_string()),
        ..SubmitOptions::default()
    }
}

#[tokio::test]
async fn duplicate_submissions_return_the_same_execution() {
    let s = spec();

    let first = s
        .dispatcher
        .submit(probe_plan("asset-1"), "actor-1", &tenant(), keyed("k"))
        .unwrap();
    let second = s
        .dispatcher
        .submit(probe_plan("asset-1"), "actor-1", &tenant(), keyed("k"))
        .unwrap();

    assert_eq!(first.execution_id, second.execution_id);
    assert!(second.deduplicated);

    // Exactly one execution exists and exactly one creation record
    assert_eq!(s.store.with_state(|state| state.executions.len()), 1);
    let creation_rows = s
        .store
        .events_since(&first.execution_id, 0)
        .into_iter()
        .filter(|e| e.from_status.is_none() && e.to_status.is_some())
        .count();
    assert_eq!(creation_rows, 1);
}

#[tokio::test]
async fn concurrent_submissions_converge_on_one_execution() {
    let s = spec();
    let dispatcher = &s.dispatcher;

    // Interleave many submissions; the store lock serializes them and
    // every caller gets the same id back.
    let mut ids = Vec::new();
    for _ in 0..16 {
        let receipt = dispatcher
            .submit(probe_plan("asset-1"), "actor-1", &tenant(), keyed("shared"))
            .unwrap();
        ids.push(receipt.execution_id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(s.store.with_state(|state| state.executions.len()), 1);
}

#[tokio::test]
async fn keys_are_tenant_scoped() {
    let s = spec();

    let a = s
        .dispatcher
        .submit(probe_plan("asset-1"), "actor-1", &tenant(), keyed("k"))
        .unwrap();
    let b = s
        .dispatcher
        .submit(
            probe_plan("asset-1"),
            "actor-1",
            &TenantId::new("tenant-2"),
            keyed("k"),
        )
        .unwrap();

    assert_ne!(a.execution_id, b.execution_id);
}
