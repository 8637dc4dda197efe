//! Scenario: approval gating with plan-hash tamper detection and
//! per-level expiry.

use crate::prelude::*;
use cdr_core::test_support::probe_plan;
use cdr_core::{plan_hash, ApprovalLevel, ApprovalState, ExecutionStatus, SubmitOptions};
use cdr_engine::{ApproveDecision, EngineError, StaticOracle};
use std::time::Duration;

fn gated(level: ApprovalLevel) -> SubmitOptions {
    SubmitOptions {
        approval_level: level,
        ..SubmitOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn approved_plan_runs_to_completion() {
    let s = spec();
    let plan = probe_plan("asset-1");
    let hash = plan_hash(&plan);

    let id = s.submit_with(plan, gated(ApprovalLevel::PlanReview));
    assert_eq!(
        s.store.get_execution(id.as_str()).unwrap().status,
        ExecutionStatus::PendingApproval
    );

    let status = s
        .dispatcher
        .approve(&id, &hash, "approver-1", ApproveDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status, ExecutionStatus::Queued);

    assert_eq!(s.drive(&id).await, ExecutionStatus::Completed);

    // The gate records who acted
    let approval = s.store.with_state(|state| {
        state
            .approvals
            .values()
            .find(|a| a.execution_id == id)
            .cloned()
            .unwrap()
    });
    assert_eq!(approval.state, ApprovalState::Approved);
    assert_eq!(approval.acted_by.as_deref(), Some("approver-1"));
}

#[tokio::test]
async fn tampered_hash_is_rejected_and_execution_stays_parked() {
    let s = spec();
    let plan = probe_plan("asset-1");
    let good_hash = plan_hash(&plan);
    let id = s.submit_with(plan, gated(ApprovalLevel::PlanReview));

    let err = s
        .dispatcher
        .approve(&id, "1111deadbeef", "approver-1", ApproveDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PlanHashMismatch { .. }));
    assert_eq!(
        s.store.get_execution(id.as_str()).unwrap().status,
        ExecutionStatus::PendingApproval
    );

    // The correct hash still works afterwards
    let status = s
        .dispatcher
        .approve(&id, &good_hash, "approver-1", ApproveDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status, ExecutionStatus::Queued);
}

#[tokio::test]
async fn rejection_is_terminal() {
    let s = spec();
    let plan = probe_plan("asset-1");
    let hash = plan_hash(&plan);
    let id = s.submit_with(plan, gated(ApprovalLevel::Confirm));

    let status = s
        .dispatcher
        .approve(&id, &hash, "approver-1", ApproveDecision::Reject)
        .await
        .unwrap();
    assert_eq!(status, ExecutionStatus::Rejected);

    // Terminal: a later approve is refused
    assert!(s
        .dispatcher
        .approve(&id, &hash, "approver-1", ApproveDecision::Approve)
        .await
        .is_err());
}

#[tokio::test]
async fn approver_must_be_authorized_for_the_plans_assets() {
    let s = spec_with(Box::new(StaticOracle::new().deny("approver-x", "asset-1")));
    let plan = probe_plan("asset-1");
    let hash = plan_hash(&plan);
    let id = s.submit_with(plan, gated(ApprovalLevel::Confirm));

    let err = s
        .dispatcher
        .approve(&id, &hash, "approver-x", ApproveDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAuthorized(_)));
    assert_eq!(
        s.store.get_execution(id.as_str()).unwrap().status,
        ExecutionStatus::PendingApproval
    );
}

#[tokio::test]
async fn gates_expire_on_their_level_window() {
    let s = spec();
    let plan = probe_plan("asset-1");
    let hash = plan_hash(&plan);
    let id = s.submit_with(plan, gated(ApprovalLevel::Confirm));

    // Confirm gates lapse after 5 minutes
    s.clock.advance(Duration::from_secs(301));
    let err = s
        .dispatcher
        .approve(&id, &hash, "approver-1", ApproveDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ApprovalExpired { .. }));
}
