//! Scenario: a worker dies mid-step; the lease expires, another worker
//! leases the item and resumes the execution without a second terminal.

use crate::prelude::*;
use cdr_core::test_support::{plan_of, probe_plan};
use cdr_core::{ActionClass, ExecutionStatus, SlaClass, StepStatus};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn lease_expiry_hands_the_execution_to_another_worker() {
    let s = spec();
    let id = s.submit(probe_plan("asset-1"));

    // Worker one: claims the run and commits the step RUNNING
    // transition, then is killed before the adapter returns.
    let grant = s
        .store
        .lease(1, "worker-crashed", s.config.lease_ttl)
        .unwrap()
        .remove(0);
    s.store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
        .unwrap();
    let step = s.store.steps_of(&id).remove(0);
    s.store
        .transition_step(&step.id, StepStatus::Pending, StepStatus::Running, 1, None, None)
        .unwrap();
    drop(grant);

    // The lease lapses; the reaper makes the item available again
    s.clock.advance(s.config.lease_ttl + Duration::from_secs(1));
    assert_eq!(s.store.reap_expired_leases().unwrap().len(), 1);

    // Worker two: drives to completion; the step result was never
    // committed, so the step is re-run.
    let status = s.drive(&id).await;
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(s.adapter.calls_for("asset-1"), 1);

    // The re-entrant claim does not duplicate the RUNNING transition
    let events = s.store.events_since(&id, 0);
    let step_running_rows = events
        .iter()
        .filter(|e| e.step_id.is_some() && e.to_status.as_deref() == Some("running"))
        .count();
    assert_eq!(step_running_rows, 1);

    // And exactly one terminal
    let terminal_rows = events
        .iter()
        .filter(|e| e.to_status.as_deref() == Some("completed"))
        .count();
    assert_eq!(terminal_rows, 1);
}

#[tokio::test(start_paused = true)]
async fn completed_steps_are_not_rerun_after_resume() {
    let s = spec();
    let id = s.submit(plan_of(
        &[("a1", ActionClass::Read), ("a2", ActionClass::Read)],
        SlaClass::Medium,
    ));

    // Worker one runs the first step to success, then dies.
    let _grant = s
        .store
        .lease(1, "worker-crashed", s.config.lease_ttl)
        .unwrap()
        .remove(0);
    s.store
        .transition_execution(&id, ExecutionStatus::Queued, ExecutionStatus::Running, None, None)
        .unwrap();
    let steps = s.store.steps_of(&id);
    s.store
        .transition_step(&steps[0].id, StepStatus::Pending, StepStatus::Running, 1, None, None)
        .unwrap();
    s.store
        .transition_step(
            &steps[0].id,
            StepStatus::Running,
            StepStatus::Succeeded,
            1,
            Some(cdr_core::StepResult::empty()),
            None,
        )
        .unwrap();

    s.clock.advance(s.config.lease_ttl + Duration::from_secs(1));
    s.store.reap_expired_leases().unwrap();

    let status = s.drive(&id).await;
    assert_eq!(status, ExecutionStatus::Completed);

    // Only the second step's adapter was invoked by the resume
    assert_eq!(s.adapter.calls_for("a1"), 0);
    assert_eq!(s.adapter.calls_for("a2"), 1);
}
