// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::approval::ApprovalLevel;
use crate::execution::{Execution, ExecutionId, ExecutionStatus, Mode, SlaClass};
use crate::id::{AssetId, TenantId};
use crate::plan::{plan_hash, PlanSnapshot, PlanStep};
use crate::step::ActionClass;
use serde_json::json;

/// Build a one-step READ plan against the given asset.
pub fn probe_plan(asset: &str) -> PlanSnapshot {
    PlanSnapshot {
        description: "probe".to_string(),
        steps: vec![plan_step(asset, ActionClass::Read)],
        sla_class: SlaClass::Fast,
        expected_duration_ms: 1_000,
        partial_allowed: false,
    }
}

/// Build a plan from explicit (asset, action class) pairs.
pub fn plan_of(steps: &[(&str, ActionClass)], sla: SlaClass) -> PlanSnapshot {
    PlanSnapshot {
        description: "test plan".to_string(),
        steps: steps
            .iter()
            .map(|(asset, class)| plan_step(asset, *class))
            .collect(),
        sla_class: sla,
        expected_duration_ms: 1_000,
        partial_allowed: false,
    }
}

pub fn plan_step(asset: &str, class: ActionClass) -> PlanStep {
    PlanStep {
        asset_id: AssetId::new(asset),
        action: json!({"op": "probe", "target": asset}),
        action_class: class,
        adapter: Default::default(),
        secret_refs: Vec::new(),
        parallel_group: None,
    }
}

/// Build an execution record in the given status with sane defaults.
pub fn execution_with_status(id: &str, plan: PlanSnapshot, status: ExecutionStatus) -> Execution {
    let hash = plan_hash(&plan);
    let step_count = plan.step_count();
    let sla = plan.sla_class;
    Execution {
        id: ExecutionId::new(id),
        tenant_id: TenantId::new("tenant-1"),
        actor_id: "actor-1".to_string(),
        trace_id: "trace-1".to_string(),
        plan,
        plan_hash: hash,
        mode: Mode::Background,
        sla_class: sla,
        status,
        approval_level: ApprovalLevel::None,
        idempotency_key: None,
        partial_allowed: false,
        priority: 100,
        created_at_ms: 1_000_000,
        queued_at_ms: None,
        started_at_ms: None,
        finished_at_ms: None,
        timeout_at_ms: None,
        attempt_count: 0,
        step_count,
        step_succeeded: 0,
        step_failed: 0,
        first_error: None,
    }
}
