// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine's front door: submission, approval gating, cancellation
//! and read access.

use crate::cancel::CancellationRegistry;
use crate::config::{EngineConfig, PRIORITY_BACKGROUND, PRIORITY_IMMEDIATE};
use crate::error::EngineError;
use crate::idempotency::{IdempotencyGuard, Registration};
use crate::rbac::{CachingRbacValidator, RbacDecision};
use cdr_core::{
    plan_hash, Approval, ApprovalId, ApprovalLevel, ApprovalState, AuditRecord, Clock, Execution,
    ExecutionId, ExecutionStatus, IdGen, Mode, PlanSnapshot, SlaClass, Step, SubmitOptions,
    TenantId, UuidIdGen,
};
use cdr_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Decision passed to [`Dispatcher::approve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveDecision {
    Approve,
    Reject,
}

/// What a submit call returns.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub mode: Mode,
    /// True when an idempotency key collapsed this submission onto an
    /// existing execution.
    pub deduplicated: bool,
}

/// Read model for `get()`.
#[derive(Debug, Clone)]
pub struct ExecutionView {
    pub execution: Execution,
    pub steps: Vec<Step>,
}

pub struct Dispatcher<C: Clock, I: IdGen = UuidIdGen> {
    store: Arc<Store<C>>,
    guard: IdempotencyGuard<C>,
    registry: Arc<CancellationRegistry>,
    rbac: Arc<CachingRbacValidator<C>>,
    config: EngineConfig,
    ids: I,
    clock: C,
}

impl<C: Clock, I: IdGen> Dispatcher<C, I> {
    pub fn new(
        store: Arc<Store<C>>,
        registry: Arc<CancellationRegistry>,
        rbac: Arc<CachingRbacValidator<C>>,
        config: EngineConfig,
        ids: I,
        clock: C,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&store)),
            store,
            registry,
            rbac,
            config,
            ids,
            clock,
        }
    }

    /// Submit a plan for execution.
    pub fn submit(
        &self,
        plan: PlanSnapshot,
        actor_id: &str,
        tenant_id: &TenantId,
        options: SubmitOptions,
    ) -> Result<SubmitReceipt, EngineError> {
        validate_plan(&plan)?;

        let sla_class = options.sla_override.unwrap_or(plan.sla_class);
        let partial_allowed = options.partial_allowed.unwrap_or(plan.partial_allowed);
        let approval_level = options.approval_level;
        let mode = self.classify(&plan, sla_class);
        let priority = options.priority.unwrap_or(match mode {
            Mode::Immediate => PRIORITY_IMMEDIATE,
            Mode::Background => PRIORITY_BACKGROUND,
        });

        let hash = plan_hash(&plan);
        let now_ms = self.clock.epoch_ms();
        let status = if approval_level == ApprovalLevel::None {
            ExecutionStatus::Approved
        } else {
            ExecutionStatus::PendingApproval
        };

        let execution = Execution {
            id: ExecutionId::generate(&self.ids),
            tenant_id: tenant_id.clone(),
            actor_id: actor_id.to_string(),
            trace_id: format!("trace-{}", self.ids.next()),
            step_count: plan.step_count(),
            plan_hash: hash.clone(),
            plan,
            mode,
            sla_class,
            status,
            approval_level,
            idempotency_key: options.idempotency_key,
            partial_allowed,
            priority,
            created_at_ms: now_ms,
            queued_at_ms: None,
            started_at_ms: None,
            finished_at_ms: None,
            timeout_at_ms: None,
            attempt_count: 0,
            step_succeeded: 0,
            step_failed: 0,
            first_error: None,
        };
        let execution_id = execution.id.clone();

        match self.guard.register(execution)? {
            Registration::Existing(existing) => {
                let status = self
                    .store
                    .get_execution(existing.as_str())
                    .map(|e| e.status)
                    .unwrap_or(ExecutionStatus::Queued);
                info!(execution = %existing, "submission deduplicated onto existing execution");
                return Ok(SubmitReceipt {
                    execution_id: existing,
                    status,
                    mode,
                    deduplicated: true,
                });
            }
            Registration::Fresh(_) => {}
        }

        if approval_level == ApprovalLevel::None {
            self.enqueue(&execution_id, priority)?;
            return Ok(SubmitReceipt {
                execution_id,
                status: ExecutionStatus::Queued,
                mode,
                deduplicated: false,
            });
        }

        // Park behind a human gate
        let approval = Approval {
            id: ApprovalId::generate(&self.ids),
            execution_id: execution_id.clone(),
            level: approval_level,
            plan_hash_at_request: hash,
            state: ApprovalState::Pending,
            requested_at_ms: now_ms,
            expires_at_ms: approval_level
                .expiry_window()
                .map(|w| now_ms + w.as_millis() as u64),
            acted_by: None,
            acted_at_ms: None,
        };
        self.store.request_approval(approval)?;
        info!(execution = %execution_id, level = ?approval_level, "approval requested");

        Ok(SubmitReceipt {
            execution_id,
            status: ExecutionStatus::PendingApproval,
            mode,
            deduplicated: false,
        })
    }

    /// Act on a pending approval.
    ///
    /// Three checks gate the action: the gate must be pending and
    /// unexpired, the presented plan hash must match the execution's
    /// current plan (tamper check), and the actor must be authorized to
    /// act on every asset the plan touches.
    pub async fn approve(
        &self,
        execution_id: &ExecutionId,
        presented_plan_hash: &str,
        actor_id: &str,
        decision: ApproveDecision,
    ) -> Result<ExecutionStatus, EngineError> {
        let execution = self
            .store
            .get_execution(execution_id.as_str())
            .ok_or_else(|| EngineError::NotFound(execution_id.as_str().to_string()))?;

        let approval = self
            .store
            .pending_approval_of(execution_id)
            .ok_or_else(|| EngineError::NoPendingApproval {
                execution_id: execution_id.clone(),
            })?;

        if approval.is_expired(self.clock.epoch_ms()) {
            return Err(EngineError::ApprovalExpired {
                execution_id: execution_id.clone(),
            });
        }
        if execution.plan_hash != presented_plan_hash
            || approval.plan_hash_at_request != presented_plan_hash
        {
            return Err(EngineError::PlanHashMismatch {
                execution_id: execution_id.clone(),
            });
        }

        // An approver may only green-light actions they could perform
        // themselves: check against every (asset, action class) pair.
        for step in &execution.plan.steps {
            let checked = self
                .rbac
                .check(
                    actor_id,
                    &execution.tenant_id,
                    &step.asset_id,
                    step.action_class,
                )
                .await;
            if let RbacDecision::Denied(reason) = checked {
                return Err(EngineError::NotAuthorized(format!(
                    "approver {actor_id} denied on {}: {reason}",
                    step.asset_id
                )));
            }
        }

        match decision {
            ApproveDecision::Approve => {
                self.store
                    .act_approval(approval.id.as_str(), ApprovalState::Approved, actor_id)?;
                self.store.transition_execution(
                    execution_id,
                    ExecutionStatus::PendingApproval,
                    ExecutionStatus::Approved,
                    None,
                    Some(actor_id.to_string()),
                )?;
                self.enqueue(execution_id, execution.priority)?;
                Ok(ExecutionStatus::Queued)
            }
            ApproveDecision::Reject => {
                self.store
                    .act_approval(approval.id.as_str(), ApprovalState::Rejected, actor_id)?;
                self.store.transition_execution(
                    execution_id,
                    ExecutionStatus::PendingApproval,
                    ExecutionStatus::Rejected,
                    Some("rejected by approver".to_string()),
                    Some(actor_id.to_string()),
                )?;
                Ok(ExecutionStatus::Rejected)
            }
        }
    }

    /// Request cancellation. Terminal executions are a no-op and report
    /// their current state.
    pub fn cancel(
        &self,
        execution_id: &ExecutionId,
        actor_id: &str,
    ) -> Result<ExecutionStatus, EngineError> {
        let execution = self
            .store
            .get_execution(execution_id.as_str())
            .ok_or_else(|| EngineError::NotFound(execution_id.as_str().to_string()))?;

        if execution.is_terminal() {
            return Ok(execution.status);
        }

        self.store
            .record_cancel_requested(execution_id, "user cancel", Some(actor_id.to_string()))?;
        self.registry.cancel(execution_id);

        // Not yet picked up by a worker: cancel directly here. Running
        // executions are cancelled cooperatively by their runner.
        match execution.status {
            ExecutionStatus::PendingApproval
            | ExecutionStatus::Approved
            | ExecutionStatus::Queued => {
                self.store.transition_execution(
                    execution_id,
                    execution.status,
                    ExecutionStatus::Cancelled,
                    Some("user cancel".to_string()),
                    Some(actor_id.to_string()),
                )?;
                self.registry.remove(execution_id);
                Ok(ExecutionStatus::Cancelled)
            }
            _ => Ok(execution.status),
        }
    }

    /// Read-only view of an execution and its steps.
    pub fn get(&self, execution_id: &str) -> Result<ExecutionView, EngineError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .ok_or_else(|| EngineError::NotFound(execution_id.to_string()))?;
        let steps = self.store.steps_of(&execution.id);
        Ok(ExecutionView { execution, steps })
    }

    /// Ordered audit page strictly after `sequence`.
    pub fn events_since(
        &self,
        execution_id: &ExecutionId,
        sequence: u64,
    ) -> Result<Vec<AuditRecord>, EngineError> {
        if self.store.get_execution(execution_id.as_str()).is_none() {
            return Err(EngineError::NotFound(execution_id.as_str().to_string()));
        }
        Ok(self.store.events_since(execution_id, sequence))
    }

    fn enqueue(&self, execution_id: &ExecutionId, priority: i32) -> Result<(), EngineError> {
        self.store.transition_execution(
            execution_id,
            ExecutionStatus::Approved,
            ExecutionStatus::Queued,
            None,
            None,
        )?;
        self.store
            .enqueue(execution_id, None, priority, Duration::ZERO)?;
        Ok(())
    }

    /// IMMEDIATE iff the plan opts into FAST and its expected duration
    /// fits the immediate threshold.
    fn classify(&self, plan: &PlanSnapshot, sla_class: SlaClass) -> Mode {
        let fits = Duration::from_millis(plan.expected_duration_ms) <= self.config.immediate_threshold;
        if sla_class == SlaClass::Fast && fits {
            Mode::Immediate
        } else {
            Mode::Background
        }
    }
}

fn validate_plan(plan: &PlanSnapshot) -> Result<(), EngineError> {
    if plan.steps.is_empty() {
        return Err(EngineError::InvalidPlan("plan has no steps".to_string()));
    }
    for (index, step) in plan.steps.iter().enumerate() {
        if step.asset_id.as_str().is_empty() {
            return Err(EngineError::InvalidPlan(format!(
                "step {index} has no target asset"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
