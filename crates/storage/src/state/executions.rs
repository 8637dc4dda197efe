// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution event handlers.

use super::{audit_row, idempotency_key, step_id_for, MaterializedState};
use cdr_core::{
    AuditKind, AuditRecord, Event, ExecutionStatus, Step, StepStatus, TimeoutPolicy,
};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::ExecutionCreated { execution } => {
            // Idempotency: skip if the execution already exists
            if state.executions.contains_key(execution.id.as_str()) {
                return None;
            }

            // Derive step rows from the frozen plan
            for (index, plan_step) in execution.plan.steps.iter().enumerate() {
                let policy = TimeoutPolicy::lookup(execution.sla_class, plan_step.action_class);
                let step_id = step_id_for(&execution.id, index);
                state.steps.insert(
                    step_id.as_str().to_string(),
                    Step {
                        id: step_id,
                        execution_id: execution.id.clone(),
                        index: index as u32,
                        asset_id: plan_step.asset_id.clone(),
                        action: plan_step.action.clone(),
                        action_class: plan_step.action_class,
                        adapter: plan_step.adapter,
                        secret_refs: plan_step.secret_refs.clone(),
                        parallel_group: plan_step.parallel_group,
                        status: StepStatus::Pending,
                        attempt: 0,
                        max_attempts: policy.max_attempts,
                        started_at_ms: None,
                        finished_at_ms: None,
                        result: None,
                        error: None,
                    },
                );
            }

            if let Some(key) = &execution.idempotency_key {
                state.idempotency.insert(
                    idempotency_key(&execution.tenant_id, key),
                    execution.id.as_str().to_string(),
                );
            }

            state
                .executions
                .insert(execution.id.as_str().to_string(), execution.clone());

            let mut row = audit_row(
                execution.id.clone(),
                None,
                AuditKind::StateChange,
                execution.created_at_ms,
            );
            row.to_status = Some(execution.status.to_string());
            row.actor_id = Some(execution.actor_id.clone());
            Some(state.push_audit(row))
        }

        Event::ExecutionTransitioned {
            id,
            from,
            to,
            reason,
            actor_id,
            epoch_ms,
        } => {
            let execution = state.executions.get_mut(id.as_str())?;
            // Idempotency: only apply when the precondition still holds
            if execution.status != *from {
                return None;
            }
            execution.status = *to;
            match to {
                ExecutionStatus::Queued => execution.queued_at_ms = Some(*epoch_ms),
                ExecutionStatus::Running => {
                    if execution.started_at_ms.is_none() {
                        execution.started_at_ms = Some(*epoch_ms);
                    }
                }
                _ if to.is_terminal() => execution.finished_at_ms = Some(*epoch_ms),
                _ => {}
            }

            let kind = match to {
                ExecutionStatus::Timeout => AuditKind::Timeout,
                ExecutionStatus::Cancelled => AuditKind::Cancel,
                _ => AuditKind::StateChange,
            };
            let mut row = audit_row(id.clone(), None, kind, *epoch_ms);
            row.from_status = Some(from.to_string());
            row.to_status = Some(to.to_string());
            row.actor_id = actor_id.clone();
            if let Some(reason) = reason {
                row.payload = serde_json::json!({ "reason": reason });
            }
            Some(state.push_audit(row))
        }

        Event::ExecutionProgress {
            id,
            step_index,
            step_status,
            succeeded,
            failed,
            total,
            eta_ms,
            epoch_ms,
        } => {
            if !state.executions.contains_key(id.as_str()) {
                return None;
            }
            let mut row = audit_row(id.clone(), None, AuditKind::Progress, *epoch_ms);
            row.payload = serde_json::json!({
                "step_index": step_index,
                "step_status": step_status,
                "succeeded": succeeded,
                "failed": failed,
                "total": total,
                "eta_ms": eta_ms,
            });
            Some(state.push_audit(row))
        }

        Event::CancelRequested {
            id,
            reason,
            actor_id,
            epoch_ms,
        } => {
            if !state.executions.contains_key(id.as_str()) {
                return None;
            }
            let mut row = audit_row(id.clone(), None, AuditKind::Cancel, *epoch_ms);
            row.actor_id = actor_id.clone();
            row.payload = serde_json::json!({ "reason": reason });
            Some(state.push_audit(row))
        }

        Event::ExecutionPruned { id } => {
            if let Some(execution) = state.executions.remove(id.as_str()) {
                for index in 0..execution.step_count as usize {
                    state.steps.remove(step_id_for(id, index).as_str());
                }
                if let Some(key) = &execution.idempotency_key {
                    state
                        .idempotency
                        .remove(&idempotency_key(&execution.tenant_id, key));
                }
                state.audit.remove(id.as_str());
                state
                    .approvals
                    .retain(|_, approval| approval.execution_id != *id);
            }
            None
        }

        _ => None,
    }
}
