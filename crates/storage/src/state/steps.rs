// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step event handlers.

use super::{audit_row, MaterializedState};
use cdr_core::{AuditKind, AuditRecord, Event, StepStatus};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::StepTransitioned {
            execution_id,
            step_id,
            from,
            to,
            attempt,
            result,
            error,
            epoch_ms,
        } => {
            let step = state.steps.get_mut(step_id.as_str())?;
            // Idempotency: only apply when the precondition still holds.
            // The re-entrant Running -> Running edge is a plain no-op.
            if step.status != *from || (step.status == *to && *from == *to) {
                return None;
            }

            step.status = *to;
            step.attempt = *attempt;
            match to {
                StepStatus::Running => {
                    if step.started_at_ms.is_none() {
                        step.started_at_ms = Some(*epoch_ms);
                    }
                }
                _ if to.is_terminal() => {
                    step.finished_at_ms = Some(*epoch_ms);
                    if result.is_some() {
                        step.result = result.clone();
                    }
                    if error.is_some() {
                        step.error = error.clone();
                    }
                }
                _ => {}
            }

            // Parent aggregate counters track current step statuses
            let step_error = error.clone();
            if let Some(execution) = state.executions.get_mut(execution_id.as_str()) {
                match to {
                    StepStatus::Succeeded => execution.step_succeeded += 1,
                    StepStatus::Failed | StepStatus::Timeout => {
                        execution.step_failed += 1;
                        if execution.first_error.is_none() {
                            execution.first_error = step_error;
                        }
                    }
                    _ => {}
                }
            }

            let kind = match to {
                StepStatus::Timeout => AuditKind::Timeout,
                StepStatus::Cancelled => AuditKind::Cancel,
                _ => AuditKind::StateChange,
            };
            let mut row = audit_row(execution_id.clone(), Some(step_id.clone()), kind, *epoch_ms);
            row.from_status = Some(from.to_string());
            row.to_status = Some(to.to_string());
            if let Some(err) = error {
                row.payload = serde_json::json!({
                    "kind": err.kind,
                    "message": err.message,
                    "attempt": attempt,
                });
            }
            Some(state.push_audit(row))
        }

        Event::StepRetryScheduled {
            execution_id,
            step_id,
            attempt,
            delay_ms,
            epoch_ms,
        } => {
            let step = state.steps.get_mut(step_id.as_str())?;
            // Idempotency: a retry only re-arms a failed step
            if step.status != StepStatus::Failed {
                return None;
            }
            step.status = StepStatus::Pending;
            if let Some(execution) = state.executions.get_mut(execution_id.as_str()) {
                execution.step_failed = execution.step_failed.saturating_sub(1);
            }

            let mut row = audit_row(
                execution_id.clone(),
                Some(step_id.clone()),
                AuditKind::Retry,
                *epoch_ms,
            );
            row.payload = serde_json::json!({
                "attempt": attempt,
                "delay_ms": delay_ms,
            });
            Some(state.push_audit(row))
        }

        _ => None,
    }
}
