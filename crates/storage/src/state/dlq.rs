// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-letter queue event handlers.

use super::{audit_row, step_id_for, DlqItem, MaterializedState};
use cdr_core::{AuditKind, AuditRecord, Event, StepStatus};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::DlqAdded {
            dlq_id,
            execution_id,
            kind,
            message,
            attempt_count,
            epoch_ms,
        } => {
            // Idempotency: skip if entry already exists
            if state.dlq.contains_key(dlq_id) {
                return None;
            }
            state.dlq.insert(
                dlq_id.clone(),
                DlqItem {
                    id: dlq_id.clone(),
                    execution_id: execution_id.clone(),
                    kind: *kind,
                    message: message.clone(),
                    attempt_count: *attempt_count,
                    failed_at_ms: *epoch_ms,
                    requeued: false,
                    requeued_at_ms: None,
                },
            );

            let mut row = audit_row(execution_id.clone(), None, AuditKind::Dlq, *epoch_ms);
            row.payload = serde_json::json!({
                "dlq_id": dlq_id,
                "kind": kind,
                "message": message,
                "attempt_count": attempt_count,
            });
            Some(state.push_audit(row))
        }

        Event::DlqRequeued {
            dlq_id, epoch_ms, ..
        } => {
            let item = state.dlq.get_mut(dlq_id)?;
            if item.requeued {
                return None;
            }
            item.requeued = true;
            item.requeued_at_ms = Some(*epoch_ms);

            // Re-arm the execution's failed work: every non-succeeded step
            // goes back to pending with a fresh attempt budget.
            let execution_id = item.execution_id.clone();
            if let Some(execution) = state.executions.get_mut(execution_id.as_str()) {
                execution.step_failed = 0;
                execution.first_error = None;
                execution.finished_at_ms = None;
                execution.timeout_at_ms = None;
                for index in 0..execution.step_count as usize {
                    if let Some(step) = state.steps.get_mut(step_id_for(&execution_id, index).as_str())
                    {
                        if step.status != StepStatus::Succeeded {
                            step.status = StepStatus::Pending;
                            step.attempt = 0;
                            step.finished_at_ms = None;
                            step.error = None;
                        }
                    }
                }
            }
            None
        }

        Event::DlqPurged { dlq_id } => {
            state.dlq.remove(dlq_id);
            None
        }

        _ => None,
    }
}
