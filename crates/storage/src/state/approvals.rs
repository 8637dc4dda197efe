// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gate event handlers.

use super::{audit_row, MaterializedState};
use cdr_core::{ApprovalState, AuditKind, AuditRecord, Event};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::ApprovalRequested { approval } => {
            // Idempotency: skip if the gate already exists
            if state.approvals.contains_key(approval.id.as_str()) {
                return None;
            }
            state
                .approvals
                .insert(approval.id.as_str().to_string(), approval.clone());

            let mut row = audit_row(
                approval.execution_id.clone(),
                None,
                AuditKind::ApprovalRequested,
                approval.requested_at_ms,
            );
            row.payload = serde_json::json!({
                "approval_id": approval.id,
                "level": approval.level,
                "plan_hash": approval.plan_hash_at_request,
                "expires_at_ms": approval.expires_at_ms,
            });
            Some(state.push_audit(row))
        }

        Event::ApprovalActed {
            approval_id,
            execution_id,
            decision,
            actor_id,
            epoch_ms,
        } => {
            let approval = state.approvals.get_mut(approval_id.as_str())?;
            if approval.state != ApprovalState::Pending {
                return None;
            }
            approval.state = *decision;
            approval.acted_by = Some(actor_id.clone());
            approval.acted_at_ms = Some(*epoch_ms);

            let mut row = audit_row(
                execution_id.clone(),
                None,
                AuditKind::ApprovalActed,
                *epoch_ms,
            );
            row.actor_id = Some(actor_id.clone());
            row.payload = serde_json::json!({
                "approval_id": approval_id,
                "decision": decision,
            });
            Some(state.push_audit(row))
        }

        Event::ApprovalExpired {
            approval_id,
            execution_id,
            epoch_ms,
        } => {
            let approval = state.approvals.get_mut(approval_id.as_str())?;
            if approval.state != ApprovalState::Pending {
                return None;
            }
            approval.state = ApprovalState::Expired;

            let mut row = audit_row(
                execution_id.clone(),
                None,
                AuditKind::ApprovalActed,
                *epoch_ms,
            );
            row.payload = serde_json::json!({
                "approval_id": approval_id,
                "decision": ApprovalState::Expired,
            });
            Some(state.push_audit(row))
        }

        _ => None,
    }
}
