// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.
//!
//! State is derived from events; events are facts about what happened.
//! Every apply handler is idempotent so the same WAL prefix can be
//! replayed on top of a snapshot without double-counting.

mod approvals;
mod dlq;
mod executions;
mod locks;
mod queue;
mod steps;

use cdr_core::{
    AssetId, AuditKind, AuditRecord, ErrorKind, Event, Execution, ExecutionId, Step, StepId,
    TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Audit rows are kept at least this long (90 days).
pub const RETENTION_AUDIT_MS: u64 = 90 * 24 * 60 * 60 * 1000;

/// Completed queue rows are pruned after this long (24 hours).
pub const RETENTION_COMPLETED_QUEUE_MS: u64 = 24 * 60 * 60 * 1000;

/// Status of a queue item through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Available,
    Leased,
    Completed,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueItemStatus::Available => write!(f, "available"),
            QueueItemStatus::Leased => write!(f, "leased"),
            QueueItemStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A unit of work leased by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub execution_id: ExecutionId,
    /// Set for step-by-step approval resumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// Lower is more urgent.
    pub priority: i32,
    pub status: QueueItemStatus,
    pub enqueued_at_ms: u64,
    pub available_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at_ms: Option<u64>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
}

impl QueueItem {
    pub fn lease_expired(&self, now_ms: u64) -> bool {
        self.status == QueueItemStatus::Leased
            && self.lease_expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Exclusive mutex row for one (tenant, asset) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLock {
    pub id: String,
    pub tenant_id: TenantId,
    pub asset_id: AssetId,
    /// `execution/worker/step` composite identifying the holder.
    pub owner_tag: String,
    pub ttl_ms: u64,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
    pub last_heartbeat_at_ms: u64,
}

impl AssetLock {
    /// A lock is live iff it has not expired and its heartbeat is fresh
    /// within two TTLs.
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
            && self.last_heartbeat_at_ms + self.ttl_ms.saturating_mul(2) > now_ms
    }
}

/// Poisoned work parked after retries were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqItem {
    pub id: String,
    pub execution_id: ExecutionId,
    pub kind: ErrorKind,
    /// Masked message from the last failure.
    pub message: String,
    pub attempt_count: u32,
    pub failed_at_ms: u64,
    #[serde(default)]
    pub requeued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeued_at_ms: Option<u64>,
}

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub executions: HashMap<String, Execution>,
    /// Step rows keyed by step id (`<execution_id>/<index>`).
    pub steps: HashMap<String, Step>,
    pub approvals: HashMap<String, cdr_core::Approval>,
    pub queue: HashMap<String, QueueItem>,
    pub locks: HashMap<String, AssetLock>,
    pub dlq: HashMap<String, DlqItem>,
    /// `(tenant, idempotency_key)` → execution id.
    #[serde(default)]
    pub idempotency: HashMap<String, String>,
    /// Append-only audit log per execution, ordered by sequence.
    #[serde(default)]
    pub audit: HashMap<String, Vec<AuditRecord>>,
}

/// Composite key for the idempotency index.
pub(crate) fn idempotency_key(tenant: &TenantId, key: &str) -> String {
    format!("{}\u{1f}{}", tenant, key)
}

/// Deterministic step id derivation, stable across replay.
pub(crate) fn step_id_for(execution_id: &ExecutionId, index: usize) -> StepId {
    StepId::new(format!("{}/{}", execution_id, index))
}

impl MaterializedState {
    /// Get an execution by ID or unique prefix (like git commit hashes)
    pub fn get_execution(&self, id: &str) -> Option<&Execution> {
        if let Some(execution) = self.executions.get(id) {
            return Some(execution);
        }

        let matches: Vec<_> = self
            .executions
            .iter()
            .filter(|(k, _)| k.starts_with(id))
            .collect();

        // Only return if exactly one match (unambiguous)
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// Ordered steps of an execution.
    pub fn steps_of(&self, execution_id: &ExecutionId) -> Vec<&Step> {
        let Some(execution) = self.executions.get(execution_id.as_str()) else {
            return Vec::new();
        };
        (0..execution.step_count as usize)
            .filter_map(|i| self.steps.get(step_id_for(execution_id, i).as_str()))
            .collect()
    }

    /// A live (non-expired, heartbeat-fresh) lock for the given pair.
    pub fn live_lock(&self, tenant: &TenantId, asset: &AssetId, now_ms: u64) -> Option<&AssetLock> {
        self.locks
            .values()
            .find(|l| &l.tenant_id == tenant && &l.asset_id == asset && l.is_live(now_ms))
    }

    /// Audit rows for an execution strictly after `sequence`.
    pub fn audit_since(&self, execution_id: &ExecutionId, sequence: u64) -> Vec<AuditRecord> {
        self.audit
            .get(execution_id.as_str())
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.sequence > sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply an event to derive state changes.
    ///
    /// Returns the audit row the event produced, if any. Application is
    /// idempotent: replaying an already-applied event is a no-op.
    pub fn apply_event(&mut self, event: &Event) -> Option<AuditRecord> {
        match event {
            Event::ExecutionCreated { .. }
            | Event::ExecutionTransitioned { .. }
            | Event::ExecutionProgress { .. }
            | Event::CancelRequested { .. }
            | Event::ExecutionPruned { .. } => executions::apply(self, event),

            Event::StepTransitioned { .. } | Event::StepRetryScheduled { .. } => {
                steps::apply(self, event)
            }

            Event::ApprovalRequested { .. }
            | Event::ApprovalActed { .. }
            | Event::ApprovalExpired { .. } => approvals::apply(self, event),

            Event::QueuePushed { .. }
            | Event::QueueLeased { .. }
            | Event::QueueLeaseRenewed { .. }
            | Event::QueueAcked { .. }
            | Event::QueueNacked { .. }
            | Event::QueuePruned { .. } => queue::apply(self, event),

            Event::DlqAdded { .. } | Event::DlqRequeued { .. } | Event::DlqPurged { .. } => {
                dlq::apply(self, event)
            }

            Event::LockAcquired { .. }
            | Event::LockHeartbeat { .. }
            | Event::LockReleased { .. } => locks::apply(self, event),

            Event::WorkerHeartbeat {
                worker_id,
                execution_id,
                epoch_ms,
            } => execution_id.as_ref().map(|id| {
                let mut row = audit_row(id.clone(), None, AuditKind::Heartbeat, *epoch_ms);
                row.payload = serde_json::json!({ "worker_id": worker_id });
                self.push_audit(row)
            }),

            Event::RbacDecision {
                execution_id,
                step_id,
                actor_id,
                asset_id,
                allowed,
                reason,
                epoch_ms,
            } => {
                let mut row = audit_row(
                    execution_id.clone(),
                    Some(step_id.clone()),
                    AuditKind::Audit,
                    *epoch_ms,
                );
                row.actor_id = Some(actor_id.clone());
                row.payload = serde_json::json!({
                    "asset_id": asset_id,
                    "allowed": allowed,
                    "reason": reason,
                });
                Some(self.push_audit(row))
            }
        }
    }

    /// Append an audit row, assigning the next per-execution sequence.
    pub(crate) fn push_audit(&mut self, mut record: AuditRecord) -> AuditRecord {
        let rows = self
            .audit
            .entry(record.execution_id.as_str().to_string())
            .or_default();
        record.sequence = rows.last().map(|r| r.sequence).unwrap_or(0) + 1;
        rows.push(record.clone());
        record
    }
}

/// Audit row template; handlers fill statuses, actor and payload.
pub(crate) fn audit_row(
    execution_id: ExecutionId,
    step_id: Option<StepId>,
    kind: AuditKind,
    epoch_ms: u64,
) -> AuditRecord {
    AuditRecord {
        sequence: 0,
        execution_id,
        step_id,
        kind,
        from_status: None,
        to_status: None,
        actor_id: None,
        payload: Value::Null,
        epoch_ms,
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
