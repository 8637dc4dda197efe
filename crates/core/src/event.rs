// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types for the Conductor engine.
//!
//! Every durable state change is an [`Event`] appended to the WAL and
//! applied to the materialized state. Serializes with
//! `{"type": "entity:verb", ...fields}` format. All timestamps are
//! carried in the event payload so replay is deterministic.

use crate::approval::{Approval, ApprovalId, ApprovalState};
use crate::error::{ErrorKind, StepError};
use crate::execution::{Execution, ExecutionId, ExecutionStatus};
use crate::id::{AssetId, TenantId};
use crate::step::{StepId, StepResult, StepStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a leased queue item was returned to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NackReason {
    StepRetry,
    LeaseExpired,
    WorkerException,
    Shutdown,
}

impl std::fmt::Display for NackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NackReason::StepRetry => write!(f, "step_retry"),
            NackReason::LeaseExpired => write!(f, "lease_expired"),
            NackReason::WorkerException => write!(f, "worker_exception"),
            NackReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Events that drive state transitions in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- execution --
    #[serde(rename = "exec:created")]
    ExecutionCreated { execution: Execution },

    #[serde(rename = "exec:transitioned")]
    ExecutionTransitioned {
        id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        epoch_ms: u64,
    },

    #[serde(rename = "exec:progress")]
    ExecutionProgress {
        id: ExecutionId,
        step_index: u32,
        step_status: StepStatus,
        succeeded: u32,
        failed: u32,
        total: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_ms: Option<u64>,
        epoch_ms: u64,
    },

    #[serde(rename = "exec:cancel_requested")]
    CancelRequested {
        id: ExecutionId,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        epoch_ms: u64,
    },

    #[serde(rename = "exec:pruned")]
    ExecutionPruned { id: ExecutionId },

    // -- step --
    #[serde(rename = "step:transitioned")]
    StepTransitioned {
        execution_id: ExecutionId,
        step_id: StepId,
        from: StepStatus,
        to: StepStatus,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<StepResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<StepError>,
        epoch_ms: u64,
    },

    #[serde(rename = "step:retry")]
    StepRetryScheduled {
        execution_id: ExecutionId,
        step_id: StepId,
        attempt: u32,
        delay_ms: u64,
        epoch_ms: u64,
    },

    // -- approval --
    #[serde(rename = "approval:requested")]
    ApprovalRequested { approval: Approval },

    #[serde(rename = "approval:acted")]
    ApprovalActed {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        decision: ApprovalState,
        actor_id: String,
        epoch_ms: u64,
    },

    #[serde(rename = "approval:expired")]
    ApprovalExpired {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        epoch_ms: u64,
    },

    // -- work queue --
    #[serde(rename = "queue:pushed")]
    QueuePushed {
        queue_id: String,
        execution_id: ExecutionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
        priority: i32,
        available_at_ms: u64,
        epoch_ms: u64,
    },

    #[serde(rename = "queue:leased")]
    QueueLeased {
        queue_id: String,
        worker_id: String,
        lease_token: String,
        lease_expires_at_ms: u64,
        epoch_ms: u64,
    },

    #[serde(rename = "queue:renewed")]
    QueueLeaseRenewed {
        queue_id: String,
        lease_expires_at_ms: u64,
        epoch_ms: u64,
    },

    #[serde(rename = "queue:acked")]
    QueueAcked { queue_id: String, epoch_ms: u64 },

    #[serde(rename = "queue:nacked")]
    QueueNacked {
        queue_id: String,
        attempt_count: u32,
        available_at_ms: u64,
        reason: NackReason,
        epoch_ms: u64,
    },

    #[serde(rename = "queue:pruned")]
    QueuePruned { queue_id: String },

    // -- dead letters --
    #[serde(rename = "dlq:added")]
    DlqAdded {
        dlq_id: String,
        execution_id: ExecutionId,
        kind: ErrorKind,
        message: String,
        attempt_count: u32,
        epoch_ms: u64,
    },

    #[serde(rename = "dlq:requeued")]
    DlqRequeued {
        dlq_id: String,
        queue_id: String,
        epoch_ms: u64,
    },

    #[serde(rename = "dlq:purged")]
    DlqPurged { dlq_id: String },

    // -- asset locks --
    #[serde(rename = "lock:acquired")]
    LockAcquired {
        lock_id: String,
        tenant_id: TenantId,
        asset_id: AssetId,
        owner_tag: String,
        ttl_ms: u64,
        expires_at_ms: u64,
        epoch_ms: u64,
    },

    #[serde(rename = "lock:heartbeat")]
    LockHeartbeat {
        lock_id: String,
        expires_at_ms: u64,
        epoch_ms: u64,
    },

    #[serde(rename = "lock:released")]
    LockReleased {
        lock_id: String,
        /// True when the janitor reaped a stale lock rather than the
        /// owner releasing it.
        #[serde(default)]
        reaped: bool,
        /// Set when an operator forced the release.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor_id: Option<String>,
        epoch_ms: u64,
    },

    // -- observability --
    #[serde(rename = "engine:heartbeat")]
    WorkerHeartbeat {
        worker_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<ExecutionId>,
        epoch_ms: u64,
    },

    #[serde(rename = "rbac:decision")]
    RbacDecision {
        execution_id: ExecutionId,
        step_id: StepId,
        actor_id: String,
        asset_id: AssetId,
        allowed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        epoch_ms: u64,
    },
}

impl Event {
    /// The execution this event belongs to, when it has one.
    pub fn execution_id(&self) -> Option<&ExecutionId> {
        match self {
            Event::ExecutionCreated { execution } => Some(&execution.id),
            Event::ExecutionTransitioned { id, .. }
            | Event::ExecutionProgress { id, .. }
            | Event::CancelRequested { id, .. }
            | Event::ExecutionPruned { id } => Some(id),
            Event::StepTransitioned { execution_id, .. }
            | Event::StepRetryScheduled { execution_id, .. }
            | Event::DlqAdded { execution_id, .. }
            | Event::RbacDecision { execution_id, .. } => Some(execution_id),
            Event::ApprovalRequested { approval } => Some(&approval.execution_id),
            Event::ApprovalActed { execution_id, .. }
            | Event::ApprovalExpired { execution_id, .. } => Some(execution_id),
            Event::WorkerHeartbeat { execution_id, .. } => execution_id.as_ref(),
            _ => None,
        }
    }

    /// Short name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ExecutionCreated { .. } => "exec:created",
            Event::ExecutionTransitioned { .. } => "exec:transitioned",
            Event::ExecutionProgress { .. } => "exec:progress",
            Event::CancelRequested { .. } => "exec:cancel_requested",
            Event::ExecutionPruned { .. } => "exec:pruned",
            Event::StepTransitioned { .. } => "step:transitioned",
            Event::StepRetryScheduled { .. } => "step:retry",
            Event::ApprovalRequested { .. } => "approval:requested",
            Event::ApprovalActed { .. } => "approval:acted",
            Event::ApprovalExpired { .. } => "approval:expired",
            Event::QueuePushed { .. } => "queue:pushed",
            Event::QueueLeased { .. } => "queue:leased",
            Event::QueueLeaseRenewed { .. } => "queue:renewed",
            Event::QueueAcked { .. } => "queue:acked",
            Event::QueueNacked { .. } => "queue:nacked",
            Event::QueuePruned { .. } => "queue:pruned",
            Event::DlqAdded { .. } => "dlq:added",
            Event::DlqRequeued { .. } => "dlq:requeued",
            Event::DlqPurged { .. } => "dlq:purged",
            Event::LockAcquired { .. } => "lock:acquired",
            Event::LockHeartbeat { .. } => "lock:heartbeat",
            Event::LockReleased { .. } => "lock:released",
            Event::WorkerHeartbeat { .. } => "engine:heartbeat",
            Event::RbacDecision { .. } => "rbac:decision",
        }
    }
}

/// Kind tag on an audit record, per the audit contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    StateChange,
    Progress,
    ApprovalRequested,
    ApprovalActed,
    Retry,
    Timeout,
    Cancel,
    Dlq,
    Heartbeat,
    Audit,
}

/// Append-only audit row derived from engine events.
///
/// Sequence numbers are monotonically increasing per execution and are
/// assigned by the store at apply time. Rows are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Masked payload; free-form per kind.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub epoch_ms: u64,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
