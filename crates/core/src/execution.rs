// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution records and the execution state machine.

use crate::approval::ApprovalLevel;
use crate::error::StepError;
use crate::id::TenantId;
use crate::plan::PlanSnapshot;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one logical attempt to run a plan.
    pub struct ExecutionId("exec-");
}

/// Latency envelope a plan opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaClass {
    Fast,
    Medium,
    Long,
}

impl std::fmt::Display for SlaClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlaClass::Fast => write!(f, "fast"),
            SlaClass::Medium => write!(f, "medium"),
            SlaClass::Long => write!(f, "long"),
        }
    }
}

/// Dispatch path chosen at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Immediate,
    Background,
}

/// Status of an execution through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    PendingApproval,
    Approved,
    Queued,
    Running,
    Completed,
    Failed,
    Partial,
    Timeout,
    Cancelled,
    Rejected,
}

impl ExecutionStatus {
    /// Terminal states admit no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Partial
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Rejected
        )
    }

    /// Whether the execution state machine allows the `from -> to` edge.
    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (from, to),
            (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Cancelled)
                | (Approved, Queued)
                | (Approved, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Timeout)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Partial)
                | (Running, Cancelled)
                | (Running, Timeout)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::PendingApproval => "pending_approval",
            ExecutionStatus::Approved => "approved",
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// One logical attempt to run a plan against remote assets.
///
/// Created by the dispatcher; mutated only through store transitions,
/// each of which is recorded as a state-change audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub tenant_id: TenantId,
    pub actor_id: String,
    pub trace_id: String,
    /// Frozen plan at submit time.
    pub plan: PlanSnapshot,
    /// Content hash of the snapshot, checked again at approval time.
    pub plan_hash: String,
    pub mode: Mode,
    pub sla_class: SlaClass,
    pub status: ExecutionStatus,
    pub approval_level: ApprovalLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub partial_allowed: bool,
    /// Lower is more urgent.
    pub priority: i32,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    /// Absolute execution deadline, set when the run starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at_ms: Option<u64>,
    /// Times this execution has been leased from the queue.
    pub attempt_count: u32,
    pub step_count: u32,
    pub step_succeeded: u32,
    pub step_failed: u32,
    /// First failing step's classified error, for `get()` summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<StepError>,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
