// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gates for risky plans.

use crate::execution::ExecutionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

crate::define_id! {
    /// Unique identifier for an approval gate.
    pub struct ApprovalId("appr-");
}

/// How much human review a plan requires before it may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    /// No gate; the execution is enqueued immediately.
    #[default]
    None,
    /// One-click confirm.
    Confirm,
    /// Full plan review.
    PlanReview,
    /// Step-by-step acknowledgement.
    StepByStep,
}

impl ApprovalLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(ApprovalLevel::None),
            1 => Some(ApprovalLevel::Confirm),
            2 => Some(ApprovalLevel::PlanReview),
            3 => Some(ApprovalLevel::StepByStep),
            _ => None,
        }
    }

    /// How long a pending gate stays actionable. Windows differ per level.
    pub fn expiry_window(&self) -> Option<Duration> {
        match self {
            ApprovalLevel::None => None,
            ApprovalLevel::Confirm => Some(Duration::from_secs(5 * 60)),
            ApprovalLevel::PlanReview => Some(Duration::from_secs(15 * 60)),
            ApprovalLevel::StepByStep => Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// State of an approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A pending or resolved gate in front of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub execution_id: ExecutionId,
    pub level: ApprovalLevel,
    /// Hash of the plan as it stood when the gate was requested. An act
    /// call presenting a different hash is rejected.
    pub plan_hash_at_request: String,
    pub state: ApprovalState,
    pub requested_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acted_at_ms: Option<u64>,
}

impl Approval {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.state == ApprovalState::Pending
            && self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

#[cfg(test)]
#[path = "approval_tests.rs"]
mod tests;
