// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step records and the per-step state machine.

use crate::error::StepError;
use crate::execution::ExecutionId;
use crate::id::AssetId;
use crate::plan::AdapterKind;
use crate::secret::SecretRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;

crate::define_id! {
    /// Unique identifier for a step within an execution.
    pub struct StepId;
}

/// Risk/cost category of a step. Drives the timeout policy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Read,
    Modify,
    Deploy,
}

impl std::fmt::Display for ActionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionClass::Read => write!(f, "read"),
            ActionClass::Modify => write!(f, "modify"),
            ActionClass::Deploy => write!(f, "deploy"),
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Whether the step state machine allows the `from -> to` edge.
    ///
    /// `Running -> Running` is permitted so a resumed worker can re-claim
    /// a step whose previous RUNNING transition was committed before a
    /// crash.
    pub fn can_transition(from: StepStatus, to: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Timeout => "timeout",
            StepStatus::Cancelled => "cancelled",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// How the adapter classified its own outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterVerdict {
    None,
    Transient,
    Permanent,
    Timeout,
    Auth,
}

/// Upper bound on persisted artifact bytes per step.
pub const ARTIFACT_LIMIT_BYTES: usize = 10 * 1024;

/// Cap artifacts at [`ARTIFACT_LIMIT_BYTES`].
///
/// Oversize payloads are replaced by a marker object carrying a preview
/// and the original byte length, so nothing grows silently.
pub fn cap_artifacts(artifacts: Value) -> Value {
    let encoded = artifacts.to_string();
    if encoded.len() <= ARTIFACT_LIMIT_BYTES {
        return artifacts;
    }

    let mut end = ARTIFACT_LIMIT_BYTES.min(encoded.len());
    while !encoded.is_char_boundary(end) {
        end -= 1;
    }

    serde_json::json!({
        "truncated": true,
        "original_bytes": encoded.len(),
        "preview": &encoded[..end],
    })
}

/// Result recorded when a step reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Masked, size-capped step output.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub artifacts: Value,
    /// Milliseconds spent waiting on the asset mutex before the step ran.
    #[serde(default)]
    pub lock_wait_ms: u64,
}

impl StepResult {
    pub fn empty() -> Self {
        Self {
            exit_code: None,
            artifacts: Value::Null,
            lock_wait_ms: 0,
        }
    }
}

/// One action against one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub execution_id: ExecutionId,
    /// 0-based position in the plan.
    pub index: u32,
    pub asset_id: AssetId,
    /// Opaque action description the adapter understands.
    pub action: Value,
    pub action_class: ActionClass,
    #[serde(default)]
    pub adapter: AdapterKind,
    /// References only; values are resolved just-in-time per attempt.
    #[serde(default)]
    pub secret_refs: Vec<SecretRef>,
    /// Steps sharing a group run concurrently (distinct assets enforced
    /// by the mutex discipline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<u32>,
    pub status: StepStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt is allowed after a retryable failure.
    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
