// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan snapshots and submit options.

use crate::approval::ApprovalLevel;
use crate::execution::SlaClass;
use crate::id::AssetId;
use crate::secret::SecretRef;
use crate::step::ActionClass;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Which egress service executes a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Direct remote access (SSH/WinRM/RDP).
    #[default]
    Asset,
    /// Playbook-style higher-level actions.
    Automation,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Asset => write!(f, "asset"),
            AdapterKind::Automation => write!(f, "automation"),
        }
    }
}

/// One planned action against one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub asset_id: AssetId,
    /// Opaque action description passed through to the adapter.
    pub action: Value,
    pub action_class: ActionClass,
    #[serde(default)]
    pub adapter: AdapterKind,
    #[serde(default)]
    pub secret_refs: Vec<SecretRef>,
    /// Steps sharing a group may run concurrently on distinct assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<u32>,
}

/// The frozen plan as submitted. Immutable for the life of the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub description: String,
    pub steps: Vec<PlanStep>,
    pub sla_class: SlaClass,
    /// Planner's duration estimate, used for immediate/background routing.
    #[serde(default)]
    pub expected_duration_ms: u64,
    /// Whether a mixed success/failure outcome may terminate as PARTIAL.
    #[serde(default)]
    pub partial_allowed: bool,
}

impl PlanSnapshot {
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// The highest-risk action class present in the plan.
    pub fn max_action_class(&self) -> Option<ActionClass> {
        self.steps.iter().map(|s| s.action_class).max()
    }
}

/// SHA-256 over the canonical JSON encoding of a snapshot.
///
/// Computed at submit and re-checked at approval time to detect tampering.
pub fn plan_hash(plan: &PlanSnapshot) -> String {
    let encoded = serde_json::to_vec(plan).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Caller options accepted at submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub approval_level: ApprovalLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_allowed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_override: Option<SlaClass>,
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
