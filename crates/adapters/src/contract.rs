// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire contract shared by the Asset and Automation adapters.
//!
//! Both services present the same `execute` shape; only the base URL
//! and the kind of action differ. Secret values cross this boundary as
//! cleartext in the request body and nowhere else; logged summaries are
//! masked upstream.

use cdr_core::{AdapterVerdict, AssetId, ExecutionId, SecretValue, StepId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from adapter transport and deadline handling.
///
/// Business-level failures are not errors here; they come back inside
/// [`AdapterResponse::error_kind`] and the engine decides retry policy.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled")]
    Cancelled,
    #[error("adapter returned malformed response: {0}")]
    Malformed(String),
}

/// One step handed to an adapter for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    pub asset_id: AssetId,
    /// Opaque action description the adapter understands.
    pub action: Value,
    pub trace_id: String,
}

/// Whether the adapter considers the step to have succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Ok,
    Fail,
}

/// Adapter result for one step invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub exit_status: ExitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Structured step output; capped and masked before persistence.
    #[serde(default)]
    pub artifacts: Value,
    /// Already-masked log lines from the adapter side.
    #[serde(default)]
    pub masked_logs: Vec<String>,
    #[serde(default = "default_verdict")]
    pub error_kind: AdapterVerdict,
}

fn default_verdict() -> AdapterVerdict {
    AdapterVerdict::None
}

impl AdapterResponse {
    pub fn ok(artifacts: Value) -> Self {
        Self {
            exit_status: ExitStatus::Ok,
            exit_code: Some(0),
            artifacts,
            masked_logs: Vec::new(),
            error_kind: AdapterVerdict::None,
        }
    }

    pub fn fail(verdict: AdapterVerdict, exit_code: Option<i32>) -> Self {
        Self {
            exit_status: ExitStatus::Fail,
            exit_code,
            artifacts: Value::Null,
            masked_logs: Vec::new(),
            error_kind: verdict,
        }
    }
}

/// Typed client for one execution service.
#[async_trait::async_trait]
pub trait StepAdapter: Send + Sync {
    /// Execute a step, aborting on cancellation or when the remaining
    /// deadline elapses. `secrets` maps placeholder names to resolved
    /// values; the transport serializes the cleartext, nothing else may.
    async fn execute(
        &self,
        spec: StepSpec,
        secrets: &HashMap<String, SecretValue>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<AdapterResponse, AdapterError>;
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
