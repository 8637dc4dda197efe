// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake adapters for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use crate::contract::{AdapterError, AdapterResponse, StepAdapter, StepSpec};
use crate::secrets::{SecretResolveError, SecretStoreAdapter};
use async_trait::async_trait;
use cdr_core::{AdapterVerdict, ExecutionId, SecretRef, SecretValue, StepId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted step invocation should do.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Succeed after the given simulated latency.
    Ok { latency: Duration },
    /// Succeed immediately with the given artifacts payload.
    OkWith { artifacts: serde_json::Value },
    /// Fail with the given adapter verdict.
    Fail { verdict: AdapterVerdict },
    /// Block until cancelled or the deadline elapses.
    Hang,
}

/// Recorded call to [`FakeStepAdapter`].
#[derive(Debug, Clone)]
pub struct ExecuteCall {
    pub step_id: StepId,
    pub asset_id: String,
    pub secret_names: Vec<String>,
    pub deadline: Duration,
}

struct FakeAdapterState {
    /// Per-asset scripts, consumed front to back. Assets without a
    /// script fall back to `default_outcome`.
    scripts: HashMap<String, VecDeque<ScriptedOutcome>>,
    default_outcome: ScriptedOutcome,
    calls: Vec<ExecuteCall>,
}

/// Fake execution adapter for testing.
///
/// Allows scripting per-asset outcomes and records all calls.
#[derive(Clone)]
pub struct FakeStepAdapter {
    inner: Arc<Mutex<FakeAdapterState>>,
}

impl Default for FakeStepAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStepAdapter {
    /// Create a fake adapter that succeeds instantly by default.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeAdapterState {
                scripts: HashMap::new(),
                default_outcome: ScriptedOutcome::Ok {
                    latency: Duration::ZERO,
                },
                calls: Vec::new(),
            })),
        }
    }

    /// Queue an outcome for the next call targeting `asset`.
    pub fn script(&self, asset: &str, outcome: ScriptedOutcome) {
        self.inner
            .lock()
            .scripts
            .entry(asset.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Replace the fallback outcome used when no script is queued.
    pub fn set_default(&self, outcome: ScriptedOutcome) {
        self.inner.lock().default_outcome = outcome;
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<ExecuteCall> {
        self.inner.lock().calls.clone()
    }

    /// Calls recorded against one asset.
    pub fn calls_for(&self, asset: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.asset_id == asset)
            .count()
    }

    fn next_outcome(&self, asset: &str) -> ScriptedOutcome {
        let mut inner = self.inner.lock();
        match inner.scripts.get_mut(asset).and_then(|q| q.pop_front()) {
            Some(outcome) => outcome,
            None => inner.default_outcome.clone(),
        }
    }
}

#[async_trait]
impl StepAdapter for FakeStepAdapter {
    async fn execute(
        &self,
        spec: StepSpec,
        secrets: &HashMap<String, SecretValue>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<AdapterResponse, AdapterError> {
        {
            let mut inner = self.inner.lock();
            inner.calls.push(ExecuteCall {
                step_id: spec.step_id.clone(),
                asset_id: spec.asset_id.as_str().to_string(),
                secret_names: secrets.keys().cloned().collect(),
                deadline,
            });
        }

        match self.next_outcome(spec.asset_id.as_str()) {
            ScriptedOutcome::Ok { latency } => {
                if latency > deadline {
                    tokio::time::sleep(deadline).await;
                    return Err(AdapterError::DeadlineExceeded);
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(latency) => Ok(AdapterResponse::ok(json!({
                        "asset": spec.asset_id,
                        "stdout": "ok",
                    }))),
                }
            }
            ScriptedOutcome::OkWith { artifacts } => Ok(AdapterResponse::ok(artifacts)),
            ScriptedOutcome::Fail { verdict } => {
                Ok(AdapterResponse::fail(verdict, Some(1)))
            }
            ScriptedOutcome::Hang => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(deadline) => Err(AdapterError::DeadlineExceeded),
                }
            }
        }
    }
}

/// Fake secret store backed by an in-memory map.
#[derive(Clone, Default)]
pub struct FakeSecretStore {
    inner: Arc<Mutex<FakeSecretState>>,
}

#[derive(Default)]
struct FakeSecretState {
    values: HashMap<String, String>,
    forbidden: Vec<String>,
    unavailable: bool,
    resolutions: Vec<(String, String)>,
}

impl FakeSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: &str, value: &str) {
        self.inner
            .lock()
            .values
            .insert(reference.to_string(), value.to_string());
    }

    pub fn forbid(&self, reference: &str) {
        self.inner.lock().forbidden.push(reference.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// (actor, secret_ref) pairs, in resolution order.
    pub fn resolutions(&self) -> Vec<(String, String)> {
        self.inner.lock().resolutions.clone()
    }
}

#[async_trait]
impl SecretStoreAdapter for FakeSecretStore {
    async fn resolve(
        &self,
        secret_ref: &SecretRef,
        actor_id: &str,
        _execution_id: &ExecutionId,
        _step_id: &StepId,
    ) -> Result<SecretValue, SecretResolveError> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(SecretResolveError::Unavailable("scripted outage".to_string()));
        }
        inner
            .resolutions
            .push((actor_id.to_string(), secret_ref.as_str().to_string()));
        if inner.forbidden.iter().any(|r| r == secret_ref.as_str()) {
            return Err(SecretResolveError::Forbidden(
                secret_ref.as_str().to_string(),
            ));
        }
        match inner.values.get(secret_ref.as_str()) {
            Some(value) => Ok(SecretValue::new(secret_ref.clone(), "secret", value.clone())),
            None => Err(SecretResolveError::NotFound(
                secret_ref.as_str().to_string(),
            )),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
