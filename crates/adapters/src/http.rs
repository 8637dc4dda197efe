// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP clients for the Asset and Automation execution services.
//!
//! Deadline propagation: the transport timeout is the remaining
//! deadline minus a small jitter, so the remote side times out before
//! we do. Only transport-level transients are retried here (bounded,
//! exponential backoff with jitter); business failures are surfaced to
//! the engine untouched.

use crate::contract::{AdapterError, AdapterResponse, StepAdapter, StepSpec};
use cdr_core::{LogMasker, SecretValue};
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded transport retries for transient failures.
const MAX_TRANSPORT_RETRIES: u32 = 3;

const RETRY_BASE_MS: u64 = 200;

/// Shaves a small random margin off the deadline so the remote times
/// out first.
fn transport_timeout(deadline: Duration) -> Duration {
    let jitter_ms = rand::rng().random_range(50..150);
    deadline
        .checked_sub(Duration::from_millis(jitter_ms))
        .unwrap_or(Duration::from_millis(50))
}

fn transport_backoff(attempt: u32) -> Duration {
    let base = RETRY_BASE_MS.saturating_mul(1 << attempt.min(6));
    let jitter = rand::rng().random_range(0.5..1.5);
    Duration::from_millis((base as f64 * jitter) as u64)
}

/// Materialize cleartext for the request body. This is the single place
/// secret values leave their typed wrappers.
fn expose_map(secrets: &HashMap<String, SecretValue>) -> HashMap<&str, &str> {
    secrets
        .iter()
        .map(|(name, value)| (name.as_str(), value.expose()))
        .collect()
}

/// Configuration for one execution-service client.
#[derive(Debug, Clone)]
pub struct HttpStepAdapterConfig {
    /// Base URL of the service; `execute` is POSTed beneath it.
    pub base_url: String,
    /// Label used in logs and error messages ("asset" / "automation").
    pub service: &'static str,
}

/// reqwest-backed [`StepAdapter`] for either execution service.
pub struct HttpStepAdapter {
    client: reqwest::Client,
    config: HttpStepAdapterConfig,
    masker: LogMasker,
}

impl HttpStepAdapter {
    pub fn new(config: HttpStepAdapterConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            masker: LogMasker::new(),
        }
    }

    pub fn asset(base_url: impl Into<String>) -> Self {
        Self::new(HttpStepAdapterConfig {
            base_url: base_url.into(),
            service: "asset",
        })
    }

    pub fn automation(base_url: impl Into<String>) -> Self {
        Self::new(HttpStepAdapterConfig {
            base_url: base_url.into(),
            service: "automation",
        })
    }

    fn execute_url(&self) -> String {
        format!("{}/execute", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_once(
        &self,
        spec: &StepSpec,
        secrets: &HashMap<String, SecretValue>,
        timeout: Duration,
    ) -> Result<AdapterResponse, reqwest::Error> {
        let body = json!({
            "execution_id": spec.execution_id,
            "step_id": spec.step_id,
            "asset_id": spec.asset_id,
            "action": spec.action,
            "trace_id": spec.trace_id,
            "secrets": expose_map(secrets),
            "deadline_ms": timeout.as_millis() as u64,
        });

        let response = self
            .client
            .post(self.execute_url())
            .timeout(timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        response.json::<AdapterResponse>().await
    }
}

#[async_trait::async_trait]
impl StepAdapter for HttpStepAdapter {
    async fn execute(
        &self,
        spec: StepSpec,
        secrets: &HashMap<String, SecretValue>,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<AdapterResponse, AdapterError> {
        let started = std::time::Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=MAX_TRANSPORT_RETRIES {
            if cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            let remaining = deadline
                .checked_sub(started.elapsed())
                .ok_or(AdapterError::DeadlineExceeded)?;
            let timeout = transport_timeout(remaining);

            let request = self.post_once(&spec, secrets, timeout);
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                result = request => match result {
                    Ok(response) => {
                        debug!(
                            service = self.config.service,
                            step = %spec.step_id,
                            status = ?response.exit_status,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "adapter call completed",
                        );
                        return Ok(response);
                    }
                    Err(e) if e.is_timeout() => return Err(AdapterError::DeadlineExceeded),
                    // Connect/request-shape errors are transport transients;
                    // HTTP status errors are the service speaking and are not
                    // retried at this layer.
                    Err(e) if e.is_status() || e.is_decode() => {
                        return Err(AdapterError::Malformed(
                            self.masker.mask_str(&e.to_string()),
                        ));
                    }
                    Err(e) => {
                        last_error = self.masker.mask_str(&e.to_string());
                        warn!(
                            service = self.config.service,
                            step = %spec.step_id,
                            attempt,
                            error = %last_error,
                            "adapter transport error",
                        );
                    }
                },
            }

            if attempt < MAX_TRANSPORT_RETRIES {
                let backoff = transport_backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(AdapterError::Transport {
            attempts: MAX_TRANSPORT_RETRIES + 1,
            message: last_error,
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
