// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret store client: just-in-time resolution of secret references.
//!
//! Resolutions are audited on the store side; the request therefore
//! carries the actor, execution and step performing the access.

use cdr_core::{ExecutionId, SecretRef, SecretValue, StepId};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Default per-resolution timeout.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures resolving a secret reference.
#[derive(Debug, Error)]
pub enum SecretResolveError {
    /// The reference does not exist. Permanent.
    #[error("secret not found: {0}")]
    NotFound(String),
    /// The actor may not read this secret. Permanent.
    #[error("secret access forbidden: {0}")]
    Forbidden(String),
    /// The store could not be reached. Transient.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Typed client for the external secret store.
#[async_trait::async_trait]
pub trait SecretStoreAdapter: Send + Sync {
    /// Resolve one reference to cleartext for the duration of a step.
    async fn resolve(
        &self,
        secret_ref: &SecretRef,
        actor_id: &str,
        execution_id: &ExecutionId,
        step_id: &StepId,
    ) -> Result<SecretValue, SecretResolveError>;
}

#[derive(Deserialize)]
struct ResolveResponse {
    value: String,
    #[serde(default)]
    kind: Option<String>,
}

/// HTTP implementation of [`SecretStoreAdapter`].
pub struct HttpSecretStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSecretStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn resolve_url(&self) -> String {
        format!("{}/resolve", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl SecretStoreAdapter for HttpSecretStore {
    async fn resolve(
        &self,
        secret_ref: &SecretRef,
        actor_id: &str,
        execution_id: &ExecutionId,
        step_id: &StepId,
    ) -> Result<SecretValue, SecretResolveError> {
        let body = json!({
            "secret_ref": secret_ref,
            "actor_id": actor_id,
            "execution_id": execution_id,
            "step_id": step_id,
        });

        let response = self
            .client
            .post(self.resolve_url())
            .timeout(RESOLVE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| SecretResolveError::Unavailable(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => {
                return Err(SecretResolveError::NotFound(secret_ref.as_str().to_string()))
            }
            reqwest::StatusCode::FORBIDDEN => {
                return Err(SecretResolveError::Forbidden(secret_ref.as_str().to_string()))
            }
            status if !status.is_success() => {
                return Err(SecretResolveError::Unavailable(format!(
                    "secret store returned {status}"
                )))
            }
            _ => {}
        }

        let resolved: ResolveResponse = response
            .json()
            .await
            .map_err(|e| SecretResolveError::Unavailable(e.to_string()))?;

        Ok(SecretValue::new(
            secret_ref.clone(),
            resolved.kind.unwrap_or_else(|| "secret".to_string()),
            resolved.value,
        ))
    }
}
