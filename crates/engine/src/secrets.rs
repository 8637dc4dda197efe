// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Just-in-time secret resolution for a single step.
//!
//! Cleartext lives only inside the returned bundle, which the runner
//! drops as soon as the step finishes. The bundle's literals feed the
//! masker so any adapter output echoing a secret is scrubbed before
//! persistence.

use cdr_adapters::{SecretResolveError, SecretStoreAdapter};
use cdr_core::{ErrorKind, SecretValue, Step, StepError};
use std::collections::HashMap;

/// Resolved secrets for one step, keyed by reference name.
#[derive(Default, Debug)]
pub struct SecretBundle {
    values: HashMap<String, SecretValue>,
}

impl SecretBundle {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &HashMap<String, SecretValue> {
        &self.values
    }

    /// Cleartext literals for masking adapter output. Only call at the
    /// masking boundary.
    pub fn literals(&self) -> Vec<String> {
        self.values.values().map(|v| v.expose().to_string()).collect()
    }
}

/// Resolve every reference a step declares.
///
/// NotFound/Forbidden are permanent step failures; an unreachable store
/// is transient and retried per policy.
pub async fn resolve_step_secrets(
    secret_store: &dyn SecretStoreAdapter,
    step: &Step,
    actor_id: &str,
) -> Result<SecretBundle, StepError> {
    let mut values = HashMap::with_capacity(step.secret_refs.len());
    for secret_ref in &step.secret_refs {
        let value = secret_store
            .resolve(secret_ref, actor_id, &step.execution_id, &step.id)
            .await
            .map_err(|e| match e {
                SecretResolveError::NotFound(r) => {
                    StepError::new(ErrorKind::SecretNotFound, format!("secret not found: {r}"))
                }
                SecretResolveError::Forbidden(r) => StepError::new(
                    ErrorKind::SecretForbidden,
                    format!("secret access forbidden: {r}"),
                ),
                SecretResolveError::Unavailable(message) => {
                    StepError::new(ErrorKind::SecretStoreUnavailable, message)
                }
            })?;
        values.insert(secret_ref.as_str().to_string(), value);
    }
    Ok(SecretBundle { values })
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
