// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret references and resolved secret handles.
//!
//! A [`SecretRef`] is an opaque pointer into the external secret store
//! and is safe to persist. A [`SecretValue`] holds resolved cleartext
//! and can never reach a sink accidentally: `Debug`, `Display` and
//! serde all emit the mask token instead of the value.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Reference to a secret in the external store. Never a value.
    pub struct SecretRef;
}

/// Resolved secret cleartext, scoped to a single step.
///
/// The cleartext is only reachable through [`SecretValue::expose`],
/// which adapter clients call at the transport boundary.
#[derive(Clone)]
pub struct SecretValue {
    reference: SecretRef,
    kind: String,
    value: SecretString,
}

impl SecretValue {
    pub fn new(reference: SecretRef, kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            reference,
            kind: kind.into(),
            value: SecretString::from(value.into()),
        }
    }

    pub fn reference(&self) -> &SecretRef {
        &self.reference
    }

    /// The mask token emitted anywhere this value is stringified.
    pub fn mask_token(&self) -> String {
        format!("\u{ab}REDACTED:{}\u{bb}", self.kind)
    }

    /// Access the cleartext. Callers are responsible for keeping it
    /// inside the step's execution context.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mask_token())
    }
}

impl std::fmt::Display for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mask_token())
    }
}

impl Serialize for SecretValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.mask_token())
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: serde::Deserializer<'de>>(_deserializer: D) -> Result<Self, D::Error> {
        // Masked output is not round-trippable. A persisted SecretValue
        // is a bug upstream; refuse rather than fabricate cleartext.
        Err(serde::de::Error::custom("secret values cannot be deserialized"))
    }
}

#[cfg(test)]
#[path = "secret_tests.rs"]
mod tests;
