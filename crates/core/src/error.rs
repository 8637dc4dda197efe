// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy shared across the engine.
//!
//! Every failure that reaches a step record, a DLQ entry or a caller is
//! classified with an [`ErrorKind`]. The kind alone decides retry
//! behavior; messages are informational and always masked before they
//! are persisted.

use serde::{Deserialize, Serialize};

/// Classification of every failure the engine can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // -- user errors: rejected at the front door, never retried --
    InvalidPlan,
    NotAuthorized,
    IdempotentHit,
    ApprovalExpired,
    PlanHashMismatch,

    // -- step-permanent: fail the step, no retry --
    AuthDenied,
    SecretNotFound,
    SecretForbidden,
    Permanent,

    // -- step-transient: retry per policy --
    Transient,
    AssetBusy,
    SecretStoreUnavailable,
    StoreConflict,

    // -- timeouts --
    StepTimeout,
    ExecutionTimeout,
    LeaseExpired,

    // -- operational: surfaced, never masked away --
    StoreUnavailable,
    Shutdown,
    WorkerException,
}

impl ErrorKind {
    /// Whether a step failure of this kind may be retried by policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transient
                | ErrorKind::AssetBusy
                | ErrorKind::SecretStoreUnavailable
                | ErrorKind::StoreConflict
                | ErrorKind::LeaseExpired
                | ErrorKind::WorkerException
                | ErrorKind::Shutdown
        )
    }

    /// Whether this kind is a caller mistake (surfaced at submit/approve time).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidPlan
                | ErrorKind::NotAuthorized
                | ErrorKind::IdempotentHit
                | ErrorKind::ApprovalExpired
                | ErrorKind::PlanHashMismatch
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::StepTimeout | ErrorKind::ExecutionTimeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidPlan => "invalid_plan",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::IdempotentHit => "idempotent_hit",
            ErrorKind::ApprovalExpired => "approval_expired",
            ErrorKind::PlanHashMismatch => "plan_hash_mismatch",
            ErrorKind::AuthDenied => "auth_denied",
            ErrorKind::SecretNotFound => "secret_not_found",
            ErrorKind::SecretForbidden => "secret_forbidden",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Transient => "transient",
            ErrorKind::AssetBusy => "asset_busy",
            ErrorKind::SecretStoreUnavailable => "secret_store_unavailable",
            ErrorKind::StoreConflict => "store_conflict",
            ErrorKind::StepTimeout => "step_timeout",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::LeaseExpired => "lease_expired",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Shutdown => "shutdown",
            ErrorKind::WorkerException => "worker_exception",
        };
        write!(f, "{s}")
    }
}

/// A classified step failure with a masked, human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
