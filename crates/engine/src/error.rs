// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine crate.

use cdr_core::ExecutionId;
use cdr_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by the dispatcher and execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("plan hash mismatch for {execution_id}")]
    PlanHashMismatch { execution_id: ExecutionId },
    #[error("approval expired for {execution_id}")]
    ApprovalExpired { execution_id: ExecutionId },
    #[error("no pending approval for {execution_id}")]
    NoPendingApproval { execution_id: ExecutionId },
    #[error(transparent)]
    Store(#[from] StoreError),
}
