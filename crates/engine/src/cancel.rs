// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative cancellation registry.
//!
//! One token per execution, reachable by every step runner. Workers
//! poll at suspension points; adapter calls take a child handle and
//! abort on trip. Cancellation is cooperative, so a step may take up to
//! its step timeout to notice in the worst case.

use cdr_core::ExecutionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-execution cancellation tokens.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<ExecutionId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token for an execution, created on first use.
    pub fn token(&self, execution_id: &ExecutionId) -> CancellationToken {
        self.tokens
            .lock()
            .entry(execution_id.clone())
            .or_default()
            .clone()
    }

    /// Trip the execution's token. Idempotent.
    pub fn cancel(&self, execution_id: &ExecutionId) {
        self.token(execution_id).cancel();
    }

    pub fn is_cancelled(&self, execution_id: &ExecutionId) -> bool {
        self.tokens
            .lock()
            .get(execution_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    /// Drop the token once the execution is terminal.
    pub fn remove(&self, execution_id: &ExecutionId) {
        self.tokens.lock().remove(execution_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
