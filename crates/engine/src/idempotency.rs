// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant-scoped submission deduplication.
//!
//! The store enforces the unique (tenant, idempotency_key) binding;
//! this guard translates the outcome for the dispatcher: a HIT returns
//! the existing execution untouched, a MISS registers the new one.
//! Repeated submissions are safe; concurrent submissions converge on
//! one execution because registration is atomic under the store lock.

use cdr_core::{Clock, Execution, ExecutionId};
use cdr_storage::{Store, StoreError};
use std::sync::Arc;

/// Outcome of an idempotency-guarded registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new execution was created.
    Fresh(ExecutionId),
    /// The key is already bound; the caller gets the existing id.
    Existing(ExecutionId),
}

pub struct IdempotencyGuard<C: Clock> {
    store: Arc<Store<C>>,
}

impl<C: Clock> IdempotencyGuard<C> {
    pub fn new(store: Arc<Store<C>>) -> Self {
        Self { store }
    }

    /// Register an execution, collapsing duplicates onto the existing
    /// one within the dedup window.
    pub fn register(&self, execution: Execution) -> Result<Registration, StoreError> {
        match self.store.create_execution(execution) {
            Ok(id) => Ok(Registration::Fresh(id)),
            Err(StoreError::IdempotentHit { execution_id }) => {
                Ok(Registration::Existing(execution_id))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "idempotency_tests.rs"]
mod tests;
