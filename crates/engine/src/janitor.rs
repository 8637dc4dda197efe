// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background maintenance: lease and lock reapers, approval expiry,
//! retention pruning.
//!
//! One periodic sweep covers everything; each concern is individually
//! cheap and idempotent, so cadence is a single knob.

use cdr_core::{Clock, ExecutionStatus};
use cdr_storage::Store;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Janitor<C: Clock> {
    store: Arc<Store<C>>,
    interval: std::time::Duration,
}

impl<C: Clock> Janitor<C> {
    pub fn new(store: Arc<Store<C>>, interval: std::time::Duration) -> Self {
        Self { store, interval }
    }

    /// Run sweeps until the token trips.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("janitor stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.sweep();
        }
    }

    /// One pass over every maintenance concern.
    pub fn sweep(&self) {
        match self.store.reap_expired_leases() {
            Ok(reaped) if !reaped.is_empty() => {
                info!(count = reaped.len(), "reaped expired queue leases");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lease reaper failed"),
        }

        match self.store.reap_expired_locks() {
            Ok(reaped) if !reaped.is_empty() => {
                info!(count = reaped.len(), "reaped stale asset locks");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lock reaper failed"),
        }

        match self.store.expire_approvals() {
            Ok(expired) => {
                for execution_id in expired {
                    // The gate lapsed; the parked execution is rejected
                    if let Err(e) = self.store.transition_execution(
                        &execution_id,
                        ExecutionStatus::PendingApproval,
                        ExecutionStatus::Rejected,
                        Some("approval expired".to_string()),
                        None,
                    ) {
                        warn!(execution = %execution_id, error = %e, "expiry transition failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "approval expiry failed"),
        }

        match self.store.prune() {
            Ok(pruned) if pruned > 0 => info!(count = pruned, "pruned retired rows"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "retention pruning failed"),
        }
    }
}

#[cfg(test)]
#[path = "janitor_tests.rs"]
mod tests;
