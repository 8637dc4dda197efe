// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-asset exclusive lock service.
//!
//! Lease-based: a lock is live while its expiry and heartbeat are
//! fresh; expiry is the only non-explicit release. Steps that need
//! multiple assets acquire in ascending (tenant, asset) order; a step
//! that cannot collect the full set within the bounded wait releases
//! what it holds and fails ASSET_BUSY.

use cdr_core::{AssetId, Clock, TenantId};
use cdr_storage::{Store, StoreError};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Heartbeat cadence as a divisor of the lock TTL.
const HEARTBEAT_DIVISOR: u32 = 3;

/// A held lock; release it explicitly or let the TTL lapse.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub lock_id: String,
    pub owner_tag: String,
    pub ttl: Duration,
    /// How long acquisition waited on contention.
    pub wait_ms: u64,
}

/// Outcome of a bounded acquisition attempt.
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(Vec<LockHandle>),
    /// The wait budget lapsed with another owner still holding a lock.
    Busy,
    /// Cancellation tripped while waiting.
    Cancelled,
}

pub struct MutexService<C: Clock> {
    store: Arc<Store<C>>,
    clock: C,
}

impl<C: Clock> MutexService<C> {
    pub fn new(store: Arc<Store<C>>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Acquire locks for every asset, in ascending order, waiting up to
    /// `wait_max` overall. On failure every acquired lock is released.
    pub async fn acquire_all(
        &self,
        tenant_id: &TenantId,
        assets: &[AssetId],
        owner_tag: &str,
        ttl: Duration,
        wait_max: Duration,
        cancel: &CancellationToken,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut ordered: Vec<AssetId> = assets.to_vec();
        ordered.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ordered.dedup();

        // Handles live outside the waiting future so a lapsed budget
        // can still release whatever was already acquired.
        let held: Arc<parking_lot::Mutex<Vec<LockHandle>>> =
            Arc::new(parking_lot::Mutex::new(Vec::with_capacity(ordered.len())));

        let acquired_at = self.clock.epoch_ms();
        let attempt_all = {
            let held = Arc::clone(&held);
            async move {
                for asset in &ordered {
                    loop {
                        if cancel.is_cancelled() {
                            return Ok(AcquireOutcome::Cancelled);
                        }
                        match self.store.acquire_lock(tenant_id, asset, owner_tag, ttl) {
                            Ok(lock_id) => {
                                held.lock().push(LockHandle {
                                    lock_id,
                                    owner_tag: owner_tag.to_string(),
                                    ttl,
                                    wait_ms: self.clock.epoch_ms().saturating_sub(acquired_at),
                                });
                                break;
                            }
                            Err(StoreError::LockBusy) => {
                                let pause =
                                    Duration::from_millis(rand::rng().random_range(100..300));
                                tokio::select! {
                                    _ = cancel.cancelled() => {
                                        return Ok(AcquireOutcome::Cancelled);
                                    }
                                    _ = tokio::time::sleep(pause) => {}
                                }
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                Ok(AcquireOutcome::Acquired(Vec::new()))
            }
        };

        match tokio::time::timeout(wait_max, attempt_all).await {
            Ok(Ok(AcquireOutcome::Acquired(_))) => {
                let handles = std::mem::take(&mut *held.lock());
                Ok(AcquireOutcome::Acquired(handles))
            }
            Ok(Ok(other)) => {
                self.release_all(&held.lock());
                Ok(other)
            }
            Ok(Err(e)) => {
                self.release_all(&held.lock());
                Err(e)
            }
            Err(_lapsed) => {
                debug!(owner = owner_tag, "mutex wait budget lapsed");
                self.release_all(&held.lock());
                Ok(AcquireOutcome::Busy)
            }
        }
    }

    /// Refresh held locks once. Stale results are surfaced so the
    /// caller can react to a lost lock.
    pub fn heartbeat(&self, handles: &[LockHandle]) -> Result<(), StoreError> {
        for handle in handles {
            self.store
                .heartbeat_lock(&handle.lock_id, &handle.owner_tag)?;
        }
        Ok(())
    }

    /// Spawn a background task heartbeating at TTL/3 until cancelled.
    pub fn spawn_heartbeat(
        service: Arc<Self>,
        handles: Vec<LockHandle>,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        C: 'static,
    {
        tokio::spawn(async move {
            let Some(ttl) = handles.first().map(|h| h.ttl) else {
                return;
            };
            let cadence = ttl / HEARTBEAT_DIVISOR;
            let mut missed = 0u32;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(cadence) => {}
                }
                match service.heartbeat(&handles) {
                    Ok(()) => missed = 0,
                    Err(_) => {
                        missed += 1;
                        // Three consecutive misses means the lock is as
                        // good as lost; stop flogging the store.
                        if missed >= 3 {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Release held locks; stale releases are non-fatal.
    pub fn release_all(&self, handles: &[LockHandle]) {
        for handle in handles {
            match self.store.release_lock(&handle.lock_id, &handle.owner_tag) {
                Ok(()) | Err(StoreError::StaleLock) => {}
                Err(e) => debug!(lock = %handle.lock_id, error = %e, "lock release failed"),
            }
        }
    }
}

#[cfg(test)]
#[path = "mutex_tests.rs"]
mod tests;
