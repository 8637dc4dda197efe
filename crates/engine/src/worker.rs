// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: N workers lease from the durable queue and drive the
//! execution engine, renewing their lease at TTL/3 while a run is
//! live. A supervisor restarts crashed workers and surfaces the
//! unhealthy count. Graceful shutdown stops leasing, drains in-flight
//! work to a step boundary, then abandons remaining leases to the
//! reaper.

use crate::cancel::CancellationRegistry;
use crate::config::EngineConfig;
use crate::mutex::MutexService;
use crate::rbac::CachingRbacValidator;
use crate::runner::{ExecutionEngine, RunOutcome};
use cdr_adapters::{SecretStoreAdapter, StepAdapter};
use cdr_core::{retry_backoff, Clock, NackReason};
use cdr_storage::{LeaseGrant, Store, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the engine needs to talk to the outside world.
pub struct EngineDeps<C: Clock + 'static> {
    pub store: Arc<Store<C>>,
    pub secret_store: Arc<dyn SecretStoreAdapter>,
    pub asset_adapter: Arc<dyn StepAdapter>,
    pub automation_adapter: Arc<dyn StepAdapter>,
    pub rbac: Arc<CachingRbacValidator<C>>,
    pub registry: Arc<CancellationRegistry>,
    pub clock: C,
}

/// Pool of workers driving executions off the queue.
pub struct WorkerPool<C: Clock + 'static> {
    engine: ExecutionEngine<C>,
    store: Arc<Store<C>>,
    config: EngineConfig,
    shutdown: CancellationToken,
    /// worker id → last liveness beat (epoch ms).
    health: Arc<Mutex<HashMap<String, u64>>>,
    clock: C,
}

impl<C: Clock + 'static> WorkerPool<C> {
    pub fn new(deps: EngineDeps<C>, config: EngineConfig) -> Self {
        let mutexes = Arc::new(MutexService::new(
            Arc::clone(&deps.store),
            deps.clock.clone(),
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&deps.store),
            mutexes,
            Arc::clone(&deps.rbac),
            Arc::clone(&deps.registry),
            Arc::clone(&deps.secret_store),
            Arc::clone(&deps.asset_adapter),
            Arc::clone(&deps.automation_adapter),
            config.clone(),
            deps.clock.clone(),
        );
        Self {
            engine,
            store: deps.store,
            config,
            shutdown: CancellationToken::new(),
            health: Arc::new(Mutex::new(HashMap::new())),
            clock: deps.clock,
        }
    }

    /// Token that stops the pool when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Workers whose liveness beat is older than three poll intervals.
    pub fn unhealthy_count(&self) -> usize {
        let now_ms = self.clock.epoch_ms();
        let stale_ms = (self.config.poll_interval.as_millis() as u64).saturating_mul(3);
        self.health
            .lock()
            .values()
            .filter(|beat| **beat + stale_ms < now_ms)
            .count()
    }

    /// Run the pool until shutdown; restarts crashed workers.
    pub async fn run(self: Arc<Self>) {
        let mut set: JoinSet<usize> = JoinSet::new();
        for slot in 0..self.config.workers {
            let pool = Arc::clone(&self);
            set.spawn(async move { pool.worker_loop(slot).await });
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                joined = set.join_next() => match joined {
                    Some(Ok(slot)) => {
                        if !self.shutdown.is_cancelled() {
                            warn!(slot, "worker exited unexpectedly, restarting");
                            let pool = Arc::clone(&self);
                            set.spawn(async move { pool.worker_loop(slot).await });
                        }
                    }
                    Some(Err(e)) => {
                        // A panicked worker: restart its slot. The slot id
                        // is lost with the panic, so reuse the pool size.
                        error!(error = %e, "worker crashed, restarting");
                        if !self.shutdown.is_cancelled() {
                            let pool = Arc::clone(&self);
                            let slot = self.config.workers;
                            set.spawn(async move { pool.worker_loop(slot).await });
                        }
                    }
                    None => break,
                },
            }
        }

        // Drain: give in-flight items until the hard-stop deadline, then
        // abandon them to the lease reaper.
        let drain = async {
            while set.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.hard_stop_grace, drain)
            .await
            .is_err()
        {
            warn!("hard-stop deadline reached, abandoning in-flight leases");
            set.abort_all();
        }
        info!("worker pool stopped");
    }

    async fn worker_loop(self: Arc<Self>, slot: usize) -> usize {
        let worker_id = format!("worker-{slot}");
        info!(worker = %worker_id, "worker started");

        loop {
            self.beat(&worker_id);
            if self.shutdown.is_cancelled() {
                break;
            }

            let grants = match self.store.lease(
                self.config.queue_batch,
                &worker_id,
                self.config.lease_ttl,
            ) {
                Ok(grants) => grants,
                Err(e) => {
                    warn!(worker = %worker_id, error = %e, "lease failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                }
            };

            if grants.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            for grant in grants {
                self.process(&worker_id, grant).await;
            }
        }

        info!(worker = %worker_id, "worker stopped");
        slot
    }

    async fn process(&self, worker_id: &str, grant: LeaseGrant) {
        let _ = self
            .store
            .record_worker_heartbeat(worker_id, Some(grant.execution_id.clone()));

        // Renew the queue lease at TTL/3 for as long as the run lives
        let renewal_stop = CancellationToken::new();
        let renewal = {
            let store = Arc::clone(&self.store);
            let stop = renewal_stop.clone();
            let queue_id = grant.queue_id.clone();
            let token = grant.lease_token.clone();
            let ttl = self.config.lease_ttl;
            tokio::spawn(async move {
                let cadence = ttl / 3;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(cadence) => {}
                    }
                    match store.renew_lease(&queue_id, &token, ttl) {
                        Ok(_) => {}
                        Err(StoreError::StaleLease) => {
                            warn!(queue_id = %queue_id, "lost queue lease, stopping renewal");
                            return;
                        }
                        Err(e) => warn!(queue_id = %queue_id, error = %e, "lease renewal failed"),
                    }
                }
            })
        };

        let outcome = self
            .engine
            .run(&grant.execution_id, worker_id, &self.shutdown)
            .await;

        renewal_stop.cancel();
        renewal.abort();

        match outcome {
            Ok(RunOutcome::Terminal(status)) => {
                if let Err(e) = self.store.ack(&grant.queue_id, &grant.lease_token) {
                    warn!(
                        queue_id = %grant.queue_id,
                        error = %e,
                        "ack failed; the reaper will redeliver a consistent item",
                    );
                }
                if status == cdr_core::ExecutionStatus::Failed {
                    self.dead_letter_failed(&grant);
                }
                info!(
                    worker = %worker_id,
                    execution = %grant.execution_id,
                    status = %status,
                    "item completed",
                );
            }
            Ok(RunOutcome::RetryAfter(delay)) => {
                self.nack(&grant, delay, NackReason::StepRetry);
            }
            Ok(RunOutcome::Yield) => {
                self.nack(&grant, Duration::ZERO, NackReason::Shutdown);
            }
            Err(e) => {
                error!(
                    worker = %worker_id,
                    execution = %grant.execution_id,
                    error = %e,
                    "run failed with engine error",
                );
                // Keep terminal executions out of the queue: an error
                // after the terminal transition must not redeliver.
                let terminal = self
                    .store
                    .get_execution(grant.execution_id.as_str())
                    .map(|x| x.is_terminal())
                    .unwrap_or(false);
                if terminal {
                    let _ = self.store.ack(&grant.queue_id, &grant.lease_token);
                } else {
                    let delay = retry_backoff(grant.attempt_count + 1);
                    self.nack(&grant, delay, NackReason::WorkerException);
                }
            }
        }
    }

    /// An execution that failed on a non-retryable step error is parked
    /// in the DLQ for operator inspection and manual requeue.
    fn dead_letter_failed(&self, grant: &LeaseGrant) {
        let Some(execution) = self.store.get_execution(grant.execution_id.as_str()) else {
            return;
        };
        let Some(error) = execution.first_error else {
            return;
        };
        if error.kind.is_retryable() {
            return;
        }
        match self.store.send_to_dlq(
            &grant.execution_id,
            error.kind,
            &error.message,
            execution.attempt_count,
        ) {
            Ok(dlq_id) => info!(
                execution = %grant.execution_id,
                dlq_id = %dlq_id,
                kind = %error.kind,
                "failed execution parked in DLQ",
            ),
            Err(e) => warn!(execution = %grant.execution_id, error = %e, "DLQ insert failed"),
        }
    }

    fn nack(&self, grant: &LeaseGrant, delay: Duration, reason: NackReason) {
        match self
            .store
            .nack(&grant.queue_id, &grant.lease_token, delay, reason.clone())
        {
            Ok(outcome) => {
                info!(
                    queue_id = %grant.queue_id,
                    reason = %reason,
                    outcome = ?outcome,
                    "item returned to queue",
                );
            }
            Err(e) => warn!(queue_id = %grant.queue_id, error = %e, "nack failed"),
        }
    }

    fn beat(&self, worker_id: &str) {
        self.health
            .lock()
            .insert(worker_id.to_string(), self.clock.epoch_ms());
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
