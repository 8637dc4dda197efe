// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::cancel::CancellationRegistry;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::mutex::MutexService;
use crate::rbac::{AllowAllOracle, CachingRbacValidator, RoleOracle};
use crate::runner::{ExecutionEngine, RunOutcome};
use cdr_adapters::{FakeSecretStore, FakeStepAdapter};
use cdr_core::{
    ExecutionId, ExecutionStatus, FakeClock, PlanSnapshot, SequentialIdGen, SubmitOptions,
    TenantId,
};
use cdr_storage::{LeaseGrant, NackOutcome, Store};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub store: Arc<Store<FakeClock>>,
    pub clock: FakeClock,
    pub adapter: FakeStepAdapter,
    pub secret_store: FakeSecretStore,
    pub registry: Arc<CancellationRegistry>,
    pub mutexes: Arc<MutexService<FakeClock>>,
    pub engine: ExecutionEngine<FakeClock>,
    pub dispatcher: Dispatcher<FakeClock, SequentialIdGen>,
    pub config: EngineConfig,
    _dir: TempDir,
}

pub fn harness() -> Harness {
    harness_with(Box::new(AllowAllOracle), EngineConfig::default())
}

pub fn harness_with(oracle: Box<dyn RoleOracle>, mut config: EngineConfig) -> Harness {
    // Keep lock waits short so contention tests finish quickly
    config.mutex_wait_max = config.mutex_wait_max.min(Duration::from_millis(500));

    let dir = TempDir::new().expect("temp dir");
    let clock = FakeClock::new();
    let store = Arc::new(Store::open(dir.path(), clock.clone()).expect("open store"));
    let adapter = FakeStepAdapter::new();
    let secret_store = FakeSecretStore::new();
    let registry = Arc::new(CancellationRegistry::new());
    let mutexes = Arc::new(MutexService::new(Arc::clone(&store), clock.clone()));
    let rbac = Arc::new(CachingRbacValidator::new(oracle, clock.clone()));

    let engine = ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&mutexes),
        Arc::clone(&rbac),
        Arc::clone(&registry),
        Arc::new(secret_store.clone()),
        Arc::new(adapter.clone()),
        Arc::new(adapter.clone()),
        config.clone(),
        clock.clone(),
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        rbac,
        config.clone(),
        SequentialIdGen::new("t"),
        clock.clone(),
    );

    Harness {
        store,
        clock,
        adapter,
        secret_store,
        registry,
        mutexes,
        engine,
        dispatcher,
        config,
        _dir: dir,
    }
}

impl Harness {
    /// Submit a plan with no approval gate; returns the execution id.
    pub fn submit(&self, plan: PlanSnapshot) -> ExecutionId {
        self.dispatcher
            .submit(plan, "actor-1", &TenantId::new("tenant-1"), SubmitOptions::default())
            .expect("submit")
            .execution_id
    }

    pub fn lease_one(&self) -> LeaseGrant {
        self.store
            .lease(1, "worker-0", self.config.lease_ttl)
            .expect("lease")
            .remove(0)
    }

    /// Drive an execution like a worker would: lease, run, ack/nack,
    /// advancing the fake clock across retry backoffs.
    pub async fn drive(&self, execution_id: &ExecutionId) -> ExecutionStatus {
        let stop = CancellationToken::new();
        for _ in 0..32 {
            let execution = self
                .store
                .get_execution(execution_id.as_str())
                .expect("execution");
            if execution.is_terminal() {
                return execution.status;
            }

            let grants = self
                .store
                .lease(1, "worker-0", self.config.lease_ttl)
                .expect("lease");
            let Some(grant) = grants.into_iter().next() else {
                // Backoff window: advance past it
                self.clock.advance(Duration::from_secs(60));
                continue;
            };

            let outcome = self
                .engine
                .run(&grant.execution_id, "worker-0", &stop)
                .await
                .expect("run");
            match outcome {
                RunOutcome::Terminal(_) => {
                    self.store
                        .ack(&grant.queue_id, &grant.lease_token)
                        .expect("ack");
                }
                RunOutcome::RetryAfter(delay) => {
                    match self
                        .store
                        .nack(
                            &grant.queue_id,
                            &grant.lease_token,
                            delay,
                            cdr_core::NackReason::StepRetry,
                        )
                        .expect("nack")
                    {
                        NackOutcome::Requeued { .. } => {
                            self.clock.advance(delay + Duration::from_secs(1));
                        }
                        NackOutcome::DeadLettered { .. } => {}
                    }
                }
                RunOutcome::Yield => {}
            }

            let execution = self
                .store
                .get_execution(execution_id.as_str())
                .expect("execution");
            if execution.is_terminal() {
                return execution.status;
            }
        }
        panic!("execution did not settle");
    }
}
