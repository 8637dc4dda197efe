// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for engine specs: real store + dispatcher + runner,
//! fake adapters, fake clock, worker-style driving loop.

use cdr_adapters::{FakeSecretStore, FakeStepAdapter};
use cdr_core::{
    ExecutionId, ExecutionStatus, FakeClock, NackReason, PlanSnapshot, SequentialIdGen,
    SubmitOptions, TenantId,
};
use cdr_engine::{
    AllowAllOracle, CachingRbacValidator, CancellationRegistry, Dispatcher, EngineConfig,
    ExecutionEngine, MutexService, RoleOracle, RunOutcome,
};
use cdr_storage::{NackOutcome, Store};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct Spec {
    pub store: Arc<Store<FakeClock>>,
    pub clock: FakeClock,
    pub adapter: FakeStepAdapter,
    pub secrets: FakeSecretStore,
    pub registry: Arc<CancellationRegistry>,
    pub engine: ExecutionEngine<FakeClock>,
    pub dispatcher: Dispatcher<FakeClock, SequentialIdGen>,
    pub config: EngineConfig,
    pub dir: TempDir,
}

pub fn spec() -> Spec {
    spec_with(Box::new(AllowAllOracle))
}

pub fn spec_with(oracle: Box<dyn RoleOracle>) -> Spec {
    let dir = TempDir::new().expect("temp dir");
    let clock = FakeClock::new();
    let store = Arc::new(Store::open(dir.path(), clock.clone()).expect("open store"));
    let adapter = FakeStepAdapter::new();
    let secrets = FakeSecretStore::new();
    let registry = Arc::new(CancellationRegistry::new());
    let mutexes = Arc::new(MutexService::new(Arc::clone(&store), clock.clone()));
    let rbac = Arc::new(CachingRbacValidator::new(oracle, clock.clone()));
    let mut config = EngineConfig::default();
    config.mutex_wait_max = Duration::from_millis(300);

    let engine = ExecutionEngine::new(
        Arc::clone(&store),
        mutexes,
        Arc::clone(&rbac),
        Arc::clone(&registry),
        Arc::new(secrets.clone()),
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
        SequentialIdGen::new("s"),
        clock.clone(),
    );

    Spec {
        store,
        clock,
        adapter,
        secrets,
        registry,
        engine,
        dispatcher,
        config,
        dir,
    }
}

pub fn tenant() -> TenantId {
    TenantId::new("tenant-1")
}

impl Spec {
    pub fn submit(&self, plan: PlanSnapshot) -> ExecutionId {
        self.submit_with(plan, SubmitOptions::default())
    }

    pub fn submit_with(&self, plan: PlanSnapshot, options: SubmitOptions) -> ExecutionId {
        self.dispatcher
            .submit(plan, "actor-1", &tenant(), options)
            .expect("submit")
            .execution_id
    }

    /// Drive like a worker: lease, run, ack/nack, advancing the fake
    /// clock across backoff windows. Also mirrors the worker pool's
    /// failed-execution DLQ parking.
    pub async fn drive(&self, execution_id: &ExecutionId) -> ExecutionStatus {
        let stop = CancellationToken::new();
        for _ in 0..48 {
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
                self.clock.advance(Duration::from_secs(60));
                continue;
            };

            match self
                .engine
                .run(&grant.execution_id, "worker-0", &stop)
                .await
                .expect("run")
            {
                RunOutcome::Terminal(status) => {
                    self.store
                        .ack(&grant.queue_id, &grant.lease_token)
                        .expect("ack");
                    if status == ExecutionStatus::Failed {
                        self.park_failed(&grant.execution_id);
                    }
                }
                RunOutcome::RetryAfter(delay) => {
                    match self
                        .store
                        .nack(
                            &grant.queue_id,
                            &grant.lease_token,
                            delay,
                            NackReason::StepRetry,
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
        }
        panic!("execution did not settle");
    }

    fn park_failed(&self, execution_id: &ExecutionId) {
        let Some(execution) = self.store.get_execution(execution_id.as_str()) else {
            return;
        };
        let Some(error) = execution.first_error else {
            return;
        };
        if !error.kind.is_retryable() {
            self.store
                .send_to_dlq(execution_id, error.kind, &error.message, execution.attempt_count)
                .expect("dlq");
        }
    }
}
