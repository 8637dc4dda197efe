// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step-by-step execution runner.
//!
//! Drives one execution end-to-end after it has been leased: per step,
//! RBAC check, asset mutex, JIT secrets, deadline-bounded adapter call,
//! outcome classification, mutex release, progress. The queue lease
//! (renewed by the worker, not here) guarantees exclusivity, so a
//! resumed run after a worker crash can safely re-claim a RUNNING
//! execution.

use crate::cancel::CancellationRegistry;
use crate::config::EngineConfig;
use crate::deadline::step_deadline;
use crate::error::EngineError;
use crate::mutex::{AcquireOutcome, LockHandle, MutexService};
use crate::rbac::CachingRbacValidator;
use crate::secrets::{resolve_step_secrets, SecretBundle};
use cdr_adapters::{AdapterError, AdapterResponse, ExitStatus, SecretStoreAdapter, StepAdapter, StepSpec};
use cdr_core::{
    cap_artifacts, retry_backoff, AdapterKind, AdapterVerdict, Clock, ErrorKind, Execution,
    ExecutionId, ExecutionStatus, LogMasker, Step, StepError, StepResult, StepStatus,
    TimeoutPolicy,
};
use cdr_storage::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the worker should do with the queue item after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Execution reached a terminal state; ack the item.
    Terminal(ExecutionStatus),
    /// A transient step failure wants redelivery after the delay.
    RetryAfter(Duration),
    /// Shutdown observed at a step boundary; nack so another instance
    /// can pick the execution up.
    Yield,
}

/// Flow control out of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepFlow {
    Done,
    Retry(Duration),
    Cancelled,
    DeadlineLapsed,
}

/// Drives a single execution. Cheap to clone; shared state is behind
/// `Arc`s so parallel step groups can fan out.
pub struct ExecutionEngine<C: Clock + 'static> {
    store: Arc<Store<C>>,
    mutexes: Arc<MutexService<C>>,
    rbac: Arc<CachingRbacValidator<C>>,
    registry: Arc<CancellationRegistry>,
    secret_store: Arc<dyn SecretStoreAdapter>,
    asset_adapter: Arc<dyn StepAdapter>,
    automation_adapter: Arc<dyn StepAdapter>,
    masker: LogMasker,
    config: EngineConfig,
    clock: C,
}

impl<C: Clock + 'static> Clone for ExecutionEngine<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            mutexes: Arc::clone(&self.mutexes),
            rbac: Arc::clone(&self.rbac),
            registry: Arc::clone(&self.registry),
            secret_store: Arc::clone(&self.secret_store),
            asset_adapter: Arc::clone(&self.asset_adapter),
            automation_adapter: Arc::clone(&self.automation_adapter),
            masker: self.masker.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl<C: Clock + 'static> ExecutionEngine<C> {
    pub fn new(
        store: Arc<Store<C>>,
        mutexes: Arc<MutexService<C>>,
        rbac: Arc<CachingRbacValidator<C>>,
        registry: Arc<CancellationRegistry>,
        secret_store: Arc<dyn SecretStoreAdapter>,
        asset_adapter: Arc<dyn StepAdapter>,
        automation_adapter: Arc<dyn StepAdapter>,
        config: EngineConfig,
        clock: C,
    ) -> Self {
        Self {
            store,
            mutexes,
            rbac,
            registry,
            secret_store,
            asset_adapter,
            automation_adapter,
            masker: LogMasker::new(),
            config,
            clock,
        }
    }

    /// Run an execution to a decision point.
    pub async fn run(
        &self,
        execution_id: &ExecutionId,
        worker_id: &str,
        soft_stop: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let execution = self
            .store
            .get_execution(execution_id.as_str())
            .ok_or_else(|| EngineError::NotFound(execution_id.as_str().to_string()))?;

        if execution.is_terminal() {
            // A previous worker crashed between the terminal transition
            // and the ack; nothing left to do.
            return Ok(RunOutcome::Terminal(execution.status));
        }

        let budget = self.claim(&execution)?;
        let execution = self
            .store
            .get_execution(execution_id.as_str())
            .ok_or_else(|| EngineError::NotFound(execution_id.as_str().to_string()))?;

        let cancel = self.registry.token(execution_id);
        let outcome = self
            .run_steps(&execution, budget, worker_id, &cancel, soft_stop)
            .await?;

        if let RunOutcome::Terminal(status) = &outcome {
            info!(
                execution = %execution_id,
                status = %status,
                "execution reached terminal state",
            );
            self.registry.remove(execution_id);
        }
        Ok(outcome)
    }

    /// Move QUEUED to RUNNING and stamp the absolute deadline. A
    /// RUNNING execution with a dangling worker is claimed as-is: the
    /// queue lease already guarantees exclusivity.
    ///
    /// Returns the delivery attempt's execution budget. Each delivery
    /// gets the full policy budget; queue wait and retry backoff do not
    /// count against it.
    fn claim(&self, execution: &Execution) -> Result<Duration, EngineError> {
        match execution.status {
            ExecutionStatus::Queued => {
                self.store.transition_execution(
                    &execution.id,
                    ExecutionStatus::Queued,
                    ExecutionStatus::Running,
                    None,
                    None,
                )?;
                Ok(self.stamp_deadline(execution))
            }
            ExecutionStatus::Running => Ok(self.stamp_deadline(execution)),
            other => Err(EngineError::Store(StoreError::Conflict(format!(
                "execution {} leased in state {other}",
                execution.id
            )))),
        }
    }

    fn stamp_deadline(&self, execution: &Execution) -> Duration {
        let policy = self.execution_policy(execution);
        let timeout_at = self.clock.epoch_ms() + policy.execution_timeout.as_millis() as u64;
        self.store.set_execution_deadline(&execution.id, timeout_at);
        policy.execution_timeout
    }

    /// The policy cell governing the execution-level deadline: the
    /// plan's SLA crossed with its riskiest action class.
    fn execution_policy(&self, execution: &Execution) -> TimeoutPolicy {
        let action = execution
            .plan
            .max_action_class()
            .unwrap_or(cdr_core::ActionClass::Read);
        TimeoutPolicy::lookup(execution.sla_class, action)
    }

    async fn run_steps(
        &self,
        execution: &Execution,
        budget: Duration,
        worker_id: &str,
        cancel: &CancellationToken,
        soft_stop: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let steps = self.store.steps_of(&execution.id);
        let units = group_units(&steps);
        let deadline_at = tokio::time::Instant::now() + budget;

        let mut cancelled = false;
        let mut deadline_lapsed = false;
        let mut halted = false;

        for unit in units {
            let pending: Vec<Step> = unit
                .iter()
                .filter(|s| !s.status.is_terminal())
                .cloned()
                .collect();
            if pending.is_empty() {
                continue;
            }

            if halted || deadline_lapsed {
                self.skip_steps(&pending)?;
                continue;
            }
            if soft_stop.is_cancelled() {
                return Ok(RunOutcome::Yield);
            }
            if cancel.is_cancelled() || self.store.cancel_requested(&execution.id) {
                cancel.cancel();
                self.cancel_steps(&pending)?;
                cancelled = true;
                continue;
            }

            let flows = if pending.len() == 1 {
                vec![
                    self.run_step(execution, &pending[0], deadline_at, worker_id, cancel)
                        .await?,
                ]
            } else {
                let mut set: JoinSet<Result<StepFlow, EngineError>> = JoinSet::new();
                for step in pending.clone() {
                    let engine = self.clone();
                    let execution = execution.clone();
                    let worker_id = worker_id.to_string();
                    let cancel = cancel.clone();
                    set.spawn(async move {
                        engine
                            .run_step(&execution, &step, deadline_at, &worker_id, &cancel)
                            .await
                    });
                }
                let mut flows = Vec::with_capacity(pending.len());
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok(flow) => flows.push(flow?),
                        Err(e) => {
                            warn!(error = %e, "parallel step task failed");
                            flows.push(StepFlow::Done);
                        }
                    }
                }
                flows
            };

            // Retry wins over everything: the whole execution is
            // redelivered and the remaining steps run on the next lease.
            if let Some(StepFlow::Retry(delay)) =
                flows.iter().find(|f| matches!(f, StepFlow::Retry(_)))
            {
                return Ok(RunOutcome::RetryAfter(*delay));
            }
            if flows.iter().any(|f| *f == StepFlow::Cancelled) {
                cancelled = true;
                continue;
            }
            if flows.iter().any(|f| *f == StepFlow::DeadlineLapsed) {
                deadline_lapsed = true;
                continue;
            }

            // Stop-on-failure unless the plan tolerates partial outcomes
            if !execution.partial_allowed {
                let refreshed = self.store.get_execution(execution.id.as_str());
                if refreshed.map(|e| e.step_failed > 0).unwrap_or(false) {
                    halted = true;
                }
            }
        }

        self.finish(execution, cancelled, deadline_lapsed)
    }

    /// Aggregate step outcomes into the execution's terminal state.
    fn finish(
        &self,
        execution: &Execution,
        cancelled: bool,
        deadline_lapsed: bool,
    ) -> Result<RunOutcome, EngineError> {
        let refreshed = self
            .store
            .get_execution(execution.id.as_str())
            .ok_or_else(|| EngineError::NotFound(execution.id.as_str().to_string()))?;

        let terminal = if cancelled {
            ExecutionStatus::Cancelled
        } else if deadline_lapsed && refreshed.step_succeeded == 0 {
            ExecutionStatus::Timeout
        } else if refreshed.step_succeeded == refreshed.step_count {
            ExecutionStatus::Completed
        } else if refreshed.step_succeeded > 0 && refreshed.partial_allowed {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        };

        let reason = match terminal {
            ExecutionStatus::Timeout => Some("execution deadline exceeded".to_string()),
            ExecutionStatus::Cancelled => Some("cancel requested".to_string()),
            _ => None,
        };

        match self.store.transition_execution(
            &refreshed.id,
            ExecutionStatus::Running,
            terminal,
            reason,
            None,
        ) {
            Ok(()) => Ok(RunOutcome::Terminal(terminal)),
            // A racing writer already terminated the execution; the FSM
            // precondition makes the second terminal a no-op.
            Err(StoreError::InvalidTransition { .. }) => {
                let status = self
                    .store
                    .get_execution(refreshed.id.as_str())
                    .map(|e| e.status)
                    .unwrap_or(terminal);
                Ok(RunOutcome::Terminal(status))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn skip_steps(&self, steps: &[Step]) -> Result<(), EngineError> {
        for step in steps {
            match step.status {
                StepStatus::Pending => self.store.transition_step(
                    &step.id,
                    StepStatus::Pending,
                    StepStatus::Skipped,
                    step.attempt,
                    None,
                    None,
                )?,
                // A crash-orphaned RUNNING step with nothing left to run
                StepStatus::Running => self.store.transition_step(
                    &step.id,
                    StepStatus::Running,
                    StepStatus::Cancelled,
                    step.attempt,
                    None,
                    None,
                )?,
                _ => {}
            }
        }
        Ok(())
    }

    fn cancel_steps(&self, steps: &[Step]) -> Result<(), EngineError> {
        for step in steps {
            if matches!(step.status, StepStatus::Pending | StepStatus::Running) {
                self.store.transition_step(
                    &step.id,
                    step.status,
                    StepStatus::Cancelled,
                    step.attempt,
                    None,
                    None,
                )?;
            }
        }
        Ok(())
    }

    /// Run one step through the full safety ladder.
    async fn run_step(
        &self,
        execution: &Execution,
        step: &Step,
        deadline_at: tokio::time::Instant,
        worker_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StepFlow, EngineError> {
        let policy = TimeoutPolicy::lookup(execution.sla_class, step.action_class);
        let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
        let Some(deadline) = step_deadline(&policy, remaining) else {
            return Ok(StepFlow::DeadlineLapsed);
        };

        // RBAC immediately before step start; DENIED is permanent
        let decision = self
            .rbac
            .check(
                &execution.actor_id,
                &execution.tenant_id,
                &step.asset_id,
                step.action_class,
            )
            .await;
        self.store.record_rbac_decision(
            &execution.id,
            &step.id,
            &execution.actor_id,
            &step.asset_id,
            decision.is_allowed(),
            match &decision {
                crate::rbac::RbacDecision::Denied(reason) => {
                    Some(self.masker.mask_str(reason))
                }
                _ => None,
            },
        )?;
        if let crate::rbac::RbacDecision::Denied(reason) = decision {
            let error = StepError::new(ErrorKind::AuthDenied, self.masker.mask_str(&reason));
            return self.fail_step(execution, step, error, None);
        }

        // Asset mutex, bounded wait
        let owner_tag = format!("{}/{}/{}", execution.id, worker_id, step.id);
        let lock_ttl = policy.lease_ttl(self.config.lease_buffer);
        let wait_max = self.config.mutex_wait_max.min(deadline);
        let outcome = self
            .mutexes
            .acquire_all(
                &execution.tenant_id,
                std::slice::from_ref(&step.asset_id),
                &owner_tag,
                lock_ttl,
                wait_max,
                cancel,
            )
            .await?;
        let handles = match outcome {
            AcquireOutcome::Acquired(handles) => handles,
            AcquireOutcome::Busy => {
                let error = StepError::new(
                    ErrorKind::AssetBusy,
                    format!("asset {} held by another execution", step.asset_id),
                );
                return self.fail_step(execution, step, error, None);
            }
            AcquireOutcome::Cancelled => return Ok(StepFlow::Cancelled),
        };
        let lock_wait_ms = handles.iter().map(|h| h.wait_ms).max().unwrap_or(0);

        // JIT secrets; cleartext stays inside the bundle
        let bundle = match resolve_step_secrets(
            self.secret_store.as_ref(),
            step,
            &execution.actor_id,
        )
        .await
        {
            Ok(bundle) => bundle,
            Err(error) => {
                self.mutexes.release_all(&handles);
                return self.fail_step(execution, step, error, None);
            }
        };

        // Start (re-entrant when resuming a crashed RUNNING step)
        let (from, attempt) = if step.status == StepStatus::Running {
            (StepStatus::Running, step.attempt.max(1))
        } else {
            (StepStatus::Pending, step.attempt + 1)
        };
        if let Err(e) =
            self.store
                .transition_step(&step.id, from, StepStatus::Running, attempt, None, None)
        {
            self.mutexes.release_all(&handles);
            return Err(e.into());
        }

        let flow = self
            .invoke_adapter(
                execution, step, attempt, deadline, &bundle, &handles, lock_wait_ms, cancel,
            )
            .await;

        self.mutexes.release_all(&handles);
        drop(bundle);

        let flow = flow?;
        self.emit_progress(execution, step, &policy)?;
        Ok(flow)
    }

    /// Call the adapter under deadline + heartbeat and classify the result.
    #[allow(clippy::too_many_arguments)]
    async fn invoke_adapter(
        &self,
        execution: &Execution,
        step: &Step,
        attempt: u32,
        deadline: Duration,
        bundle: &SecretBundle,
        handles: &[LockHandle],
        lock_wait_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<StepFlow, EngineError> {
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = MutexService::spawn_heartbeat(
            Arc::clone(&self.mutexes),
            handles.to_vec(),
            heartbeat_stop.clone(),
        );

        let adapter = match step.adapter {
            AdapterKind::Asset => Arc::clone(&self.asset_adapter),
            AdapterKind::Automation => Arc::clone(&self.automation_adapter),
        };
        let spec = StepSpec {
            execution_id: execution.id.clone(),
            step_id: step.id.clone(),
            asset_id: step.asset_id.clone(),
            action: step.action.clone(),
            trace_id: execution.trace_id.clone(),
        };

        let result = adapter
            .execute(spec, bundle.values(), deadline, cancel.child_token())
            .await;

        heartbeat_stop.cancel();
        heartbeat.abort();

        let literals = bundle.literals();
        match result {
            Ok(response) if response.exit_status == ExitStatus::Ok => {
                let result = self.step_result(&response, lock_wait_ms, &literals);
                self.store.transition_step(
                    &step.id,
                    StepStatus::Running,
                    StepStatus::Succeeded,
                    attempt,
                    Some(result),
                    None,
                )?;
                Ok(StepFlow::Done)
            }
            Ok(response) => {
                let kind = match response.error_kind {
                    AdapterVerdict::Auth => ErrorKind::AuthDenied,
                    AdapterVerdict::Transient => ErrorKind::Transient,
                    AdapterVerdict::Timeout => ErrorKind::StepTimeout,
                    AdapterVerdict::Permanent | AdapterVerdict::None => ErrorKind::Permanent,
                };
                if kind == ErrorKind::StepTimeout {
                    return self.timeout_step(step, attempt, &response, lock_wait_ms, &literals);
                }
                let message = self.masker.mask_str_with(
                    &format!(
                        "adapter reported {:?} (exit code {:?})",
                        response.error_kind, response.exit_code
                    ),
                    &literals,
                );
                let result = self.step_result(&response, lock_wait_ms, &literals);
                self.fail_step_running(
                    execution,
                    step,
                    attempt,
                    StepError::new(kind, message),
                    Some(result),
                )
            }
            Err(AdapterError::DeadlineExceeded) => {
                self.store.transition_step(
                    &step.id,
                    StepStatus::Running,
                    StepStatus::Timeout,
                    attempt,
                    None,
                    Some(StepError::new(
                        ErrorKind::StepTimeout,
                        format!("step exceeded {}s deadline", deadline.as_secs()),
                    )),
                )?;
                Ok(StepFlow::Done)
            }
            Err(AdapterError::Cancelled) => {
                self.store.transition_step(
                    &step.id,
                    StepStatus::Running,
                    StepStatus::Cancelled,
                    attempt,
                    None,
                    None,
                )?;
                Ok(StepFlow::Cancelled)
            }
            Err(AdapterError::Transport { attempts, message }) => {
                let masked = self.masker.mask_str_with(&message, &literals);
                self.fail_step_running(
                    execution,
                    step,
                    attempt,
                    StepError::new(
                        ErrorKind::Transient,
                        format!("transport failed after {attempts} attempts: {masked}"),
                    ),
                    None,
                )
            }
            Err(AdapterError::Malformed(message)) => self.fail_step_running(
                execution,
                step,
                attempt,
                StepError::new(ErrorKind::Permanent, self.masker.mask_str(&message)),
                None,
            ),
        }
    }

    fn step_result(
        &self,
        response: &AdapterResponse,
        lock_wait_ms: u64,
        literals: &[String],
    ) -> StepResult {
        let masked = self.masker.mask_value_with(&response.artifacts, literals);
        StepResult {
            exit_code: response.exit_code,
            artifacts: cap_artifacts(masked),
            lock_wait_ms,
        }
    }

    /// Fail a step that never reached the adapter: walk it through
    /// RUNNING so the state machine stays sound.
    fn fail_step(
        &self,
        execution: &Execution,
        step: &Step,
        error: StepError,
        result: Option<StepResult>,
    ) -> Result<StepFlow, EngineError> {
        let (from, attempt) = if step.status == StepStatus::Running {
            (StepStatus::Running, step.attempt.max(1))
        } else {
            (StepStatus::Pending, step.attempt + 1)
        };
        self.store
            .transition_step(&step.id, from, StepStatus::Running, attempt, None, None)?;
        self.fail_step_running(execution, step, attempt, error, result)
    }

    /// Record a failure on a RUNNING step, scheduling a retry when the
    /// kind and the attempt budget allow.
    fn fail_step_running(
        &self,
        execution: &Execution,
        step: &Step,
        attempt: u32,
        error: StepError,
        result: Option<StepResult>,
    ) -> Result<StepFlow, EngineError> {
        let kind = error.kind;
        self.store.transition_step(
            &step.id,
            StepStatus::Running,
            StepStatus::Failed,
            attempt,
            result,
            Some(error),
        )?;

        if kind.is_retryable() && attempt < step.max_attempts {
            let delay = retry_backoff(attempt);
            self.store.schedule_step_retry(&step.id, delay)?;
            info!(
                execution = %execution.id,
                step = %step.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %kind,
                "step failed transiently, retry scheduled",
            );
            return Ok(StepFlow::Retry(delay));
        }
        Ok(StepFlow::Done)
    }

    fn timeout_step(
        &self,
        step: &Step,
        attempt: u32,
        response: &AdapterResponse,
        lock_wait_ms: u64,
        literals: &[String],
    ) -> Result<StepFlow, EngineError> {
        let result = self.step_result(response, lock_wait_ms, literals);
        self.store.transition_step(
            &step.id,
            StepStatus::Running,
            StepStatus::Timeout,
            attempt,
            Some(result),
            Some(StepError::new(
                ErrorKind::StepTimeout,
                "adapter reported timeout",
            )),
        )?;
        Ok(StepFlow::Done)
    }

    fn emit_progress(
        &self,
        execution: &Execution,
        step: &Step,
        policy: &TimeoutPolicy,
    ) -> Result<(), EngineError> {
        let refreshed = self.store.get_execution(execution.id.as_str());
        let Some(refreshed) = refreshed else {
            return Ok(());
        };
        let done = refreshed.step_succeeded + refreshed.step_failed;
        let remaining = refreshed.step_count.saturating_sub(done) as u64;
        let eta_ms = (remaining > 0).then(|| remaining * policy.step_timeout.as_millis() as u64);
        let status = self
            .store
            .steps_of(&execution.id)
            .into_iter()
            .find(|s| s.id == step.id)
            .map(|s| s.status)
            .unwrap_or(step.status);
        self.store
            .record_progress(&execution.id, step.index, status, eta_ms)?;
        Ok(())
    }
}

/// Group steps into sequential units; consecutive steps sharing a
/// parallel group form one concurrent unit.
fn group_units(steps: &[Step]) -> Vec<Vec<Step>> {
    let mut units: Vec<Vec<Step>> = Vec::new();
    for step in steps {
        let joins_previous = match (units.last(), step.parallel_group) {
            (Some(last), Some(group)) => last
                .first()
                .and_then(|s| s.parallel_group)
                .is_some_and(|g| g == group),
            _ => false,
        };
        if joins_previous {
            if let Some(last) = units.last_mut() {
                last.push(step.clone());
            }
        } else {
            units.push(vec![step.clone()]);
        }
    }
    units
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
