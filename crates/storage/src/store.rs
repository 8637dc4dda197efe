// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional store façade over WAL + materialized state.
//!
//! Every public operation is one atomic unit: validate preconditions
//! against the state, append the event(s) to the WAL, apply them, and
//! publish the resulting audit rows. The state lock is held for the
//! whole unit, which gives per-operation serializability. Racing
//! writers on the same FSM edge converge through the `from`-state
//! precondition; the loser gets `InvalidTransition`.

use crate::snapshot::Snapshot;
use crate::state::{
    idempotency_key, AssetLock, DlqItem, MaterializedState, QueueItem, QueueItemStatus,
    RETENTION_AUDIT_MS, RETENTION_COMPLETED_QUEUE_MS,
};
use crate::wal::{Wal, WalError};
use cdr_core::{
    ActionClass, Approval, ApprovalState, AssetId, AuditKind, AuditRecord, Clock, ErrorKind,
    Event, Execution, ExecutionId, ExecutionStatus, NackReason, Step, StepError, StepId,
    StepResult, StepStatus, TenantId, TimeoutPolicy,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Idempotency keys stay bound for 24h after the execution terminates.
const IDEMPOTENCY_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Errors surfaced by store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },
    #[error("idempotent hit: {execution_id}")]
    IdempotentHit { execution_id: ExecutionId },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("lease is stale or not owned by caller")]
    StaleLease,
    #[error("asset is locked by another owner")]
    LockBusy,
    #[error("lock is stale or not owned by caller")]
    StaleLock,
    #[error("dlq item already requeued: {0}")]
    AlreadyRequeued(String),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] WalError),
}

/// A leased queue item handed to a worker.
#[derive(Debug, Clone)]
pub struct LeaseGrant {
    pub queue_id: String,
    pub lease_token: String,
    pub lease_expires_at_ms: u64,
    pub execution_id: ExecutionId,
    pub step_id: Option<StepId>,
    pub attempt_count: u32,
}

/// What happened to a nacked item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { available_at_ms: u64 },
    DeadLettered { dlq_id: String },
}

struct Inner {
    state: MaterializedState,
    wal: Wal,
}

/// Durable, serializable state for all engine entities.
pub struct Store<C: Clock> {
    inner: Mutex<Inner>,
    clock: C,
    state_dir: PathBuf,
    audit_tx: broadcast::Sender<AuditRecord>,
}

impl<C: Clock> Store<C> {
    /// Open the store: load the snapshot if present, then replay WAL
    /// entries past the snapshot sequence.
    pub fn open(state_dir: &Path, clock: C) -> Result<Self, StoreError> {
        let snapshot_path = Self::snapshot_path(state_dir);
        let wal_path = Self::wal_path(state_dir);

        let (mut state, snapshot_seq) = match Snapshot::load(&snapshot_path) {
            Ok(Some(snapshot)) => (snapshot.state, snapshot.seq),
            Ok(None) => (MaterializedState::default(), 0),
            Err(e) => {
                warn!(error = %e, "Failed to load snapshot, replaying full WAL");
                (MaterializedState::default(), 0)
            }
        };

        let mut wal = Wal::open(&wal_path)?;
        wal.ensure_seq_floor(snapshot_seq);
        let entries = wal.entries_after(snapshot_seq)?;
        let replayed = entries.len();
        for entry in entries {
            state.apply_event(&entry.event);
        }
        if replayed > 0 {
            info!(replayed, snapshot_seq, "Recovered state from WAL replay");
        }

        let (audit_tx, _) = broadcast::channel(1024);

        Ok(Self {
            inner: Mutex::new(Inner { state, wal }),
            clock,
            state_dir: state_dir.to_owned(),
            audit_tx,
        })
    }

    fn snapshot_path(state_dir: &Path) -> PathBuf {
        state_dir.join("snapshot.zst")
    }

    fn wal_path(state_dir: &Path) -> PathBuf {
        state_dir.join("wal.jsonl")
    }

    /// Subscribe to live audit rows (for `events tail`).
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.audit_tx.subscribe()
    }

    /// Flush buffered WAL entries to disk (the durability point).
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.flush()?;
        Ok(())
    }

    pub fn needs_flush(&self) -> bool {
        self.inner.lock().wal.needs_flush()
    }

    /// Write a durable snapshot, then truncate the WAL through it.
    ///
    /// The snapshot must be durable (rename + dir fsync) before the WAL
    /// shrinks, otherwise a crash in between loses state.
    pub fn checkpoint(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.flush()?;
        let seq = inner.wal.write_seq();
        let snapshot = Snapshot::new(seq, inner.state.clone());
        snapshot
            .save(&Self::snapshot_path(&self.state_dir))
            .map_err(|e| StoreError::Conflict(format!("checkpoint failed: {e}")))?;
        inner.wal.truncate_through(seq)?;
        Ok(seq)
    }

    /// Read-only access to the materialized state.
    pub fn with_state<T>(&self, f: impl FnOnce(&MaterializedState) -> T) -> T {
        let inner = self.inner.lock();
        f(&inner.state)
    }

    /// Append events and apply them under the held lock.
    fn commit_locked(&self, inner: &mut Inner, events: Vec<Event>) -> Result<(), StoreError> {
        for event in &events {
            inner.wal.append(event)?;
        }
        for event in &events {
            if let Some(row) = inner.state.apply_event(event) {
                // Lossy by design: slow tail subscribers miss rows and
                // re-page via events_since.
                let _ = self.audit_tx.send(row);
            }
        }
        Ok(())
    }

    // ── executions ──────────────────────────────────────────────────────

    /// Register a new execution, enforcing tenant-scoped idempotency.
    pub fn create_execution(&self, execution: Execution) -> Result<ExecutionId, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();

        if let Some(key) = &execution.idempotency_key {
            let index_key = idempotency_key(&execution.tenant_id, key);
            if let Some(existing_id) = inner.state.idempotency.get(&index_key) {
                if let Some(existing) = inner.state.executions.get(existing_id) {
                    let within_window = existing
                        .finished_at_ms
                        .is_none_or(|at| now_ms < at + IDEMPOTENCY_WINDOW_MS);
                    if !existing.is_terminal() || within_window {
                        return Err(StoreError::IdempotentHit {
                            execution_id: existing.id.clone(),
                        });
                    }
                }
            }
        }

        let id = execution.id.clone();
        self.commit_locked(&mut inner, vec![Event::ExecutionCreated { execution }])?;
        Ok(id)
    }

    /// Transition an execution along a validated FSM edge.
    pub fn transition_execution(
        &self,
        id: &ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        reason: Option<String>,
        actor_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .state
            .executions
            .get(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.as_str().to_string()))?;

        if execution.status != from || !ExecutionStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition {
                entity: id.as_str().to_string(),
                from: execution.status.to_string(),
                to: to.to_string(),
            });
        }

        self.commit_locked(
            &mut inner,
            vec![Event::ExecutionTransitioned {
                id: id.clone(),
                from,
                to,
                reason,
                actor_id,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    /// Stamp the execution's absolute deadline when the run starts.
    pub fn set_execution_deadline(&self, id: &ExecutionId, timeout_at_ms: u64) {
        let mut inner = self.inner.lock();
        if let Some(execution) = inner.state.executions.get_mut(id.as_str()) {
            // Derived scheduling data, not an auditable fact: recomputed
            // by a resumed worker rather than replayed.
            execution.timeout_at_ms = Some(timeout_at_ms);
        }
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        self.with_state(|state| state.get_execution(id).cloned())
    }

    pub fn steps_of(&self, id: &ExecutionId) -> Vec<Step> {
        self.with_state(|state| state.steps_of(id).into_iter().cloned().collect())
    }

    pub fn events_since(&self, id: &ExecutionId, sequence: u64) -> Vec<AuditRecord> {
        self.with_state(|state| state.audit_since(id, sequence))
    }

    /// Policy matrix lookup; effectively read-only at runtime.
    pub fn get_timeout_policy(
        &self,
        sla: cdr_core::SlaClass,
        action: ActionClass,
    ) -> TimeoutPolicy {
        TimeoutPolicy::lookup(sla, action)
    }

    /// Whether a cancel request has been recorded for the execution.
    /// Runners poll this at step boundaries.
    pub fn cancel_requested(&self, id: &ExecutionId) -> bool {
        self.with_state(|state| {
            state
                .audit
                .get(id.as_str())
                .map(|rows| {
                    rows.iter()
                        .any(|r| r.kind == AuditKind::Cancel && r.to_status.is_none())
                })
                .unwrap_or(false)
        })
    }

    /// Record a cancel request (the FSM transition happens separately
    /// once the engine observes the request).
    pub fn record_cancel_requested(
        &self,
        id: &ExecutionId,
        reason: &str,
        actor_id: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.executions.contains_key(id.as_str()) {
            return Err(StoreError::NotFound(id.as_str().to_string()));
        }
        self.commit_locked(
            &mut inner,
            vec![Event::CancelRequested {
                id: id.clone(),
                reason: reason.to_string(),
                actor_id,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    pub fn record_progress(
        &self,
        id: &ExecutionId,
        step_index: u32,
        step_status: StepStatus,
        eta_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(execution) = inner.state.executions.get(id.as_str()) else {
            return Err(StoreError::NotFound(id.as_str().to_string()));
        };
        let event = Event::ExecutionProgress {
            id: id.clone(),
            step_index,
            step_status,
            succeeded: execution.step_succeeded,
            failed: execution.step_failed,
            total: execution.step_count,
            eta_ms,
            epoch_ms: self.clock.epoch_ms(),
        };
        self.commit_locked(&mut inner, vec![event])
    }

    pub fn record_rbac_decision(
        &self,
        execution_id: &ExecutionId,
        step_id: &StepId,
        actor_id: &str,
        asset_id: &AssetId,
        allowed: bool,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit_locked(
            &mut inner,
            vec![Event::RbacDecision {
                execution_id: execution_id.clone(),
                step_id: step_id.clone(),
                actor_id: actor_id.to_string(),
                asset_id: asset_id.clone(),
                allowed,
                reason,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    pub fn record_worker_heartbeat(
        &self,
        worker_id: &str,
        execution_id: Option<ExecutionId>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit_locked(
            &mut inner,
            vec![Event::WorkerHeartbeat {
                worker_id: worker_id.to_string(),
                execution_id,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    // ── steps ───────────────────────────────────────────────────────────

    /// Transition a step along a validated FSM edge, updating parent
    /// counters in the same unit.
    ///
    /// The `Running -> Running` resume edge is accepted and skipped
    /// without appending a duplicate event.
    pub fn transition_step(
        &self,
        step_id: &StepId,
        from: StepStatus,
        to: StepStatus,
        attempt: u32,
        result: Option<StepResult>,
        error: Option<StepError>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let step = inner
            .state
            .steps
            .get(step_id.as_str())
            .ok_or_else(|| StoreError::NotFound(step_id.as_str().to_string()))?;

        if step.status != from || !StepStatus::can_transition(from, to) {
            return Err(StoreError::InvalidTransition {
                entity: step_id.as_str().to_string(),
                from: step.status.to_string(),
                to: to.to_string(),
            });
        }

        if from == StepStatus::Running && to == StepStatus::Running {
            return Ok(());
        }

        let execution_id = step.execution_id.clone();
        self.commit_locked(
            &mut inner,
            vec![Event::StepTransitioned {
                execution_id,
                step_id: step_id.clone(),
                from,
                to,
                attempt,
                result,
                error,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    /// Re-arm a transiently failed step for another attempt.
    pub fn schedule_step_retry(
        &self,
        step_id: &StepId,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let step = inner
            .state
            .steps
            .get(step_id.as_str())
            .ok_or_else(|| StoreError::NotFound(step_id.as_str().to_string()))?;
        if step.status != StepStatus::Failed {
            return Err(StoreError::Conflict(format!(
                "step {} is {}, not failed",
                step_id, step.status
            )));
        }
        let event = Event::StepRetryScheduled {
            execution_id: step.execution_id.clone(),
            step_id: step_id.clone(),
            attempt: step.attempt,
            delay_ms: delay.as_millis() as u64,
            epoch_ms: self.clock.epoch_ms(),
        };
        self.commit_locked(&mut inner, vec![event])
    }

    // ── approvals ───────────────────────────────────────────────────────

    pub fn request_approval(&self, approval: Approval) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        self.commit_locked(&mut inner, vec![Event::ApprovalRequested { approval }])
    }

    pub fn act_approval(
        &self,
        approval_id: &str,
        decision: ApprovalState,
        actor_id: &str,
    ) -> Result<Approval, StoreError> {
        let mut inner = self.inner.lock();
        let approval = inner
            .state
            .approvals
            .get(approval_id)
            .ok_or_else(|| StoreError::NotFound(approval_id.to_string()))?
            .clone();
        if approval.state != ApprovalState::Pending {
            return Err(StoreError::Conflict(format!(
                "approval {} already {}",
                approval_id,
                serde_json::to_string(&approval.state).unwrap_or_default()
            )));
        }
        self.commit_locked(
            &mut inner,
            vec![Event::ApprovalActed {
                approval_id: approval.id.clone(),
                execution_id: approval.execution_id.clone(),
                decision,
                actor_id: actor_id.to_string(),
                epoch_ms: self.clock.epoch_ms(),
            }],
        )?;
        Ok(inner
            .state
            .approvals
            .get(approval_id)
            .cloned()
            .unwrap_or(approval))
    }

    pub fn pending_approval_of(&self, execution_id: &ExecutionId) -> Option<Approval> {
        self.with_state(|state| {
            state
                .approvals
                .values()
                .find(|a| a.execution_id == *execution_id && a.state == ApprovalState::Pending)
                .cloned()
        })
    }

    /// Expire overdue pending approvals; returns the affected executions.
    pub fn expire_approvals(&self) -> Result<Vec<ExecutionId>, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let overdue: Vec<Approval> = inner
            .state
            .approvals
            .values()
            .filter(|a| a.is_expired(now_ms))
            .cloned()
            .collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for approval in overdue {
            self.commit_locked(
                &mut inner,
                vec![Event::ApprovalExpired {
                    approval_id: approval.id.clone(),
                    execution_id: approval.execution_id.clone(),
                    epoch_ms: now_ms,
                }],
            )?;
            expired.push(approval.execution_id);
        }
        Ok(expired)
    }

    // ── work queue ──────────────────────────────────────────────────────

    /// Insert a queue item; `delay` pushes availability into the future.
    pub fn enqueue(
        &self,
        execution_id: &ExecutionId,
        step_id: Option<StepId>,
        priority: i32,
        delay: Duration,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let queue_id = format!("q-{}", uuid::Uuid::new_v4());
        self.commit_locked(
            &mut inner,
            vec![Event::QueuePushed {
                queue_id: queue_id.clone(),
                execution_id: execution_id.clone(),
                step_id,
                priority,
                available_at_ms: now_ms + delay.as_millis() as u64,
                epoch_ms: now_ms,
            }],
        )?;
        Ok(queue_id)
    }

    /// Lease up to `batch` available items, most urgent first.
    pub fn lease(
        &self,
        batch: usize,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<Vec<LeaseGrant>, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();

        let mut candidates: Vec<QueueItem> = inner
            .state
            .queue
            .values()
            .filter(|i| i.status == QueueItemStatus::Available && i.available_at_ms <= now_ms)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            (a.priority, a.available_at_ms, &a.id).cmp(&(b.priority, b.available_at_ms, &b.id))
        });
        candidates.truncate(batch);

        let expires_at_ms = now_ms + ttl.as_millis() as u64;
        let mut grants = Vec::with_capacity(candidates.len());
        for item in candidates {
            let lease_token = uuid::Uuid::new_v4().to_string();
            self.commit_locked(
                &mut inner,
                vec![Event::QueueLeased {
                    queue_id: item.id.clone(),
                    worker_id: worker_id.to_string(),
                    lease_token: lease_token.clone(),
                    lease_expires_at_ms: expires_at_ms,
                    epoch_ms: now_ms,
                }],
            )?;
            grants.push(LeaseGrant {
                queue_id: item.id,
                lease_token,
                lease_expires_at_ms: expires_at_ms,
                execution_id: item.execution_id,
                step_id: item.step_id,
                attempt_count: item.attempt_count,
            });
        }
        Ok(grants)
    }

    /// Extend a lease iff the caller still holds it.
    pub fn renew_lease(
        &self,
        queue_id: &str,
        lease_token: &str,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let item = inner
            .state
            .queue
            .get(queue_id)
            .ok_or_else(|| StoreError::NotFound(queue_id.to_string()))?;

        let holds_live_lease = item.status == QueueItemStatus::Leased
            && item.lease_token.as_deref() == Some(lease_token)
            && item.lease_expires_at_ms.is_some_and(|at| at > now_ms);
        if !holds_live_lease {
            return Err(StoreError::StaleLease);
        }

        let expires_at_ms = now_ms + ttl.as_millis() as u64;
        self.commit_locked(
            &mut inner,
            vec![Event::QueueLeaseRenewed {
                queue_id: queue_id.to_string(),
                lease_expires_at_ms: expires_at_ms,
                epoch_ms: now_ms,
            }],
        )?;
        Ok(expires_at_ms)
    }

    /// Complete a leased item. Duplicate acks are accepted silently;
    /// an expired or stale token is rejected.
    pub fn ack(&self, queue_id: &str, lease_token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let item = inner
            .state
            .queue
            .get(queue_id)
            .ok_or_else(|| StoreError::NotFound(queue_id.to_string()))?;

        let holds_live_lease = item.status == QueueItemStatus::Leased
            && item.lease_token.as_deref() == Some(lease_token)
            && item.lease_expires_at_ms.is_some_and(|at| at > now_ms);
        match item.status {
            QueueItemStatus::Completed => Ok(()),
            QueueItemStatus::Leased if holds_live_lease => self.commit_locked(
                &mut inner,
                vec![Event::QueueAcked {
                    queue_id: queue_id.to_string(),
                    epoch_ms: now_ms,
                }],
            ),
            _ => Err(StoreError::StaleLease),
        }
    }

    /// Return a leased item to the queue with backoff, or route it to
    /// the DLQ once the policy's attempt budget is exhausted.
    pub fn nack(
        &self,
        queue_id: &str,
        lease_token: &str,
        delay: Duration,
        reason: NackReason,
    ) -> Result<NackOutcome, StoreError> {
        let mut inner = self.inner.lock();
        self.nack_locked(&mut inner, queue_id, lease_token, delay, reason, false)
    }

    fn nack_locked(
        &self,
        inner: &mut Inner,
        queue_id: &str,
        lease_token: &str,
        delay: Duration,
        reason: NackReason,
        allow_expired: bool,
    ) -> Result<NackOutcome, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let item = inner
            .state
            .queue
            .get(queue_id)
            .ok_or_else(|| StoreError::NotFound(queue_id.to_string()))?
            .clone();

        let lease_live = item.lease_expires_at_ms.is_some_and(|at| at > now_ms);
        if item.status != QueueItemStatus::Leased
            || item.lease_token.as_deref() != Some(lease_token)
            || !(lease_live || allow_expired)
        {
            return Err(StoreError::StaleLease);
        }

        let attempt_count = item.attempt_count + 1;
        let max_attempts = self.max_attempts_of(&inner.state, &item.execution_id);

        if attempt_count >= max_attempts {
            let dlq_id = format!("dlq-{}", uuid::Uuid::new_v4());
            let (kind, message) = inner
                .state
                .executions
                .get(item.execution_id.as_str())
                .and_then(|e| e.first_error.clone())
                .map(|e| (e.kind, e.message))
                .unwrap_or((ErrorKind::WorkerException, reason.to_string()));
            self.commit_locked(
                inner,
                vec![
                    Event::QueueAcked {
                        queue_id: queue_id.to_string(),
                        epoch_ms: now_ms,
                    },
                    Event::DlqAdded {
                        dlq_id: dlq_id.clone(),
                        execution_id: item.execution_id.clone(),
                        kind,
                        message,
                        attempt_count,
                        epoch_ms: now_ms,
                    },
                ],
            )?;
            return Ok(NackOutcome::DeadLettered { dlq_id });
        }

        let available_at_ms = now_ms + delay.as_millis() as u64;
        self.commit_locked(
            inner,
            vec![Event::QueueNacked {
                queue_id: queue_id.to_string(),
                attempt_count,
                available_at_ms,
                reason,
                epoch_ms: now_ms,
            }],
        )?;
        Ok(NackOutcome::Requeued { available_at_ms })
    }

    /// Release expired leases back to the queue.
    pub fn reap_expired_leases(&self) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let expired: Vec<(String, String)> = inner
            .state
            .queue
            .values()
            .filter(|i| i.lease_expired(now_ms))
            .filter_map(|i| i.lease_token.clone().map(|t| (i.id.clone(), t)))
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for (queue_id, token) in expired {
            match self.nack_locked(
                &mut inner,
                &queue_id,
                &token,
                Duration::ZERO,
                NackReason::LeaseExpired,
                true,
            ) {
                Ok(_) => reaped.push(queue_id),
                // Lost a race with renew/ack; the lease is live again
                Err(StoreError::StaleLease) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    /// Max delivery attempts for an execution, from the policy of its
    /// riskiest step.
    fn max_attempts_of(&self, state: &MaterializedState, execution_id: &ExecutionId) -> u32 {
        state
            .executions
            .get(execution_id.as_str())
            .map(|e| {
                let action = e.plan.max_action_class().unwrap_or(ActionClass::Read);
                TimeoutPolicy::lookup(e.sla_class, action).max_attempts
            })
            .unwrap_or(3)
    }

    // ── asset locks ─────────────────────────────────────────────────────

    /// Acquire the exclusive lock for (tenant, asset), or fail LockBusy.
    pub fn acquire_lock(
        &self,
        tenant_id: &TenantId,
        asset_id: &AssetId,
        owner_tag: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();

        if let Some(existing) = inner.state.live_lock(tenant_id, asset_id, now_ms) {
            if existing.owner_tag != owner_tag {
                return Err(StoreError::LockBusy);
            }
            // Re-acquisition by the same owner refreshes the lease
        }

        let lock_id = format!("lock-{}", uuid::Uuid::new_v4());
        let ttl_ms = ttl.as_millis() as u64;
        self.commit_locked(
            &mut inner,
            vec![Event::LockAcquired {
                lock_id: lock_id.clone(),
                tenant_id: tenant_id.clone(),
                asset_id: asset_id.clone(),
                owner_tag: owner_tag.to_string(),
                ttl_ms,
                expires_at_ms: now_ms + ttl_ms,
                epoch_ms: now_ms,
            }],
        )?;
        Ok(lock_id)
    }

    /// Refresh a held lock's expiry.
    pub fn heartbeat_lock(&self, lock_id: &str, owner_tag: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let lock = inner
            .state
            .locks
            .get(lock_id)
            .ok_or(StoreError::StaleLock)?;
        if lock.owner_tag != owner_tag || !lock.is_live(now_ms) {
            return Err(StoreError::StaleLock);
        }
        let expires_at_ms = now_ms + lock.ttl_ms;
        self.commit_locked(
            &mut inner,
            vec![Event::LockHeartbeat {
                lock_id: lock_id.to_string(),
                expires_at_ms,
                epoch_ms: now_ms,
            }],
        )?;
        Ok(expires_at_ms)
    }

    /// Release a held lock. Releasing an expired or non-owned lock is
    /// reported as `StaleLock`, which callers treat as non-fatal.
    pub fn release_lock(&self, lock_id: &str, owner_tag: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let Some(lock) = inner.state.locks.get(lock_id) else {
            return Err(StoreError::StaleLock);
        };
        if lock.owner_tag != owner_tag {
            return Err(StoreError::StaleLock);
        }
        self.commit_locked(
            &mut inner,
            vec![Event::LockReleased {
                lock_id: lock_id.to_string(),
                reaped: false,
                actor_id: None,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    /// Operator override: force-release a lock, recording who did it.
    pub fn release_lock_admin(&self, lock_id: &str, actor_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.locks.contains_key(lock_id) {
            return Err(StoreError::NotFound(lock_id.to_string()));
        }
        warn!(lock_id, actor = actor_id, "Operator forced lock release");
        self.commit_locked(
            &mut inner,
            vec![Event::LockReleased {
                lock_id: lock_id.to_string(),
                reaped: false,
                actor_id: Some(actor_id.to_string()),
                epoch_ms: self.clock.epoch_ms(),
            }],
        )
    }

    /// Release stale locks. Live locks are never evicted, even when the
    /// owning worker is suspected dead; the lease is the source of truth.
    pub fn reap_expired_locks(&self) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let stale: Vec<String> = inner
            .state
            .locks
            .values()
            .filter(|l| !l.is_live(now_ms))
            .map(|l| l.id.clone())
            .collect();

        for lock_id in &stale {
            info!(lock_id, "Reaping stale asset lock");
            self.commit_locked(
                &mut inner,
                vec![Event::LockReleased {
                    lock_id: lock_id.clone(),
                    reaped: true,
                    actor_id: None,
                    epoch_ms: now_ms,
                }],
            )?;
        }
        Ok(stale)
    }

    pub fn list_locks(&self) -> Vec<AssetLock> {
        self.with_state(|state| state.locks.values().cloned().collect())
    }

    // ── dead letters ────────────────────────────────────────────────────

    /// Park a poisoned execution in the DLQ. At most one live (not yet
    /// requeued) row per execution; duplicates return the existing id.
    pub fn send_to_dlq(
        &self,
        execution_id: &ExecutionId,
        kind: ErrorKind,
        message: &str,
        attempt_count: u32,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .state
            .dlq
            .values()
            .find(|item| item.execution_id == *execution_id && !item.requeued)
        {
            return Ok(existing.id.clone());
        }

        let dlq_id = format!("dlq-{}", uuid::Uuid::new_v4());
        self.commit_locked(
            &mut inner,
            vec![Event::DlqAdded {
                dlq_id: dlq_id.clone(),
                execution_id: execution_id.clone(),
                kind,
                message: message.to_string(),
                attempt_count,
                epoch_ms: self.clock.epoch_ms(),
            }],
        )?;
        Ok(dlq_id)
    }

    pub fn list_dlq(&self, tenant: Option<&TenantId>) -> Vec<DlqItem> {
        self.with_state(|state| {
            let mut items: Vec<DlqItem> = state
                .dlq
                .values()
                .filter(|item| {
                    tenant.is_none_or(|t| {
                        state
                            .executions
                            .get(item.execution_id.as_str())
                            .map(|e| &e.tenant_id == t)
                            .unwrap_or(false)
                    })
                })
                .cloned()
                .collect();
            items.sort_by_key(|i| i.failed_at_ms);
            items
        })
    }

    /// Re-arm a dead-lettered execution and put it back on the queue.
    ///
    /// The prior DLQ row is marked requeued rather than deleted, so the
    /// poison history stays inspectable and is never duplicated.
    pub fn requeue_dlq(&self, dlq_id: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();
        let item = inner
            .state
            .dlq
            .get(dlq_id)
            .ok_or_else(|| StoreError::NotFound(dlq_id.to_string()))?
            .clone();
        if item.requeued {
            return Err(StoreError::AlreadyRequeued(dlq_id.to_string()));
        }
        let execution = inner
            .state
            .executions
            .get(item.execution_id.as_str())
            .ok_or_else(|| StoreError::NotFound(item.execution_id.as_str().to_string()))?;

        let queue_id = format!("q-{}", uuid::Uuid::new_v4());
        let mut events = vec![Event::DlqRequeued {
            dlq_id: dlq_id.to_string(),
            queue_id: queue_id.clone(),
            epoch_ms: now_ms,
        }];
        // A dead-lettered execution is usually terminal; the requeue edge
        // back to QUEUED exists only on this operator path.
        if execution.is_terminal() {
            events.push(Event::ExecutionTransitioned {
                id: execution.id.clone(),
                from: execution.status,
                to: ExecutionStatus::Queued,
                reason: Some("dlq_requeue".to_string()),
                actor_id: None,
                epoch_ms: now_ms,
            });
        }
        events.push(Event::QueuePushed {
            queue_id: queue_id.clone(),
            execution_id: item.execution_id.clone(),
            step_id: None,
            priority: execution.priority,
            available_at_ms: now_ms,
            epoch_ms: now_ms,
        });
        self.commit_locked(&mut inner, events)?;
        Ok(queue_id)
    }

    // ── retention ───────────────────────────────────────────────────────

    /// Prune completed queue rows older than 24h and terminal executions
    /// past the audit retention window.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.epoch_ms();

        let stale_queue: Vec<String> = inner
            .state
            .queue
            .values()
            .filter(|i| {
                i.status == QueueItemStatus::Completed
                    && i.completed_at_ms
                        .is_some_and(|at| now_ms >= at + RETENTION_COMPLETED_QUEUE_MS)
            })
            .map(|i| i.id.clone())
            .collect();

        let stale_executions: Vec<ExecutionId> = inner
            .state
            .executions
            .values()
            .filter(|e| {
                e.is_terminal()
                    && e.finished_at_ms
                        .is_some_and(|at| now_ms >= at + RETENTION_AUDIT_MS)
            })
            .map(|e| e.id.clone())
            .collect();

        let mut events: Vec<Event> = Vec::new();
        events.extend(
            stale_queue
                .into_iter()
                .map(|queue_id| Event::QueuePruned { queue_id }),
        );
        events.extend(
            stale_executions
                .into_iter()
                .map(|id| Event::ExecutionPruned { id }),
        );

        let pruned = events.len();
        if pruned > 0 {
            self.commit_locked(&mut inner, events)?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
