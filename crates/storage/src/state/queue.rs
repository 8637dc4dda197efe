// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work queue event handlers.

use super::{MaterializedState, QueueItem, QueueItemStatus};
use cdr_core::{AuditRecord, Event};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::QueuePushed {
            queue_id,
            execution_id,
            step_id,
            priority,
            available_at_ms,
            epoch_ms,
        } => {
            // Idempotency: skip if item already exists
            if !state.queue.contains_key(queue_id) {
                state.queue.insert(
                    queue_id.clone(),
                    QueueItem {
                        id: queue_id.clone(),
                        execution_id: execution_id.clone(),
                        step_id: step_id.clone(),
                        priority: *priority,
                        status: QueueItemStatus::Available,
                        enqueued_at_ms: *epoch_ms,
                        available_at_ms: *available_at_ms,
                        lease_owner: None,
                        lease_token: None,
                        lease_expires_at_ms: None,
                        attempt_count: 0,
                        completed_at_ms: None,
                    },
                );
            }
            None
        }

        Event::QueueLeased {
            queue_id,
            worker_id,
            lease_token,
            lease_expires_at_ms,
            ..
        } => {
            let item = state.queue.get_mut(queue_id)?;
            // Idempotency: a lease only takes an available item. Counting
            // delivery attempts here keeps the execution's attempt_count
            // correct across replay.
            if item.status != QueueItemStatus::Available {
                return None;
            }
            item.status = QueueItemStatus::Leased;
            item.lease_owner = Some(worker_id.clone());
            item.lease_token = Some(lease_token.clone());
            item.lease_expires_at_ms = Some(*lease_expires_at_ms);
            if let Some(execution) = state.executions.get_mut(item.execution_id.as_str()) {
                execution.attempt_count += 1;
            }
            None
        }

        Event::QueueLeaseRenewed {
            queue_id,
            lease_expires_at_ms,
            ..
        } => {
            if let Some(item) = state.queue.get_mut(queue_id) {
                if item.status == QueueItemStatus::Leased {
                    item.lease_expires_at_ms = Some(*lease_expires_at_ms);
                }
            }
            None
        }

        Event::QueueAcked { queue_id, epoch_ms } => {
            if let Some(item) = state.queue.get_mut(queue_id) {
                if item.status != QueueItemStatus::Completed {
                    item.status = QueueItemStatus::Completed;
                    item.completed_at_ms = Some(*epoch_ms);
                    item.lease_owner = None;
                    item.lease_token = None;
                    item.lease_expires_at_ms = None;
                }
            }
            None
        }

        Event::QueueNacked {
            queue_id,
            attempt_count,
            available_at_ms,
            ..
        } => {
            let item = state.queue.get_mut(queue_id)?;
            if item.status != QueueItemStatus::Leased {
                return None;
            }
            item.status = QueueItemStatus::Available;
            item.attempt_count = *attempt_count;
            item.available_at_ms = *available_at_ms;
            item.lease_owner = None;
            item.lease_token = None;
            item.lease_expires_at_ms = None;
            None
        }

        Event::QueuePruned { queue_id } => {
            state.queue.remove(queue_id);
            None
        }

        _ => None,
    }
}
