// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asset lock event handlers.

use super::{audit_row, AssetLock, MaterializedState};
use cdr_core::{AuditKind, AuditRecord, Event, ExecutionId};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) -> Option<AuditRecord> {
    match event {
        Event::LockAcquired {
            lock_id,
            tenant_id,
            asset_id,
            owner_tag,
            ttl_ms,
            expires_at_ms,
            epoch_ms,
        } => {
            // The store validated exclusivity before appending, so any
            // remaining row for this (tenant, asset) pair is stale.
            state
                .locks
                .retain(|_, l| !(l.tenant_id == *tenant_id && l.asset_id == *asset_id));
            state.locks.insert(
                lock_id.clone(),
                AssetLock {
                    id: lock_id.clone(),
                    tenant_id: tenant_id.clone(),
                    asset_id: asset_id.clone(),
                    owner_tag: owner_tag.clone(),
                    ttl_ms: *ttl_ms,
                    acquired_at_ms: *epoch_ms,
                    expires_at_ms: *expires_at_ms,
                    last_heartbeat_at_ms: *epoch_ms,
                },
            );
            None
        }

        Event::LockHeartbeat {
            lock_id,
            expires_at_ms,
            epoch_ms,
        } => {
            if let Some(lock) = state.locks.get_mut(lock_id) {
                lock.expires_at_ms = *expires_at_ms;
                lock.last_heartbeat_at_ms = *epoch_ms;
            }
            None
        }

        Event::LockReleased {
            lock_id,
            actor_id,
            epoch_ms,
            ..
        } => {
            let removed = state.locks.remove(lock_id);

            // An operator override lands on the owning execution's audit
            // trail; owner releases and reaper sweeps stay log-only. The
            // owner tag is an `execution/worker/step` composite, so the
            // segment before the first slash is the execution id.
            let (Some(actor), Some(lock)) = (actor_id, removed) else {
                return None;
            };
            let execution_id = lock.owner_tag.split('/').next().unwrap_or_default();
            if !state.executions.contains_key(execution_id) {
                return None;
            }
            let mut row = audit_row(
                ExecutionId::new(execution_id),
                None,
                AuditKind::Audit,
                *epoch_ms,
            );
            row.actor_id = Some(actor.clone());
            row.payload = serde_json::json!({
                "lock_id": lock_id,
                "asset_id": lock.asset_id,
                "owner_tag": lock.owner_tag,
                "released": "operator_override",
            });
            Some(state.push_audit(row))
        }

        _ => None,
    }
}
