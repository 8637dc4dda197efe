// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain-text output helpers.

use cdr_core::{format_elapsed_ms, AuditRecord, ShortId};
use cdr_storage::{AssetLock, DlqItem};

/// One audit row for `events tail`.
pub fn print_event(record: &AuditRecord) {
    let step = record
        .step_id
        .as_ref()
        .map(|s| format!(" step={s}"))
        .unwrap_or_default();
    let change = match (&record.from_status, &record.to_status) {
        (Some(from), Some(to)) => format!(" {from} -> {to}"),
        (None, Some(to)) => format!(" -> {to}"),
        _ => String::new(),
    };
    let payload = if record.payload.is_null() {
        String::new()
    } else {
        format!(" {}", record.payload)
    };
    println!(
        "#{:<4} {:?}{}{}{}",
        record.sequence, record.kind, step, change, payload
    );
}

pub fn print_dlq_items(items: &[DlqItem]) {
    if items.is_empty() {
        println!("dead-letter queue is empty");
        return;
    }
    println!(
        "{:<40} {:<26} {:<24} {:>8}  {}",
        "ID", "EXECUTION", "KIND", "ATTEMPTS", "STATE"
    );
    for item in items {
        let state = if item.requeued { "requeued" } else { "parked" };
        println!(
            "{:<40} {:<26} {:<24} {:>8}  {}",
            item.id,
            item.execution_id.short(24),
            item.kind.to_string(),
            item.attempt_count,
            state,
        );
    }
}

pub fn print_locks(locks: &[AssetLock], now_ms: u64) {
    if locks.is_empty() {
        println!("no asset locks held");
        return;
    }
    println!(
        "{:<42} {:<18} {:<40} {:<8} {}",
        "ID", "ASSET", "OWNER", "STATE", "AGE"
    );
    for lock in locks {
        let state = if lock.is_live(now_ms) { "live" } else { "stale" };
        let age = format_elapsed_ms(now_ms.saturating_sub(lock.acquired_at_ms));
        println!(
            "{:<42} {:<18} {:<40} {:<8} {}",
            lock.id,
            lock.asset_id.short(18),
            lock.owner_tag.short(40),
            state,
            age,
        );
    }
}
