// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Storage layer for the Conductor engine.
//!
//! The write-ahead log is the single source of truth; the materialized
//! state is a replayable projection of it. The [`Store`] façade wraps
//! both behind transactional operations.

mod snapshot;
mod state;
mod store;
mod wal;

pub use snapshot::{Snapshot, SnapshotError};
pub use state::{
    AssetLock, DlqItem, MaterializedState, QueueItem, QueueItemStatus, RETENTION_AUDIT_MS,
    RETENTION_COMPLETED_QUEUE_MS,
};
pub use store::{LeaseGrant, NackOutcome, Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
