// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine tuning knobs, environment-first with CLI overrides.

use std::time::Duration;

/// Configuration for the worker pool, queue and dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Items leased per poll.
    pub queue_batch: usize,
    /// Default queue lease TTL; renewed at TTL/3 while a run is live.
    pub lease_ttl: Duration,
    /// Extra buffer added on top of the per-policy lease TTL.
    pub lease_buffer: Duration,
    /// Plans at or under this expected duration (and FAST SLA) take the
    /// immediate path.
    pub immediate_threshold: Duration,
    /// Idle worker poll interval.
    pub poll_interval: Duration,
    /// Janitor sweep cadence.
    pub janitor_interval: Duration,
    /// Grace given to in-flight work at shutdown before leases are
    /// abandoned to the reaper.
    pub hard_stop_grace: Duration,
    /// Upper bound on waiting for a busy asset mutex before the step
    /// fails ASSET_BUSY.
    pub mutex_wait_max: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_batch: 1,
            lease_ttl: Duration::from_secs(30),
            lease_buffer: Duration::from_secs(2),
            immediate_threshold: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            janitor_interval: Duration::from_secs(1),
            hard_stop_grace: Duration::from_secs(10),
            mutex_wait_max: Duration::from_secs(5),
        }
    }
}

/// Default queue priority per dispatch mode (lower is more urgent).
pub(crate) const PRIORITY_IMMEDIATE: i32 = 10;
pub(crate) const PRIORITY_BACKGROUND: i32 = 100;
