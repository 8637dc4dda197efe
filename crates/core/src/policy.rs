// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout policy matrix keyed by (SLA class, action class).

use crate::execution::SlaClass;
use crate::step::ActionClass;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum lease buffer on top of the step timeout.
pub const LEASE_BUFFER_FLOOR: Duration = Duration::from_secs(2);

const BACKOFF_BASE_MS: u64 = 30_000;
const BACKOFF_CAP_MS: u64 = 600_000;

/// Timeouts and retry budget for one (SLA, action) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub step_timeout: Duration,
    pub execution_timeout: Duration,
    pub max_attempts: u32,
}

impl TimeoutPolicy {
    /// Look up the seeded policy matrix.
    pub fn lookup(sla: SlaClass, action: ActionClass) -> TimeoutPolicy {
        let (step_s, exec_s, attempts) = match (sla, action) {
            (SlaClass::Fast, ActionClass::Read) => (5, 10, 3),
            (SlaClass::Fast, ActionClass::Modify) => (8, 15, 3),
            (SlaClass::Fast, ActionClass::Deploy) => (10, 20, 3),
            (SlaClass::Medium, ActionClass::Read) => (15, 30, 5),
            (SlaClass::Medium, ActionClass::Modify) => (20, 45, 5),
            (SlaClass::Medium, ActionClass::Deploy) => (30, 60, 5),
            (SlaClass::Long, ActionClass::Read) => (60, 300, 3),
            (SlaClass::Long, ActionClass::Modify) => (120, 600, 3),
            (SlaClass::Long, ActionClass::Deploy) => (300, 1800, 3),
        };
        TimeoutPolicy {
            step_timeout: Duration::from_secs(step_s),
            execution_timeout: Duration::from_secs(exec_s),
            max_attempts: attempts,
        }
    }

    /// Queue lease TTL: step timeout plus a proportional buffer (20% of
    /// the step timeout, floored at 2 s) plus the configured extra.
    pub fn lease_ttl(&self, extra_buffer: Duration) -> Duration {
        let buffer = (self.step_timeout / 5).max(LEASE_BUFFER_FLOOR);
        self.step_timeout + buffer + extra_buffer
    }
}

/// Delay before retry attempt `n` (1-based).
///
/// `min(30s * 2^(n-1), 10min)` scaled by a uniform jitter in [0.5, 1.5).
pub fn retry_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let base = BACKOFF_BASE_MS.saturating_mul(1 << exp).min(BACKOFF_CAP_MS);
    let jitter = rand::rng().random_range(0.5..1.5);
    Duration::from_millis((base as f64 * jitter) as u64)
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
