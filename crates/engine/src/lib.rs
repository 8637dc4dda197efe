// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Conductor execution engine: workers lease plans from the durable
//! queue and drive them step by step through the safety layer (RBAC,
//! asset mutexes, JIT secrets, deadlines, cooperative cancellation).

pub mod cancel;
pub mod config;
mod deadline;
mod dispatcher;
mod error;
mod idempotency;
mod janitor;
pub mod mutex;
pub mod rbac;
mod runner;
pub mod secrets;
mod worker;

#[cfg(test)]
pub mod test_helpers;

pub use cancel::CancellationRegistry;
pub use config::EngineConfig;
pub use dispatcher::{ApproveDecision, Dispatcher, ExecutionView, SubmitReceipt};
pub use error::EngineError;
pub use idempotency::{IdempotencyGuard, Registration};
pub use janitor::Janitor;
pub use mutex::{AcquireOutcome, LockHandle, MutexService};
pub use rbac::{AllowAllOracle, CachingRbacValidator, RbacDecision, RoleOracle, StaticOracle};
pub use runner::{ExecutionEngine, RunOutcome};
pub use secrets::SecretBundle;
pub use worker::{EngineDeps, WorkerPool};
