// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cdr-core: Domain types for the Conductor execution engine

pub mod approval;
pub mod clock;
pub mod error;
pub mod event;
pub mod execution;
pub mod id;
pub mod plan;
pub mod policy;
pub mod redact;
pub mod secret;
pub mod step;
pub mod time_fmt;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use approval::{Approval, ApprovalId, ApprovalLevel, ApprovalState};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{ErrorKind, StepError};
pub use event::{AuditKind, AuditRecord, Event, NackReason};
pub use execution::{Execution, ExecutionId, ExecutionStatus, Mode, SlaClass};
pub use id::{AssetId, IdGen, SequentialIdGen, ShortId, TenantId, UuidIdGen};
pub use plan::{plan_hash, AdapterKind, PlanSnapshot, PlanStep, SubmitOptions};
pub use policy::{retry_backoff, TimeoutPolicy, LEASE_BUFFER_FLOOR};
pub use redact::LogMasker;
pub use secret::{SecretRef, SecretValue};
pub use step::{
    cap_artifacts, ActionClass, AdapterVerdict, Step, StepId, StepResult, StepStatus,
    ARTIFACT_LIMIT_BYTES,
};
pub use time_fmt::{format_elapsed, format_elapsed_ms};
