// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for external I/O: the Asset and Automation execution
//! services and the secret store.

pub mod contract;
pub mod http;
pub mod secrets;

pub use contract::{AdapterError, AdapterResponse, ExitStatus, StepAdapter, StepSpec};
pub use http::{HttpStepAdapter, HttpStepAdapterConfig};
pub use secrets::{HttpSecretStore, SecretResolveError, SecretStoreAdapter};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ExecuteCall, FakeSecretStore, FakeStepAdapter, ScriptedOutcome};
