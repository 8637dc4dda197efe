// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve the state directory from `ENGINE_STORE_DSN`.
///
/// Accepts a plain path or a `file:` prefixed DSN. Falls back to
/// `~/.local/state/conductor`.
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dsn) = std::env::var("ENGINE_STORE_DSN") {
        let path = dsn.strip_prefix("file:").unwrap_or(&dsn);
        return Ok(PathBuf::from(path));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("conductor"));
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".local/state/conductor"))
}

pub fn secret_store_url() -> Option<String> {
    std::env::var("ENGINE_SECRET_STORE_URL").ok()
}

pub fn asset_adapter_url() -> Option<String> {
    std::env::var("ENGINE_ASSET_ADAPTER_URL").ok()
}

pub fn automation_adapter_url() -> Option<String> {
    std::env::var("ENGINE_AUTOMATION_ADAPTER_URL").ok()
}

pub fn workers() -> Option<usize> {
    std::env::var("ENGINE_WORKERS").ok().and_then(|s| s.parse().ok())
}

pub fn queue_batch() -> Option<usize> {
    std::env::var("ENGINE_QUEUE_BATCH")
        .ok()
        .and_then(|s| s.parse().ok())
}

pub fn lease_buffer() -> Option<Duration> {
    std::env::var("ENGINE_LEASE_BUFFER_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

pub fn immediate_threshold() -> Option<Duration> {
    std::env::var("ENGINE_IMMEDIATE_THRESHOLD_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Log filter string; `ENGINE_LOG_LEVEL` falls back to "info".
pub fn log_level() -> String {
    std::env::var("ENGINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
