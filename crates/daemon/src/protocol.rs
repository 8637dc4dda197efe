// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol for the admin socket.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.

use cdr_core::{
    AuditRecord, Execution, ExecutionId, PlanSnapshot, Step, SubmitOptions, TenantId,
};
use cdr_storage::{AssetLock, DlqItem};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Summarized engine state
    Status,

    /// Submit a plan for execution
    Submit {
        plan: PlanSnapshot,
        actor_id: String,
        tenant_id: TenantId,
        #[serde(default)]
        options: SubmitOptions,
    },

    /// Act on a pending approval gate
    Approve {
        execution_id: ExecutionId,
        plan_hash: String,
        actor_id: String,
        approve: bool,
    },

    /// Request cooperative cancellation
    Cancel {
        execution_id: ExecutionId,
        actor_id: String,
    },

    /// Fetch one execution with its steps
    GetExecution { execution_id: String },

    /// Ordered audit page strictly after `sequence`
    EventsSince {
        execution_id: ExecutionId,
        sequence: u64,
    },

    /// List dead-letter items, optionally scoped to a tenant
    DlqList { tenant_id: Option<TenantId> },

    /// Requeue one dead-letter item
    DlqRequeue { dlq_id: String },

    /// List asset locks
    LocksList {
        asset_id: Option<String>,
        expired_only: bool,
    },

    /// Operator override: force-release a lock
    LockRelease { lock_id: String, actor_id: String },

    /// Request daemon shutdown
    Shutdown,
}

/// Aggregate state counts for `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSummary {
    pub version: String,
    pub uptime_ms: u64,
    pub executions_by_status: HashMap<String, u32>,
    pub queue_available: u32,
    pub queue_leased: u32,
    pub dlq_depth: u32,
    pub live_locks: u32,
    pub unhealthy_workers: u32,
}

/// Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Pong { version: String },
    Status { summary: StatusSummary },
    Submitted {
        execution_id: ExecutionId,
        status: String,
        deduplicated: bool,
    },
    State { status: String },
    Execution {
        execution: Box<Execution>,
        steps: Vec<Step>,
    },
    Events { events: Vec<AuditRecord> },
    DlqItems { items: Vec<DlqItem> },
    Locks { locks: Vec<AssetLock> },
    Requeued { queue_id: String },
    Ok,
    Error { message: String },
}

/// Write a length-prefixed message to the stream.
pub async fn write_message<T, W>(stream: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    stream.write_all(&(json.len() as u32).to_be_bytes()).await?;
    stream.write_all(&json).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a length-prefixed message from the stream.
pub async fn read_message<T, R>(stream: &mut R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncReadExt + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
