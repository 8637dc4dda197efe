// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for the admin socket.
//!
//! Accepts connections and answers one request per message without
//! blocking the worker pool. All responses are already masked: the
//! store never holds unmasked payloads.

use std::collections::HashMap;
use std::sync::Arc;

use cdr_engine::{ApproveDecision, EngineError};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::lifecycle::Daemon;
use crate::protocol::{
    read_message, write_message, Request, Response, StatusSummary, PROTOCOL_VERSION,
};

/// Listener task for accepting socket connections.
pub struct Listener {
    socket: UnixListener,
    daemon: Arc<Daemon>,
}

impl Listener {
    pub fn new(socket: UnixListener, daemon: Arc<Daemon>) -> Self {
        Self { socket, daemon }
    }

    /// Run the accept loop, spawning a task per connection.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _)) => {
                    let daemon = Arc::clone(&self.daemon);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, daemon).await {
                            debug!(error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    daemon: Arc<Daemon>,
) -> Result<(), crate::protocol::ProtocolError> {
    loop {
        let request: Request = match read_message(&mut stream).await {
            Ok(request) => request,
            Err(crate::protocol::ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = handle_request(&daemon, request).await;
        write_message(&mut stream, &response).await?;
    }
}

fn engine_error_response(error: EngineError) -> Response {
    Response::Error {
        message: error.to_string(),
    }
}

async fn handle_request(daemon: &Arc<Daemon>, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Status => Response::Status {
            summary: status_summary(daemon),
        },

        Request::Submit {
            plan,
            actor_id,
            tenant_id,
            options,
        } => match daemon.dispatcher.submit(plan, &actor_id, &tenant_id, options) {
            Ok(receipt) => Response::Submitted {
                execution_id: receipt.execution_id,
                status: receipt.status.to_string(),
                deduplicated: receipt.deduplicated,
            },
            Err(e) => engine_error_response(e),
        },

        Request::Approve {
            execution_id,
            plan_hash,
            actor_id,
            approve,
        } => {
            let decision = if approve {
                ApproveDecision::Approve
            } else {
                ApproveDecision::Reject
            };
            match daemon
                .dispatcher
                .approve(&execution_id, &plan_hash, &actor_id, decision)
                .await
            {
                Ok(status) => Response::State {
                    status: status.to_string(),
                },
                Err(e) => engine_error_response(e),
            }
        }

        Request::Cancel {
            execution_id,
            actor_id,
        } => match daemon.dispatcher.cancel(&execution_id, &actor_id) {
            Ok(status) => Response::State {
                status: status.to_string(),
            },
            Err(e) => engine_error_response(e),
        },

        Request::GetExecution { execution_id } => match daemon.dispatcher.get(&execution_id) {
            Ok(view) => Response::Execution {
                execution: Box::new(view.execution),
                steps: view.steps,
            },
            Err(e) => engine_error_response(e),
        },

        Request::EventsSince {
            execution_id,
            sequence,
        } => match daemon.dispatcher.events_since(&execution_id, sequence) {
            Ok(events) => Response::Events { events },
            Err(e) => engine_error_response(e),
        },

        Request::DlqList { tenant_id } => Response::DlqItems {
            items: daemon.store.list_dlq(tenant_id.as_ref()),
        },

        Request::DlqRequeue { dlq_id } => match daemon.store.requeue_dlq(&dlq_id) {
            Ok(queue_id) => Response::Requeued { queue_id },
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        },

        Request::LocksList {
            asset_id,
            expired_only,
        } => {
            let now_ms = now_ms();
            let locks = daemon
                .store
                .list_locks()
                .into_iter()
                .filter(|l| {
                    asset_id
                        .as_deref()
                        .is_none_or(|a| l.asset_id.as_str() == a)
                })
                .filter(|l| !expired_only || !l.is_live(now_ms))
                .collect();
            Response::Locks { locks }
        }

        Request::LockRelease { lock_id, actor_id } => {
            match daemon.store.release_lock_admin(&lock_id, &actor_id) {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }

        Request::Shutdown => {
            daemon.shutdown_token().cancel();
            Response::Ok
        }
    }
}

fn now_ms() -> u64 {
    use cdr_core::Clock;
    cdr_core::SystemClock.epoch_ms()
}

fn status_summary(daemon: &Arc<Daemon>) -> StatusSummary {
    let now = now_ms();
    daemon.store.with_state(|state| {
        let mut executions_by_status: HashMap<String, u32> = HashMap::new();
        for execution in state.executions.values() {
            *executions_by_status
                .entry(execution.status.to_string())
                .or_default() += 1;
        }
        let queue_available = state
            .queue
            .values()
            .filter(|i| i.status == cdr_storage::QueueItemStatus::Available)
            .count() as u32;
        let queue_leased = state
            .queue
            .values()
            .filter(|i| i.status == cdr_storage::QueueItemStatus::Leased)
            .count() as u32;
        let dlq_depth = state.dlq.values().filter(|d| !d.requeued).count() as u32;
        let live_locks = state.locks.values().filter(|l| l.is_live(now)).count() as u32;

        StatusSummary {
            version: PROTOCOL_VERSION.to_string(),
            uptime_ms: daemon.uptime_ms(),
            executions_by_status,
            queue_available,
            queue_leased,
            dlq_depth,
            live_locks,
            unhealthy_workers: daemon.unhealthy_workers() as u32,
        }
    })
}
