// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conductor events tail` - follow an execution's audit stream.
//!
//! Polls `events_since` with the last seen sequence; restartable and
//! stateless on the daemon side.

use crate::client::DaemonClient;
use crate::output::print_event;
use anyhow::{bail, Result};
use cdr_core::ExecutionId;
use cdr_daemon::protocol::{Request, Response};
use clap::{Args, Subcommand};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct EventsArgs {
    #[command(subcommand)]
    command: EventsCommand,
}

#[derive(Subcommand)]
enum EventsCommand {
    /// Print an execution's events and follow until it terminates
    Tail {
        /// Execution id
        execution_id: String,
        /// Exit after the catch-up page instead of following
        #[arg(long)]
        no_follow: bool,
    },
}

pub async fn run(args: EventsArgs) -> Result<()> {
    let EventsCommand::Tail {
        execution_id,
        no_follow,
    } = args.command;
    let mut client = DaemonClient::connect().await?;
    let execution_id = ExecutionId::new(execution_id);
    let mut last_sequence = 0u64;

    loop {
        let response = client
            .request(Request::EventsSince {
                execution_id: execution_id.clone(),
                sequence: last_sequence,
            })
            .await?;
        let Response::Events { events } = response else {
            bail!("unexpected response from daemon");
        };
        for event in &events {
            print_event(event);
            last_sequence = last_sequence.max(event.sequence);
        }

        if no_follow {
            return Ok(());
        }

        // Stop once the execution has reached a terminal state
        let response = client
            .request(Request::GetExecution {
                execution_id: execution_id.as_str().to_string(),
            })
            .await?;
        let Response::Execution { execution, .. } = response else {
            bail!("unexpected response from daemon");
        };
        if execution.is_terminal() {
            return Ok(());
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
