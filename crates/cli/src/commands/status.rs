// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conductor status` - engine state at a glance.

use crate::client::DaemonClient;
use anyhow::{bail, Result};
use cdr_core::format_elapsed_ms;
use cdr_daemon::protocol::{Request, Response};

pub async fn run() -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    let response = client.request(Request::Status).await?;
    let Response::Status { summary } = response else {
        bail!("unexpected response from daemon");
    };

    println!(
        "conductor {} (up {})",
        summary.version,
        format_elapsed_ms(summary.uptime_ms)
    );
    println!(
        "queue: {} available, {} leased; dlq: {}; locks: {}",
        summary.queue_available, summary.queue_leased, summary.dlq_depth, summary.live_locks
    );
    if summary.unhealthy_workers > 0 {
        println!("workers: {} unhealthy", summary.unhealthy_workers);
    }

    if summary.executions_by_status.is_empty() {
        println!("no executions");
        return Ok(());
    }
    let mut entries: Vec<_> = summary.executions_by_status.iter().collect();
    entries.sort();
    println!("executions:");
    for (status, count) in entries {
        println!("  {status:<18} {count}");
    }
    Ok(())
}
