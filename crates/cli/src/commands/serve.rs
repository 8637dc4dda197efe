// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conductor serve` - run the engine service in the foreground.

use anyhow::{anyhow, Result};
use cdr_daemon::lifecycle::{init_logging, Daemon};
use cdr_daemon::Config;
use clap::Args;
use std::sync::Arc;

#[derive(Args)]
pub struct ServeArgs {
    /// Number of concurrent workers
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Queue items leased per poll
    #[arg(long = "queue-batch", value_name = "K")]
    queue_batch: Option<usize>,

    /// Queue lease TTL in seconds
    #[arg(long = "lease-ttl", value_name = "D")]
    lease_ttl: Option<u64>,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = Config::load().map_err(|e| anyhow!("{e}"))?;
    let _log_guard = init_logging(&config);

    let mut engine_config = config.engine_config();
    if let Some(workers) = args.workers {
        engine_config.workers = workers;
    }
    if let Some(batch) = args.queue_batch {
        engine_config.queue_batch = batch;
    }
    if let Some(ttl) = args.lease_ttl {
        engine_config.lease_ttl = std::time::Duration::from_secs(ttl);
    }

    let daemon = Arc::new(Daemon::start(config, engine_config).map_err(|e| anyhow!("{e}"))?);
    println!("conductor serving (socket: {})", daemon.config.socket_path.display());
    daemon.run().await.map_err(|e| anyhow!("{e}"))
}
