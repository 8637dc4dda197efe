// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conductor locks` - asset lock inspection and operator release.

use crate::client::DaemonClient;
use crate::output::print_locks;
use anyhow::{bail, Result};
use cdr_core::{Clock, SystemClock};
use cdr_daemon::protocol::{Request, Response};
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct LocksArgs {
    #[command(subcommand)]
    command: LocksCommand,
}

#[derive(Subcommand)]
enum LocksCommand {
    /// List asset locks
    List {
        /// Only locks on this asset
        #[arg(long, value_name = "A")]
        asset: Option<String>,
        /// Only locks whose lease has lapsed
        #[arg(long)]
        expired: bool,
    },
    /// Force-release a lock (operator override; audited)
    Release {
        /// Lock id
        lock_id: String,
    },
}

pub async fn run(args: LocksArgs) -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    match args.command {
        LocksCommand::List { asset, expired } => {
            let response = client
                .request(Request::LocksList {
                    asset_id: asset,
                    expired_only: expired,
                })
                .await?;
            let Response::Locks { locks } = response else {
                bail!("unexpected response from daemon");
            };
            print_locks(&locks, SystemClock.epoch_ms());
        }
        LocksCommand::Release { lock_id } => {
            let actor = whoami();
            let response = client
                .request(Request::LockRelease {
                    lock_id,
                    actor_id: actor,
                })
                .await?;
            let Response::Ok = response else {
                bail!("unexpected response from daemon");
            };
            println!("released");
        }
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}
