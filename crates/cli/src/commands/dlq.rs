// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conductor dlq` - dead-letter inspection and requeue.

use crate::client::DaemonClient;
use crate::output::print_dlq_items;
use anyhow::{bail, Result};
use cdr_core::TenantId;
use cdr_daemon::protocol::{Request, Response};
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct DlqArgs {
    #[command(subcommand)]
    command: DlqCommand,
}

#[derive(Subcommand)]
enum DlqCommand {
    /// List dead-letter items
    List {
        /// Only items belonging to this tenant
        #[arg(long, value_name = "T")]
        tenant: Option<String>,
    },
    /// Requeue a dead-letter item for another run
    Requeue {
        /// DLQ item id
        dlq_id: String,
    },
}

pub async fn run(args: DlqArgs) -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    match args.command {
        DlqCommand::List { tenant } => {
            let response = client
                .request(Request::DlqList {
                    tenant_id: tenant.map(TenantId::new),
                })
                .await?;
            let Response::DlqItems { items } = response else {
                bail!("unexpected response from daemon");
            };
            print_dlq_items(&items);
        }
        DlqCommand::Requeue { dlq_id } => {
            let response = client.request(Request::DlqRequeue { dlq_id }).await?;
            let Response::Requeued { queue_id } = response else {
                bail!("unexpected response from daemon");
            };
            println!("requeued as {queue_id}");
        }
    }
    Ok(())
}
