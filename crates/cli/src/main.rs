// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! conductor - execution engine CLI

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{dlq, events, locks, serve, status};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Conductor - safe plan execution against remote assets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine service
    Serve(serve::ServeArgs),
    /// Dead-letter queue management
    Dlq(dlq::DlqArgs),
    /// Asset lock management
    Locks(locks::LocksArgs),
    /// Event stream access
    Events(events::EventsArgs),
    /// Engine status summary
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => serve::run(args).await,
        Commands::Dlq(args) => dlq::run(args).await,
        Commands::Locks(args) => locks::run(args).await,
        Commands::Events(args) => events::run(args).await,
        Commands::Status => status::run().await,
    }
}
