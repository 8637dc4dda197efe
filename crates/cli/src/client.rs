// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin-socket client for the running daemon.

use anyhow::{anyhow, Context, Result};
use cdr_daemon::protocol::{read_message, write_message, Request, Response};
use cdr_daemon::Config;
use tokio::net::UnixStream;

pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon's admin socket.
    pub async fn connect() -> Result<Self> {
        let config = Config::load().map_err(|e| anyhow!("{e}"))?;
        let stream = UnixStream::connect(&config.socket_path)
            .await
            .with_context(|| {
                format!(
                    "engine is not running (no socket at {})",
                    config.socket_path.display()
                )
            })?;
        Ok(Self { stream })
    }

    /// Send one request and await its response.
    pub async fn request(&mut self, request: Request) -> Result<Response> {
        write_message(&mut self.stream, &request).await?;
        let response: Response = read_message(&mut self.stream).await?;
        if let Response::Error { message } = &response {
            return Err(anyhow!("{message}"));
        }
        Ok(response)
    }
}
