// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, recovery, shutdown.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdr_adapters::{HttpSecretStore, HttpStepAdapter};
use cdr_core::{SystemClock, UuidIdGen};
use cdr_engine::{
    AllowAllOracle, CachingRbacValidator, CancellationRegistry, Dispatcher, EngineConfig,
    EngineDeps, Janitor, WorkerPool,
};
use cdr_storage::Store;
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env;
use crate::listener::Listener;

/// How often the WAL flusher wakes up.
const FLUSH_TICK: Duration = Duration::from_millis(10);

/// How often a checkpoint is taken.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(300);

/// Errors during daemon startup/shutdown
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine a state directory")]
    NoStateDir,
    #[error("another daemon instance holds the lock at {0}")]
    AlreadyRunning(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] cdr_storage::StoreError),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory
    pub state_dir: PathBuf,
    /// Path to the admin Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Base URL of the asset execution service
    pub asset_adapter_url: String,
    /// Base URL of the automation execution service
    pub automation_adapter_url: String,
    /// Base URL of the secret store
    pub secret_store_url: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            socket_path: state_dir.join("conductord.sock"),
            lock_path: state_dir.join("conductord.pid"),
            log_path: state_dir.join("conductord.log"),
            asset_adapter_url: env::asset_adapter_url()
                .unwrap_or_else(|| "http://127.0.0.1:7301".to_string()),
            automation_adapter_url: env::automation_adapter_url()
                .unwrap_or_else(|| "http://127.0.0.1:7302".to_string()),
            secret_store_url: env::secret_store_url()
                .unwrap_or_else(|| "http://127.0.0.1:7303".to_string()),
            state_dir,
        })
    }

    /// Engine tuning from the environment, with CLI overrides applied
    /// by the caller.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(workers) = env::workers() {
            config.workers = workers;
        }
        if let Some(batch) = env::queue_batch() {
            config.queue_batch = batch;
        }
        if let Some(buffer) = env::lease_buffer() {
            config.lease_buffer = buffer;
        }
        if let Some(threshold) = env::immediate_threshold() {
            config.immediate_threshold = threshold;
        }
        config
    }
}

/// A running daemon: store, dispatcher, worker pool, janitor.
pub struct Daemon {
    pub config: Config,
    pub store: Arc<Store<SystemClock>>,
    pub dispatcher: Arc<Dispatcher<SystemClock, UuidIdGen>>,
    pool: Arc<WorkerPool<SystemClock>>,
    janitor: Arc<Janitor<SystemClock>>,
    shutdown: CancellationToken,
    start_time: Instant,
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl Daemon {
    /// Open the store, recover state, and assemble the engine.
    pub fn start(config: Config, engine_config: EngineConfig) -> Result<Self, LifecycleError> {
        std::fs::create_dir_all(&config.state_dir)?;

        // Exclusive instance lock
        let lock_file = File::create(&config.lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(LifecycleError::AlreadyRunning(config.lock_path.clone()));
        }
        std::fs::write(&config.lock_path, std::process::id().to_string())?;

        let clock = SystemClock;
        let store = Arc::new(Store::open(&config.state_dir, clock.clone())?);

        // Crash recovery drill: leases from a previous incarnation are
        // reaped now rather than waiting out their TTL.
        let reaped = store.reap_expired_leases()?;
        if !reaped.is_empty() {
            info!(count = reaped.len(), "recovered leases from previous instance");
        }

        let registry = Arc::new(CancellationRegistry::new());
        let rbac = Arc::new(CachingRbacValidator::new(
            Box::new(AllowAllOracle),
            clock.clone(),
        ));
        let deps = EngineDeps {
            store: Arc::clone(&store),
            secret_store: Arc::new(HttpSecretStore::new(config.secret_store_url.clone())),
            asset_adapter: Arc::new(HttpStepAdapter::asset(config.asset_adapter_url.clone())),
            automation_adapter: Arc::new(HttpStepAdapter::automation(
                config.automation_adapter_url.clone(),
            )),
            rbac: Arc::clone(&rbac),
            registry: Arc::clone(&registry),
            clock: clock.clone(),
        };

        let pool = Arc::new(WorkerPool::new(deps, engine_config.clone()));
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&store),
            engine_config.janitor_interval,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            registry,
            rbac,
            engine_config,
            UuidIdGen,
            clock,
        ));

        Ok(Self {
            shutdown: pool.shutdown_token(),
            config,
            store,
            dispatcher,
            pool,
            janitor,
            start_time: Instant::now(),
            lock_file,
        })
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn unhealthy_workers(&self) -> usize {
        self.pool.unhealthy_count()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until SIGTERM/ctrl-c or an admin Shutdown request.
    pub async fn run(self: Arc<Self>) -> Result<(), LifecycleError> {
        // Admin socket
        let _ = std::fs::remove_file(&self.config.socket_path);
        let socket = UnixListener::bind(&self.config.socket_path)?;
        let listener = Listener::new(socket, Arc::clone(&self));
        let listener_task = tokio::spawn(listener.run());

        // Pool, janitor, flusher, checkpointer
        let pool_task = tokio::spawn(Arc::clone(&self.pool).run());
        let janitor_task = {
            let janitor = Arc::clone(&self.janitor);
            let stop = self.shutdown.clone();
            tokio::spawn(async move { janitor.run(stop).await })
        };
        let flusher_task = {
            let store = Arc::clone(&self.store);
            let stop = self.shutdown.clone();
            tokio::spawn(async move {
                let mut last_checkpoint = Instant::now();
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(FLUSH_TICK) => {}
                    }
                    if store.needs_flush() {
                        if let Err(e) = store.flush() {
                            warn!(error = %e, "WAL flush failed");
                        }
                    }
                    if last_checkpoint.elapsed() >= CHECKPOINT_INTERVAL {
                        match store.checkpoint() {
                            Ok(seq) => info!(seq, "checkpoint complete"),
                            Err(e) => warn!(error = %e, "checkpoint failed"),
                        }
                        last_checkpoint = Instant::now();
                    }
                }
            })
        };

        info!(
            socket = %self.config.socket_path.display(),
            "conductor daemon ready",
        );

        // Wait for a stop signal
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                self.shutdown.cancel();
            }
        }

        // Graceful drain: the pool handles its own hard-stop deadline
        let _ = pool_task.await;
        let _ = janitor_task.await;
        let _ = flusher_task.await;
        listener_task.abort();

        // Final durability: flush and checkpoint on the way out
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "final flush failed");
        }
        if let Err(e) = self.store.checkpoint() {
            warn!(error = %e, "final checkpoint failed");
        }
        let _ = std::fs::remove_file(&self.config.socket_path);
        info!("daemon stopped");
        Ok(())
    }
}

/// Install the tracing subscriber: env-filtered, with a non-blocking
/// file appender next to the state directory.
pub fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_new(env::log_level())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let Some(parent) = config.log_path.parent() else {
        return None;
    };
    if std::fs::create_dir_all(parent).is_err() {
        return None;
    }
    let file_name = config
        .log_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "conductord.log".to_string());
    let appender = tracing_appender::rolling::never(parent, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    if result.is_err() {
        // A subscriber is already installed (tests); keep going
        return Some(guard);
    }
    Some(guard)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
