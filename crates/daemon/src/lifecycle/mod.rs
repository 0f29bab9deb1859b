// SPDX-License-Identifier: LGPL-2.1-or-later

//! Daemon lifecycle: startup, the running server loop, and shutdown.

mod startup;

use std::path::PathBuf;

use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};

use gamin_core::SessionId;

use crate::engine::Engine;
use crate::listener::Listener;

/// Resolved filesystem locations for one (user, session) daemon instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionId,
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub socket_path: gamin_core::SocketPath,
    pub pollonly: bool,
    pub notimeout: bool,
}

impl Config {
    pub fn load(session: SessionId) -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir(session.as_str())?;
        let socket_path = gamin_core::socket_path(&current_uid().to_string(), &session);
        Ok(Self {
            lock_path: state_dir.join("gamind.pid"),
            state_dir,
            socket_path,
            session,
            pollonly: crate::env::force_poll_only(),
            notimeout: false,
        })
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

/// A running daemon instance. Dropping this does not stop the daemon;
/// call [`DaemonHandle::shutdown`] or wait on [`DaemonHandle::join`].
pub struct DaemonHandle {
    config: Config,
    #[allow(dead_code)]
    lock_file: std::fs::File,
    engine: Engine,
    listener_task: tokio::task::JoinHandle<()>,
}

impl DaemonHandle {
    /// Runs until told to shut down by signal or idle timeout, then tears
    /// down the socket, lock file, and Engine task.
    pub async fn join(mut self) {
        let shutdown = crate::signal::install();
        let idle = crate::signal::IdleTimer::new(self.config.notimeout);

        tokio::select! {
            reason = shutdown.wait() => {
                info!(?reason, "received shutdown signal");
            }
            _ = idle.wait(&self.engine) => {
                info!("idle timeout reached, exiting");
            }
        }

        self.listener_task.abort();
        self.engine.shutdown().await;
        cleanup(&self.config);
    }
}

fn cleanup(config: &Config) {
    if let gamin_core::SocketPath::Path(p) = &config.socket_path {
        if let Err(err) = std::fs::remove_file(p) {
            warn_remove_failed("socket", &err);
        }
    }
    if let Err(err) = std::fs::remove_file(&config.lock_path) {
        warn_remove_failed("lock file", &err);
    }
}

/// Acquire the single-instance lock, bind the socket, and spawn the
/// Engine and Listener tasks. Returns once the daemon is ready to accept
/// connections.
pub async fn run(config: Config) -> Result<DaemonHandle, LifecycleError> {
    startup::startup(config).await
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("another gamind is already running for this session")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0:?}: {1}")]
    BindFailed(gamin_core::SocketPath, std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn warn_remove_failed(what: &str, err: &std::io::Error) {
    warn!(what, %err, "failed to remove file during shutdown");
}
