// SPDX-License-Identifier: LGPL-2.1-or-later

//! Startup sequence: acquire the single-instance lock, bind the
//! socket, build the kernel backend, and spawn the Engine and
//! Listener tasks.

use std::io::Write as _;

use fs2::FileExt;
use tokio::net::UnixListener;
use tracing::info;

use crate::config::GaminRc;
use crate::engine::backend::{Backend, NotifyBackend, PollOnlyBackend};
use crate::engine::Engine;
use crate::listener::Listener;

use super::{Config, DaemonHandle, LifecycleError};

pub async fn startup(config: Config) -> Result<DaemonHandle, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    if let gamin_core::SocketPath::Path(p) = &config.socket_path {
        gamin_core::ensure_socket_dir(&config.socket_path)?;
        if p.exists() {
            std::fs::remove_file(p)?;
        }
    }
    let listener = bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let pollonly = config.pollonly;
    let rc = GaminRc::load(crate::config::default_home().as_deref());
    let engine = Engine::spawn(
        move |kernel_tx| build_backend(pollonly, kernel_tx),
        crate::env::default_poll_period(),
        rc,
    );

    let listener_task = tokio::spawn(
        Listener::new(listener, engine.handle(), crate::env::queue_flush_period()).serve(),
    );

    info!(session = %config.session, "gamind ready");

    Ok(DaemonHandle { config, lock_file, engine, listener_task })
}

fn build_backend(
    pollonly: bool,
    kernel_tx: tokio::sync::mpsc::Sender<crate::engine::backend::KernelEvent>,
) -> Box<dyn Backend> {
    if pollonly {
        return Box::new(PollOnlyBackend);
    }
    match NotifyBackend::new(kernel_tx) {
        Ok(backend) => Box::new(backend),
        Err(_) => Box::new(PollOnlyBackend),
    }
}

#[cfg(unix)]
fn bind(path: &gamin_core::SocketPath) -> std::io::Result<UnixListener> {
    match path {
        #[cfg(target_os = "linux")]
        gamin_core::SocketPath::Abstract(name) => {
            use std::os::linux::net::SocketAddrExt;
            use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};
            let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
            let std_listener = StdUnixListener::bind_addr(&addr)?;
            std_listener.set_nonblocking(true)?;
            UnixListener::from_std(std_listener)
        }
        gamin_core::SocketPath::Path(p) => UnixListener::bind(p),
    }
}
