// SPDX-License-Identifier: LGPL-2.1-or-later

//! Signal handling and the idle-exit timer (`spec.md` §4.9, §9's
//! "signal-handler → event-loop handoff" note).
//!
//! The original dnotify-era design pushed a file descriptor through a
//! lock-free ring from a `SIGIO` handler and woke the main loop via a
//! self-pipe. `tokio::signal::unix::signal` already gives an
//! async-signal-safe, fd-readable handoff for the shutdown signals, so
//! there is no hand-rolled ring here. SIGPIPE needs no explicit
//! handling either: the Rust runtime sets it to `SIG_IGN` before
//! `main` runs, so writes to a closed socket already surface as an
//! `EPIPE` I/O error rather than terminating the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::info;

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Hangup,
    Interrupt,
    Quit,
    Terminate,
}

/// Shared flag toggled by `SIGUSR2`; `main.rs` reads it if it wants to
/// adjust the tracing filter at runtime.
pub static VERBOSE: AtomicBool = AtomicBool::new(false);

pub struct ShutdownWatch {
    rx: tokio::sync::oneshot::Receiver<ShutdownReason>,
}

impl ShutdownWatch {
    pub async fn wait(self) -> ShutdownReason {
        self.rx.await.unwrap_or(ShutdownReason::Terminate)
    }
}

struct Signals {
    hup: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    term: tokio::signal::unix::Signal,
    usr2: tokio::signal::unix::Signal,
}

fn register_signals() -> std::io::Result<Signals> {
    Ok(Signals {
        hup: unix_signal(SignalKind::hangup())?,
        int: unix_signal(SignalKind::interrupt())?,
        quit: unix_signal(SignalKind::quit())?,
        term: unix_signal(SignalKind::terminate())?,
        usr2: unix_signal(SignalKind::user_defined2())?,
    })
}

async fn run_signal_loop(mut signals: Signals, tx: tokio::sync::oneshot::Sender<ShutdownReason>) {
    let mut tx = Some(tx);
    loop {
        let reason = tokio::select! {
            _ = signals.hup.recv() => ShutdownReason::Hangup,
            _ = signals.int.recv() => ShutdownReason::Interrupt,
            _ = signals.quit.recv() => ShutdownReason::Quit,
            _ = signals.term.recv() => ShutdownReason::Terminate,
            _ = signals.usr2.recv() => {
                let now = !VERBOSE.load(Ordering::Relaxed);
                VERBOSE.store(now, Ordering::Relaxed);
                info!(verbose = now, "SIGUSR2: toggled verbose logging");
                continue;
            }
        };
        if let Some(tx) = tx.take() {
            let _ = tx.send(reason);
        }
        break;
    }
}

/// Spawns a task watching `SIGHUP`/`SIGINT`/`SIGQUIT`/`SIGTERM`,
/// toggling [`VERBOSE`] on `SIGUSR2`. Returns a one-shot watch for the
/// first terminating signal received. If registration itself fails
/// (exhausted signal slots), shutdown falls back to the idle timer and
/// whatever ends the process externally; the watch simply never fires.
pub fn install() -> ShutdownWatch {
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match register_signals() {
            Ok(signals) => run_signal_loop(signals, tx).await,
            Err(err) => {
                tracing::error!(%err, "failed to install signal handlers");
            }
        }
    });

    ShutdownWatch { rx }
}

/// The 30-second idle-exit timer (`spec.md` §4.9): armed once the last
/// connection closes, cancelled if a new connection arrives first.
pub struct IdleTimer {
    disabled: bool,
    period: Duration,
}

impl IdleTimer {
    pub fn new(disabled: bool) -> Self {
        Self { disabled, period: crate::env::idle_timeout() }
    }

    /// Resolves once the engine has had zero connections for a full
    /// `period`, polling at a fraction of the period so a connection
    /// arriving mid-wait cancels the countdown. Never resolves if the
    /// timer is disabled (`--notimeout`).
    pub async fn wait(&self, engine: &Engine) {
        if self.disabled {
            return std::future::pending().await;
        }
        let tick = self.period / 10;
        loop {
            if engine.connection_count().await == 0 {
                let mut idle_for = Duration::ZERO;
                while idle_for < self.period {
                    tokio::time::sleep(tick).await;
                    idle_for += tick;
                    if engine.connection_count().await > 0 {
                        break;
                    }
                }
                if idle_for >= self.period {
                    return;
                }
            } else {
                tokio::time::sleep(tick).await;
            }
        }
    }
}
