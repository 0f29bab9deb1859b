// SPDX-License-Identifier: LGPL-2.1-or-later

//! Public connection handle: the FAM-shaped call surface translated
//! to idiomatic `async` methods over a [`GamResult`].

use std::path::Path;

use gamin_core::{Event, GamError, GamResult, ReqNo, RequestKind, SessionId};
use tokio::sync::{mpsc, oneshot};

use crate::last_error;
use crate::task::{ClientTask, Command};

/// One connection to a `gamind` instance.
///
/// Every entry point takes `&self` and goes through the background
/// task's command channel, so a `Connection` may be cloned and shared
/// across threads exactly as freely as the recursive-mutex-serialized
/// original: concurrent calls on the same `Connection` are serialized
/// by the task's single-threaded command loop, while separate
/// `Connection`s are fully independent.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
}

impl Connection {
    /// Open a connection for the default session (`GAM_CLIENT_ID`, or
    /// the unnamed default session if unset).
    pub async fn open() -> GamResult<Self> {
        Self::open_with(SessionId::from_env(), None).await
    }

    /// Open a connection, identifying this client to the daemon's log
    /// by `app_name`.
    pub async fn open_with_app_name(app_name: &str) -> GamResult<Self> {
        Self::open_with(SessionId::from_env(), Some(app_name.to_string())).await
    }

    async fn open_with(session: SessionId, app_name: Option<String>) -> GamResult<Self> {
        let socket_path = gamin_core::socket_path(&current_uid().to_string(), &session);
        let (commands_tx, commands_rx) = mpsc::channel(32);
        ClientTask::spawn(socket_path, session, app_name, commands_rx).await.map_err(record)?;
        Ok(Self { commands: commands_tx })
    }

    /// Register interest in a single file. `path` must be absolute.
    pub async fn monitor_file(
        &self,
        path: impl AsRef<Path>,
        user_data: Option<u64>,
    ) -> GamResult<ReqNo> {
        self.monitor(RequestKind::File, path, user_data).await
    }

    /// Register interest in a directory and its immediate entries.
    /// `path` must be absolute.
    pub async fn monitor_directory(
        &self,
        path: impl AsRef<Path>,
        user_data: Option<u64>,
    ) -> GamResult<ReqNo> {
        self.monitor(RequestKind::Dir, path, user_data).await
    }

    async fn monitor(
        &self,
        kind: RequestKind,
        path: impl AsRef<Path>,
        user_data: Option<u64>,
    ) -> GamResult<ReqNo> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Monitor { kind, path: path.as_ref().to_path_buf(), user_data, reply };
        if self.commands.send(cmd).await.is_err() {
            return Err(record(dead_connection()));
        }
        rx.await.unwrap_or_else(|_| Err(record(dead_connection()))).map_err(record)
    }

    /// Cancel a live subscription. An `Acknowledge` event for `reqno`
    /// is still delivered through [`Connection::next_event`].
    pub async fn cancel_monitor(&self, reqno: ReqNo) -> GamResult<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Cancel { reqno, reply }).await.is_err() {
            return Err(record(dead_connection()));
        }
        rx.await.unwrap_or_else(|_| Err(record(dead_connection()))).map_err(record)
    }

    /// Count of events currently queued and not yet delivered.
    pub async fn pending(&self) -> GamResult<usize> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Pending { reply }).await.is_err() {
            return Err(record(dead_connection()));
        }
        rx.await.map_err(|_| record(dead_connection()))
    }

    /// Block until the next event is available.
    pub async fn next_event(&self) -> GamResult<Event> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::NextEvent { reply }).await.is_err() {
            return Err(record(dead_connection()));
        }
        rx.await.unwrap_or_else(|_| Err(record(dead_connection()))).map_err(record)
    }

    /// Suppress the `Exists`/`EndExist` enumeration burst on every
    /// directory subscription made from this point on.
    pub async fn set_no_exists(&self, on: bool) {
        let _ = self.commands.send(Command::SetNoExists { on }).await;
    }

    /// Accepted for API compatibility, never implemented.
    pub async fn suspend_monitor(&self, _reqno: ReqNo) -> GamResult<()> {
        Err(record(GamError::Unimplemented))
    }

    /// Accepted for API compatibility, never implemented.
    pub async fn resume_monitor(&self, _reqno: ReqNo) -> GamResult<()> {
        Err(record(GamError::Unimplemented))
    }

    /// Close this handle. The background task exits once every clone
    /// of this connection has been dropped.
    pub fn close(self) {}
}

fn record(err: GamError) -> GamError {
    last_error::record(&err);
    err
}

fn dead_connection() -> GamError {
    GamError::Connect(std::io::Error::new(std::io::ErrorKind::NotConnected, "connection closed"))
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}
