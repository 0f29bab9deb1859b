// SPDX-License-Identifier: LGPL-2.1-or-later

//! The connection's background actor: owns the socket, the live
//! request table, and the reconnect-and-resubscribe dance. Mirrors
//! the daemon engine's handle-plus-task shape so a connection's state
//! is only ever touched from one place.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use gamin_core::{
    Event, EventCode, GamError, GamResult, ReqNo, ReqOptions, RequestKind, SessionId, SocketPath,
};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::launch;

pub(crate) enum Command {
    Monitor {
        kind: RequestKind,
        path: PathBuf,
        user_data: Option<u64>,
        reply: oneshot::Sender<GamResult<ReqNo>>,
    },
    Cancel {
        reqno: ReqNo,
        reply: oneshot::Sender<GamResult<()>>,
    },
    Pending {
        reply: oneshot::Sender<usize>,
    },
    NextEvent {
        reply: oneshot::Sender<GamResult<Event>>,
    },
    SetNoExists {
        on: bool,
    },
}

enum IoMsg {
    Event(Event),
    Disconnected(io::Error),
}

struct LiveRequest {
    kind: RequestKind,
    path: PathBuf,
    user_data: Option<u64>,
    /// Set on resubscribe after a reconnect; cleared on the first
    /// live event so a stale backlog doesn't get replayed as if it
    /// were fresh activity.
    suppress_restart_noise: bool,
    /// Set by `cancel`; the record stays until the Acknowledge is
    /// observed in `on_event` so events already in flight for this
    /// reqno still get `user_data` stamped (`spec.md` §4.2/§5).
    cancelling: bool,
}

pub(crate) struct ClientTask {
    socket_path: SocketPath,
    session: SessionId,
    write_half: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
    io_rx: mpsc::Receiver<IoMsg>,
    commands_rx: mpsc::Receiver<Command>,
    next_reqno: ReqNo,
    requests: HashMap<ReqNo, LiveRequest>,
    event_buffer: VecDeque<Event>,
    waiters: VecDeque<oneshot::Sender<GamResult<Event>>>,
    default_no_exists: bool,
    /// Set once reconnect attempts are exhausted; further calls fail
    /// fast with a connect error instead of blocking on retries again.
    dead: bool,
}

impl ClientTask {
    pub(crate) async fn spawn(
        socket_path: SocketPath,
        session: SessionId,
        app_name: Option<String>,
        commands_rx: mpsc::Receiver<Command>,
    ) -> GamResult<JoinHandle<()>> {
        let stream = launch::establish(&socket_path, &session).await?;
        let (read_half, write_half) = stream.into_split();
        let (io_tx, io_rx) = mpsc::channel(64);
        let reader_task = tokio::spawn(run_reader(read_half, io_tx));

        let mut task = Self {
            socket_path,
            session,
            write_half,
            reader_task,
            io_rx,
            commands_rx,
            next_reqno: 1,
            requests: HashMap::new(),
            event_buffer: VecDeque::new(),
            waiters: VecDeque::new(),
            default_no_exists: false,
            dead: false,
        };

        if let Some(name) = app_name {
            // Fire-and-forget: a Debug request carries no reply, it
            // only gives the daemon something to log.
            let _ =
                task.send_request(0, RequestKind::Debug, ReqOptions::empty(), name.as_str()).await;
        }

        Ok(tokio::spawn(task.run()))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                msg = self.io_rx.recv() => {
                    match msg {
                        Some(IoMsg::Event(event)) => self.on_event(event),
                        Some(IoMsg::Disconnected(err)) => self.reconnect(err).await,
                        None => break,
                    }
                }
            }
        }
        self.reader_task.abort();
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Monitor { kind, path, user_data, reply } => {
                let result = self.monitor(kind, path, user_data).await;
                let _ = reply.send(result);
            }
            Command::Cancel { reqno, reply } => {
                let result = self.cancel(reqno).await;
                let _ = reply.send(result);
            }
            Command::Pending { reply } => {
                let _ = reply.send(self.event_buffer.len());
            }
            Command::NextEvent { reply } => {
                if let Some(event) = self.event_buffer.pop_front() {
                    let _ = reply.send(Ok(event));
                } else if self.dead {
                    let _ = reply.send(Err(dead_connection_error()));
                } else {
                    self.waiters.push_back(reply);
                }
            }
            Command::SetNoExists { on } => self.default_no_exists = on,
        }
    }

    async fn monitor(
        &mut self,
        kind: RequestKind,
        path: PathBuf,
        user_data: Option<u64>,
    ) -> GamResult<ReqNo> {
        if self.dead {
            return Err(dead_connection_error());
        }
        if !path.is_absolute() {
            return Err(GamError::BadFilename(format!("{} is not absolute", path.display())));
        }

        let reqno = self.next_reqno;
        self.next_reqno = self.next_reqno.wrapping_add(1).max(1);
        let options = ReqOptions::empty().with_no_exists(self.default_no_exists);

        self.requests.insert(reqno, LiveRequest {
            kind,
            path: path.clone(),
            user_data,
            suppress_restart_noise: false,
            cancelling: false,
        });

        if self.send_request(reqno, kind, options, path.as_os_str()).await.is_err() {
            self.reconnect(io::Error::new(io::ErrorKind::BrokenPipe, "write failed")).await;
            if self.dead {
                self.requests.remove(&reqno);
                return Err(dead_connection_error());
            }
        }
        Ok(reqno)
    }

    async fn cancel(&mut self, reqno: ReqNo) -> GamResult<()> {
        if self.dead {
            return Err(dead_connection_error());
        }
        match self.requests.get_mut(&reqno) {
            Some(req) if !req.cancelling => req.cancelling = true,
            _ => {
                return Err(GamError::BadArgument(format!(
                    "no live subscription for reqno {reqno}"
                )))
            }
        }
        self.send_request(reqno, RequestKind::Cancel, ReqOptions::empty(), "")
            .await
            .map_err(GamError::Connect)
    }

    async fn send_request(
        &mut self,
        reqno: ReqNo,
        kind: RequestKind,
        options: ReqOptions,
        path: impl AsBytesPath,
    ) -> io::Result<()> {
        let packet = gamin_wire::encode_request(reqno, kind, options, path.as_path_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        gamin_wire::write_packet(&mut self.write_half, &packet).await
    }

    fn on_event(&mut self, mut event: Event) {
        if let Some(req) = self.requests.get_mut(&event.reqno) {
            if req.suppress_restart_noise {
                if matches!(
                    event.code,
                    EventCode::Created | EventCode::Moved | EventCode::Changed | EventCode::EndExist
                ) {
                    req.suppress_restart_noise = false;
                } else {
                    return;
                }
            }
            event.user_data = req.user_data;
            if event.code == EventCode::Acknowledge {
                self.requests.remove(&event.reqno);
            }
        }

        if let Some(waiter) = self.waiters.pop_front() {
            let _ = waiter.send(Ok(event));
        } else {
            self.event_buffer.push_back(event);
        }
    }

    async fn reconnect(&mut self, cause: io::Error) {
        tracing::warn!(%cause, "connection lost, reconnecting");
        self.reader_task.abort();

        match launch::establish(&self.socket_path, &self.session).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                let (io_tx, io_rx) = mpsc::channel(64);
                self.reader_task = tokio::spawn(run_reader(read_half, io_tx));
                self.write_half = write_half;
                self.io_rx = io_rx;
                self.dead = false;

                // A cancel in flight when the connection dropped will
                // never be acknowledged by the daemon that received it;
                // the new connection starts with no knowledge of that
                // reqno, so there is nothing to resubscribe or wait on.
                self.requests.retain(|_, req| !req.cancelling);

                let resubscribe: Vec<(ReqNo, RequestKind, PathBuf)> = self
                    .requests
                    .iter_mut()
                    .map(|(reqno, req)| {
                        req.suppress_restart_noise = true;
                        (*reqno, req.kind, req.path.clone())
                    })
                    .collect();
                let options = ReqOptions::empty().with_no_exists(true);
                for (reqno, kind, path) in resubscribe {
                    let _ = self.send_request(reqno, kind, options, path.as_os_str()).await;
                }
            }
            Err(_) => {
                self.dead = true;
                while let Some(waiter) = self.waiters.pop_front() {
                    let _ = waiter.send(Err(dead_connection_error()));
                }
            }
        }
    }
}

fn dead_connection_error() -> GamError {
    GamError::Connect(io::Error::new(io::ErrorKind::NotConnected, "connection lost"))
}

async fn run_reader(mut read_half: OwnedReadHalf, tx: mpsc::Sender<IoMsg>) {
    loop {
        match gamin_wire::read_packet(&mut read_half).await {
            Ok(buf) => match gamin_wire::decode_event(&buf) {
                Ok(event) => {
                    if tx.send(IoMsg::Event(event)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(IoMsg::Disconnected(io::Error::new(io::ErrorKind::InvalidData, e)))
                        .await;
                    return;
                }
            },
            Err(e) => {
                let _ = tx.send(IoMsg::Disconnected(e)).await;
                return;
            }
        }
    }
}

/// Lets `send_request` take either a borrowed `OsStr` (a path) or a
/// `&str` (the empty path on cancel, the app name on the debug
/// handshake) without cloning into a `Vec<u8>` at every call site.
trait AsBytesPath {
    fn as_path_bytes(&self) -> &[u8];
}

impl AsBytesPath for &std::ffi::OsStr {
    fn as_path_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsBytesPath for &str {
    fn as_path_bytes(&self) -> &[u8] {
        self.as_bytes()
    }
}
