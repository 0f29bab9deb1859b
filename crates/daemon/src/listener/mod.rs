// SPDX-License-Identifier: LGPL-2.1-or-later

//! Connection endpoint (`spec.md` §4.2): accept loop, peer-credential
//! authentication, inbound request parsing, and the outbound queue.

mod queue;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gamin_core::RequestKind;

use crate::engine::EngineHandle;

/// Opaque per-connection identity used to key subscriptions and route
/// engine events back to the right writer task.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Listener {
    listener: UnixListener,
    engine: EngineHandle,
    queue_flush_period: std::time::Duration,
}

impl Listener {
    pub fn new(
        listener: UnixListener,
        engine: EngineHandle,
        queue_flush_period: std::time::Duration,
    ) -> Self {
        Self { listener, engine, queue_flush_period }
    }

    /// Runs the accept loop until the task is aborted by shutdown.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let engine = self.engine.clone();
                    let period = self.queue_flush_period;
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, engine, period).await {
                            debug!(%err, "connection closed");
                        }
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
    }
}

async fn handle_connection(
    mut stream: tokio::net::UnixStream,
    engine: EngineHandle,
    queue_flush_period: std::time::Duration,
) -> std::io::Result<()> {
    if !authenticate(&mut stream).await? {
        return Ok(());
    }

    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (events_tx, events_rx) = mpsc::channel(256);
    engine.connection_opened(conn_id, events_tx).await;

    let (read_half, write_half) = stream.into_split();
    let reader = tokio::spawn(read_loop(read_half, conn_id, engine.clone()));
    let writer = tokio::spawn(queue::run_writer(write_half, events_rx, queue_flush_period));

    let _ = reader.await;
    writer.abort();
    engine.connection_closed(conn_id).await;
    Ok(())
}

/// One-byte credential handshake (`spec.md` §4.2): the client writes a
/// single zero byte; the server resolves the peer's uid via
/// `SO_PEERCRED`/`getpeereid` through [`tokio::net::UnixStream::peer_cred`]
/// and accepts iff it matches the server's own uid. On success the
/// server echoes one zero byte back.
async fn authenticate(stream: &mut tokio::net::UnixStream) -> std::io::Result<bool> {
    let mut probe = [0u8; 1];
    loop {
        match stream.read_exact(&mut probe).await {
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let peer = stream.peer_cred()?;
    let server_uid = nix::unistd::Uid::current().as_raw();
    if peer.uid() != server_uid {
        warn!(peer_uid = peer.uid(), server_uid, "rejecting connection: uid mismatch");
        return Ok(false);
    }

    stream.write_all(&[0u8]).await?;
    Ok(true)
}

async fn read_loop(
    mut reader: tokio::net::unix::OwnedReadHalf,
    conn_id: ConnId,
    engine: EngineHandle,
) {
    loop {
        let packet = match gamin_wire::read_packet(&mut reader).await {
            Ok(packet) => packet,
            Err(_) => return,
        };
        let request = match gamin_wire::decode_request(&packet) {
            Ok(request) => request,
            Err(err) => {
                debug!(%err, "malformed packet, closing connection");
                return;
            }
        };

        match request.kind {
            RequestKind::Cancel => {
                engine.cancel(conn_id, request.reqno).await;
            }
            RequestKind::File | RequestKind::Dir => {
                if let Err(err) = engine
                    .subscribe(conn_id, request.reqno, request.kind, request.options, request.path)
                    .await
                {
                    debug!(%err, "subscribe failed");
                }
            }
            RequestKind::Debug => {
                debug!("debug request received (accepted, no-op)");
            }
        }
    }
}
