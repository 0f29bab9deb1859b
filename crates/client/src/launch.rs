// SPDX-License-Identifier: LGPL-2.1-or-later

//! Connecting to `gamind`, auto-launching it on first failure.
//!
//! The original client daemonized the server itself with a manual
//! double-fork (fork, detach from the session, exec). `fork()` has no
//! safe wrapper (multi-threaded fork is full of hazards the signature
//! can't rule out), and this workspace forbids `unsafe` outright, so
//! launching goes through `std::process::Command` instead: it gets us
//! fork+exec without exposing `unsafe` in this crate, and dropping the
//! spawned `Child` without waiting on it gets the "don't block on the
//! daemon, let it run independently" effect the original was after.
//! Standard descriptors are redirected to `/dev/null` in place of
//! closing the full inherited descriptor table.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use gamin_core::{GamError, GamResult, SessionId, SocketPath};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::sleep;

/// Retries on first connect failure, per the launch sequence.
const LAUNCH_RETRY_ATTEMPTS: u32 = 25;
const LAUNCH_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Connect to `path`, launching `gamind` and retrying if nothing is
/// listening yet. Used both for the initial `open` and for a
/// reconnect after the daemon has gone away.
pub(crate) async fn establish(
    path: &SocketPath,
    session: &SessionId,
) -> GamResult<UnixStream> {
    if let Ok(stream) = connect_once(path).await {
        return Ok(stream);
    }

    spawn_daemon(session).map_err(GamError::Connect)?;

    let mut last_err = None;
    for _ in 0..LAUNCH_RETRY_ATTEMPTS {
        match connect_once(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
        sleep(LAUNCH_RETRY_BACKOFF).await;
    }
    Err(GamError::Connect(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "gamind did not start listening")
    })))
}

async fn connect_once(path: &SocketPath) -> io::Result<UnixStream> {
    let mut stream = match path {
        #[cfg(target_os = "linux")]
        SocketPath::Abstract(name) => {
            use std::os::linux::net::SocketAddrExt;
            use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};
            let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
            let std_stream = StdUnixStream::connect_addr(&addr)?;
            std_stream.set_nonblocking(true)?;
            UnixStream::from_std(std_stream)?
        }
        SocketPath::Path(p) => UnixStream::connect(p).await?,
    };
    authenticate(&mut stream).await?;
    Ok(stream)
}

/// The daemon's one-byte credential handshake: write a zero byte, wait
/// for it to be echoed back once the daemon has checked `SO_PEERCRED`.
async fn authenticate(stream: &mut UnixStream) -> io::Result<()> {
    stream.write_all(&[0u8]).await?;
    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).await?;
    Ok(())
}

fn daemon_binary_path() -> PathBuf {
    std::env::var_os("GAMIN_DEBUG_SERVER")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("gamind"))
}

fn spawn_daemon(session: &SessionId) -> io::Result<()> {
    let mut command = std::process::Command::new(daemon_binary_path());
    if !session.as_str().is_empty() {
        command.arg(session.as_str());
    }
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    // Dropped without `.wait()`: the daemon outlives this call and is
    // reparented to init once it does, same as the process this
    // replaces.
    command.spawn().map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_binary_path_honors_override() {
        std::env::set_var("GAMIN_DEBUG_SERVER", "/tmp/not-a-real-gamind");
        assert_eq!(daemon_binary_path(), PathBuf::from("/tmp/not-a-real-gamind"));
        std::env::remove_var("GAMIN_DEBUG_SERVER");
    }
}
