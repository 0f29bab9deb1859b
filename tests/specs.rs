// SPDX-License-Identifier: LGPL-2.1-or-later

//! End-to-end scenarios driven against a real `gamind`, through
//! `gamin-client`'s public `Connection` API (and, for the malformed-
//! packet case, a bare `UnixStream` speaking the wire protocol by
//! hand).
//!
//! Every scenario forces the poll-only backend (`GAM_TEST_DNOTIFY`) so
//! detection timing is governed by the one-second polling tick rather
//! than by whatever inotify support happens to be available in the
//! sandbox this runs in.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use gamin_client::Connection;
use gamin_core::{Event, EventCode};

/// Generous upper bound on how long a single event may take to arrive:
/// one poll tick, plus scheduling slack.
const EVENT_TIMEOUT: Duration = Duration::from_secs(6);
/// Long enough for at least one full poll tick to land after a
/// filesystem change.
const TICK_SETTLE: Duration = Duration::from_millis(2_500);

fn daemon_binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_gamind"))
}

/// Per-test isolation: a distinct session name keeps each test's
/// `gamind` on its own abstract socket, and a scratch `XDG_STATE_HOME`
/// keeps lock files from colliding.
struct TestEnv {
    _state_dir: TempDir,
    scratch: TempDir,
}

fn setup(session: &str) -> TestEnv {
    let state_dir = tempfile::tempdir().expect("state tempdir");
    let scratch = tempfile::tempdir().expect("scratch tempdir");
    std::env::set_var("GAM_CLIENT_ID", session);
    std::env::set_var("XDG_STATE_HOME", state_dir.path());
    std::env::set_var("GAMIN_DEBUG_SERVER", daemon_binary());
    std::env::set_var("GAM_TEST_DNOTIFY", "1");
    std::env::remove_var("GAM_DEBUG");
    TestEnv { _state_dir: state_dir, scratch }
}

async fn recv(conn: &Connection) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, conn.next_event())
        .await
        .expect("event arrived before timeout")
        .expect("event delivered without error")
}

async fn settle() {
    tokio::time::sleep(TICK_SETTLE).await;
}

#[tokio::test]
#[serial]
async fn s1_file_lifecycle_emits_expected_event_sequence() {
    let env = setup("specs-s1");
    let path = env.scratch.path().join("f1");

    let conn = Connection::open().await.expect("connect to gamind");
    let reqno = conn.monitor_file(&path, None).await.expect("monitor file");

    // Not on disk at subscribe time: no Exists/EndExist, just Deleted.
    let missing = recv(&conn).await;
    assert_eq!(missing.reqno, reqno);
    assert_eq!(missing.code, EventCode::Deleted);

    std::fs::write(&path, b"one").expect("create file");
    settle().await;
    let created = recv(&conn).await;
    assert_eq!(created.reqno, reqno);
    assert_eq!(created.code, EventCode::Created);

    std::fs::write(&path, b"two-different-length").expect("modify file");
    settle().await;
    let changed = recv(&conn).await;
    assert_eq!(changed.reqno, reqno);
    assert_eq!(changed.code, EventCode::Changed);

    std::fs::remove_file(&path).expect("delete file");
    settle().await;
    let deleted = recv(&conn).await;
    assert_eq!(deleted.reqno, reqno);
    assert_eq!(deleted.code, EventCode::Deleted);
}

#[tokio::test]
#[serial]
async fn s2_directory_subscription_enumerates_initial_content() {
    let env = setup("specs-s2");
    let dir = env.scratch.path().join("T");
    std::fs::create_dir(&dir).expect("create dir");
    std::fs::write(dir.join("a"), b"a").expect("write a");
    std::fs::write(dir.join("b"), b"b").expect("write b");

    let conn = Connection::open().await.expect("connect");
    let reqno = conn.monitor_directory(&dir, None).await.expect("monitor dir");

    let exists_root = recv(&conn).await;
    assert_eq!(exists_root.reqno, reqno);
    assert_eq!(exists_root.code, EventCode::Exists);
    assert_eq!(exists_root.path, dir);

    let mut names = HashSet::new();
    for _ in 0..2 {
        let entry = recv(&conn).await;
        assert_eq!(entry.reqno, reqno);
        assert_eq!(entry.code, EventCode::Exists);
        names.insert(entry.path);
    }
    assert!(names.contains(Path::new("a")));
    assert!(names.contains(Path::new("b")));

    let end_exist = recv(&conn).await;
    assert_eq!(end_exist.reqno, reqno);
    assert_eq!(end_exist.code, EventCode::EndExist);
    assert_eq!(end_exist.path, dir);

    std::fs::write(dir.join("c"), b"c").expect("create c");
    settle().await;

    // The directory's own mtime moved (dispatched to every subscription
    // on that node) before the per-entry Created diff is computed.
    let dir_changed = recv(&conn).await;
    assert_eq!(dir_changed.reqno, reqno);
    assert_eq!(dir_changed.code, EventCode::Changed);
    assert_eq!(dir_changed.path, dir);

    let created = recv(&conn).await;
    assert_eq!(created.reqno, reqno);
    assert_eq!(created.code, EventCode::Created);
    assert_eq!(created.path, Path::new("c"));

    conn.cancel_monitor(reqno).await.expect("cancel");
    let ack = recv(&conn).await;
    assert_eq!(ack.reqno, reqno);
    assert_eq!(ack.code, EventCode::Acknowledge);

    // No further events follow the Acknowledge.
    assert_eq!(conn.pending().await.expect("pending"), 0);
}

#[tokio::test]
#[serial]
async fn s3_no_exists_suppresses_initial_enumeration() {
    let env = setup("specs-s3");
    let dir = env.scratch.path().join("T");
    std::fs::create_dir(&dir).expect("create dir");

    let conn = Connection::open().await.expect("connect");
    conn.set_no_exists(true).await;
    let reqno = conn.monitor_directory(&dir, None).await.expect("monitor dir");

    // Nothing queued: no Exists/EndExist burst for an already-existing,
    // empty directory.
    assert_eq!(conn.pending().await.expect("pending"), 0);

    std::fs::write(dir.join("c"), b"c").expect("create c");
    settle().await;

    let dir_changed = recv(&conn).await;
    assert_eq!(dir_changed.reqno, reqno);
    assert_eq!(dir_changed.code, EventCode::Changed);

    let created = recv(&conn).await;
    assert_eq!(created.reqno, reqno);
    assert_eq!(created.code, EventCode::Created);
    assert_eq!(created.path, Path::new("c"));
}

#[tokio::test]
#[serial]
async fn s4_continuous_writes_keep_producing_changed_events() {
    let env = setup("specs-s4");
    let path = env.scratch.path().join("hot");
    std::fs::write(&path, b"seed").expect("seed file");

    let conn = Connection::open().await.expect("connect");
    let reqno = conn.monitor_file(&path, None).await.expect("monitor file");

    let exists = recv(&conn).await;
    assert_eq!(exists.code, EventCode::Exists);
    let end_exist = recv(&conn).await;
    assert_eq!(end_exist.code, EventCode::EndExist);

    // Change the file faster than the poll period for several ticks in
    // a row, enough to cross BUSY_CHECK_THRESHOLD (4) — delivery must
    // keep flowing at roughly one Changed event per tick regardless.
    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        for i in 0..50u32 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = std::fs::write(&writer_path, format!("payload-{i}"));
        }
    });

    for _ in 0..5 {
        let event = recv(&conn).await;
        assert_eq!(event.reqno, reqno);
        assert_eq!(event.code, EventCode::Changed);
    }

    writer.await.expect("writer task");

    // Let the final write's poll tick land, then drain anything
    // already buffered before checking for quiescence.
    settle().await;
    while conn.pending().await.unwrap_or(0) > 0 {
        recv(&conn).await;
    }

    let idle = tokio::time::timeout(Duration::from_secs(3), conn.next_event()).await;
    assert!(idle.is_err(), "expected no further events once writes stopped");
}

#[tokio::test]
#[serial]
async fn s5_reconnect_resubscribes_and_keeps_reqno() {
    let env = setup("specs-s5");
    let path = env.scratch.path().join("f1");
    std::fs::write(&path, b"before").expect("seed file");

    let mut daemon = std::process::Command::new(daemon_binary())
        .arg("specs-s5")
        .spawn()
        .expect("spawn gamind directly");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let conn = Connection::open().await.expect("connect to running daemon");
    let reqno = conn.monitor_file(&path, None).await.expect("monitor file");

    let exists = recv(&conn).await;
    assert_eq!(exists.code, EventCode::Exists);
    let end_exist = recv(&conn).await;
    assert_eq!(end_exist.code, EventCode::EndExist);

    // Simulate the daemon crashing out from under the connection.
    daemon.kill().expect("kill daemon");
    let _ = daemon.wait();

    // Give the background task time to notice, auto-launch a fresh
    // gamind, and transparently resend the subscription.
    tokio::time::sleep(Duration::from_secs(2)).await;

    std::fs::write(&path, b"after-reconnect").expect("modify after reconnect");
    settle().await;

    // NO_EXISTS was forced on resubscribe, so the only event the new
    // daemon instance produces is the Changed from this write — under
    // the same reqno the caller started with.
    let changed = recv(&conn).await;
    assert_eq!(changed.reqno, reqno);
    assert_eq!(changed.code, EventCode::Changed);
}

#[tokio::test]
#[serial]
async fn s6_malformed_packet_closes_only_that_connection() {
    let env = setup("specs-s6");
    let path = env.scratch.path().join("f1");
    std::fs::write(&path, b"content").expect("seed file");

    // A well-behaved connection, established first so we can show it
    // survives the other connection's bad packet.
    let good = Connection::open().await.expect("connect (good)");
    let reqno = good.monitor_file(&path, None).await.expect("monitor file");
    let exists = recv(&good).await;
    assert_eq!(exists.code, EventCode::Exists);
    let end_exist = recv(&good).await;
    assert_eq!(end_exist.code, EventCode::EndExist);

    // A second, raw connection that speaks just enough of the wire
    // protocol to authenticate, then sends a packet with a corrupted
    // protocol version.
    let uid = nix::unistd::Uid::current().as_raw();
    let session = gamin_core::SessionId::new("specs-s6");
    let socket_path = gamin_core::socket_path(&uid.to_string(), &session);
    let gamin_core::SocketPath::Abstract(name) = socket_path else {
        panic!("abstract sockets are expected on this platform");
    };

    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};
    let addr = SocketAddr::from_abstract_name(name.as_bytes()).expect("abstract addr");
    let std_stream = StdUnixStream::connect_addr(&addr).expect("connect raw socket");
    std_stream.set_nonblocking(true).expect("nonblocking");
    let mut bad = tokio::net::UnixStream::from_std(std_stream).expect("tokio stream");

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    bad.write_all(&[0u8]).await.expect("auth byte");
    let mut ack = [0u8; 1];
    bad.read_exact(&mut ack).await.expect("auth ack");

    let mut packet = gamin_wire::encode_request(
        1,
        gamin_core::RequestKind::File,
        gamin_core::ReqOptions::empty(),
        b"/tmp/irrelevant",
    )
    .expect("encode request");
    // Corrupt the version field (bytes 2..4) so the daemon's decoder
    // rejects the packet outright.
    packet[2] = 0xFF;
    packet[3] = 0xFF;
    gamin_wire::write_packet(&mut bad, &packet).await.expect("write malformed packet");

    // The daemon closes the misbehaving connection; reading from it
    // now observes EOF rather than a reply.
    let mut buf = [0u8; 1];
    let read_result = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf)).await;
    match read_result {
        Ok(Ok(0)) => {}
        other => panic!("expected EOF on the malformed connection, got {other:?}"),
    }

    // The well-behaved connection is unaffected: it still sees new
    // activity on its own subscription.
    std::fs::write(&path, b"content-changed").expect("modify file");
    settle().await;
    let changed = recv(&good).await;
    assert_eq!(changed.reqno, reqno);
    assert_eq!(changed.code, EventCode::Changed);
}
