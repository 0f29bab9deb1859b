// SPDX-License-Identifier: LGPL-2.1-or-later

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gamin-core: shared data model for the gamin file-alteration-monitor.
//!
//! Holds the wire-level vocabulary (request/event codes, options,
//! packet size limits), the error taxonomy shared by client and
//! daemon, and session/socket-path derivation shared by both sides of
//! the protocol.

pub mod error;
pub mod event;
pub mod session;

pub use error::{GamError, GamResult};
pub use event::{
    Event, EventCode, ReqNo, ReqOptions, RequestKind, MAXPATHLEN, MAX_PACKET_LEN,
    PACKET_HEADER_LEN, PROTO_VERSION,
};
pub use session::{socket_path, SessionId, SocketPath};

#[cfg(unix)]
pub use session::ensure_socket_dir;
