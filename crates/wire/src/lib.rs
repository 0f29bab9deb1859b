// SPDX-License-Identifier: LGPL-2.1-or-later

//! Wire format for gamin client/daemon communication.
//!
//! Wire format: fixed 10-byte header (host byte order, local sockets
//! only — see `spec.md` §4.1) followed by the path payload. The same
//! packet layout carries both client requests and daemon events; only
//! the `type` field's meaning differs (request kind + options bits on
//! the way in, a bare event code on the way out).

mod codec;
mod frame;

pub use codec::{decode_event, decode_request, encode_event, encode_request, ProtocolError};
pub use frame::{read_packet, write_packet};
