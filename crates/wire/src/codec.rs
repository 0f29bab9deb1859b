// SPDX-License-Identifier: LGPL-2.1-or-later

//! Header encode/decode and the request/event field-level codecs.

use gamin_core::{
    Event, EventCode, ReqNo, ReqOptions, RequestKind, MAXPATHLEN, MAX_PACKET_LEN,
    PACKET_HEADER_LEN, PROTO_VERSION,
};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet total-length {0} exceeds maximum {MAX_PACKET_LEN}")]
    TotalLengthOverflow(usize),

    #[error("protocol version mismatch: got {0}, expected {PROTO_VERSION}")]
    VersionMismatch(u16),

    #[error("path length {0} out of range for request type")]
    PathLenInvalid(u16),

    #[error("path length {path_len} inconsistent with total length {total_len}")]
    PathLenInconsistent { path_len: u16, total_len: u16 },

    #[error("unknown event/request code {0}")]
    UnknownCode(u16),
}

struct Header {
    total_len: u16,
    version: u16,
    seq: u16,
    type_field: u16,
    path_len: u16,
}

impl Header {
    fn parse(buf: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        debug_assert!(buf.len() >= PACKET_HEADER_LEN);
        let total_len = u16::from_ne_bytes([buf[0], buf[1]]);
        let version = u16::from_ne_bytes([buf[2], buf[3]]);
        let seq = u16::from_ne_bytes([buf[4], buf[5]]);
        let type_field = u16::from_ne_bytes([buf[6], buf[7]]);
        let path_len = u16::from_ne_bytes([buf[8], buf[9]]);

        if total_len as usize > MAX_PACKET_LEN {
            return Err(ProtocolError::TotalLengthOverflow(total_len as usize));
        }
        if version != PROTO_VERSION {
            return Err(ProtocolError::VersionMismatch(version));
        }
        if path_len as usize + PACKET_HEADER_LEN != total_len as usize {
            return Err(ProtocolError::PathLenInconsistent { path_len, total_len });
        }

        Ok((Self { total_len, version, seq, type_field, path_len }, &buf[PACKET_HEADER_LEN..]))
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_len.to_ne_bytes());
        out.extend_from_slice(&self.version.to_ne_bytes());
        out.extend_from_slice(&self.seq.to_ne_bytes());
        out.extend_from_slice(&self.type_field.to_ne_bytes());
        out.extend_from_slice(&self.path_len.to_ne_bytes());
    }
}

/// A decoded client request (`spec.md` §3's Request entity, wire-shaped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub reqno: ReqNo,
    pub kind: RequestKind,
    pub options: ReqOptions,
    pub path: PathBuf,
}

/// Encode a request packet. `path` may be empty only for `Cancel`.
pub fn encode_request(
    reqno: ReqNo,
    kind: RequestKind,
    options: ReqOptions,
    path: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if path.is_empty() && !matches!(kind, RequestKind::Cancel) {
        return Err(ProtocolError::PathLenInvalid(0));
    }
    if path.len() > MAXPATHLEN {
        return Err(ProtocolError::PathLenInvalid(path.len() as u16));
    }

    let header = Header {
        total_len: (PACKET_HEADER_LEN + path.len()) as u16,
        version: PROTO_VERSION,
        seq: reqno,
        type_field: kind as u16 | options.bits(),
        path_len: path.len() as u16,
    };
    let mut out = Vec::with_capacity(header.total_len as usize);
    header.write(&mut out);
    out.extend_from_slice(path);
    Ok(out)
}

/// Decode a whole request packet (header already validated to be fully present).
pub fn decode_request(buf: &[u8]) -> Result<WireRequest, ProtocolError> {
    let (header, rest) = Header::parse(buf)?;
    let kind_bits = header.type_field & 0xF;
    let kind = RequestKind::from_u16(kind_bits).ok_or(ProtocolError::UnknownCode(kind_bits))?;
    let options = ReqOptions::from_bits(header.type_field & !0xF);

    if !matches!(kind, RequestKind::Cancel) && !(1..=MAXPATHLEN as u16).contains(&header.path_len)
    {
        return Err(ProtocolError::PathLenInvalid(header.path_len));
    }

    let path_bytes = &rest[..header.path_len as usize];
    Ok(WireRequest {
        reqno: header.seq,
        kind,
        options,
        path: PathBuf::from(String::from_utf8_lossy(path_bytes).into_owned()),
    })
}

/// Encode an event packet (daemon -> client).
pub fn encode_event(event: &Event) -> Result<Vec<u8>, ProtocolError> {
    let path_bytes = event.path.to_string_lossy();
    let path_bytes = path_bytes.as_bytes();
    if path_bytes.len() > MAXPATHLEN {
        return Err(ProtocolError::PathLenInvalid(path_bytes.len() as u16));
    }

    let header = Header {
        total_len: (PACKET_HEADER_LEN + path_bytes.len()) as u16,
        version: PROTO_VERSION,
        seq: event.reqno,
        type_field: event.code as u16,
        path_len: path_bytes.len() as u16,
    };
    let mut out = Vec::with_capacity(header.total_len as usize);
    header.write(&mut out);
    out.extend_from_slice(path_bytes);
    Ok(out)
}

/// Decode a whole event packet.
pub fn decode_event(buf: &[u8]) -> Result<Event, ProtocolError> {
    let (header, rest) = Header::parse(buf)?;
    let code = EventCode::from_u16(header.type_field)
        .ok_or(ProtocolError::UnknownCode(header.type_field))?;
    let path_bytes = &rest[..header.path_len as usize];
    Ok(Event::new(header.seq, code, String::from_utf8_lossy(path_bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let bytes =
            encode_request(7, RequestKind::Dir, ReqOptions::empty().with_no_exists(true), b"/tmp")
                .expect("encode");
        let req = decode_request(&bytes).expect("decode");
        assert_eq!(req.reqno, 7);
        assert_eq!(req.kind, RequestKind::Dir);
        assert!(req.options.no_exists());
        assert_eq!(req.path, PathBuf::from("/tmp"));
    }

    #[test]
    fn cancel_allows_empty_path() {
        let bytes =
            encode_request(3, RequestKind::Cancel, ReqOptions::empty(), b"").expect("encode");
        let req = decode_request(&bytes).expect("decode");
        assert_eq!(req.kind, RequestKind::Cancel);
        assert_eq!(req.path, PathBuf::from(""));
    }

    #[test]
    fn monfile_rejects_empty_path() {
        let err = encode_request(1, RequestKind::File, ReqOptions::empty(), b"").unwrap_err();
        assert_eq!(err, ProtocolError::PathLenInvalid(0));
    }

    #[test]
    fn event_round_trips() {
        let event = Event::new(42, EventCode::Changed, "/a/b");
        let bytes = encode_event(&event).expect("encode");
        let decoded = decode_event(&bytes).expect("decode");
        assert_eq!(decoded.reqno, 42);
        assert_eq!(decoded.code, EventCode::Changed);
        assert_eq!(decoded.path, PathBuf::from("/a/b"));
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut bytes = encode_request(1, RequestKind::File, ReqOptions::empty(), b"/x")
            .expect("encode");
        bytes[2] = 9;
        bytes[3] = 0;
        assert_eq!(decode_request(&bytes), Err(ProtocolError::VersionMismatch(9)));
    }

    #[test]
    fn rejects_path_len_inconsistency() {
        let mut bytes = encode_request(1, RequestKind::File, ReqOptions::empty(), b"/x")
            .expect("encode");
        // Corrupt path_len while leaving total_len untouched.
        bytes[8] = 9;
        bytes[9] = 0;
        assert!(matches!(
            decode_request(&bytes),
            Err(ProtocolError::PathLenInconsistent { .. })
        ));
    }
}
