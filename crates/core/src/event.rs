// SPDX-License-Identifier: LGPL-2.1-or-later

//! Wire-level vocabulary: request/event codes, options, and the typed
//! `Event` a subscription produces.
//!
//! Mirrors `gam_protocol.h` / `gam_event.h` from the original gamin
//! sources: request codes and event codes are disjoint integer spaces,
//! and directory/file event-code duality is unified here (the engine
//! only ever speaks this `Event`; translation to the wire layout is
//! `gamin-wire`'s job, per §9's "FAM code/event-code duality" note).

use std::path::PathBuf;

/// Maximum path length accepted on the wire (`MAXPATHLEN` in the C sources).
pub const MAXPATHLEN: usize = 4096;

/// Protocol version. Bumping this is a breaking wire change.
pub const PROTO_VERSION: u16 = 1;

/// Header is 5 `u16` fields; total-length includes the header.
pub const PACKET_HEADER_LEN: usize = 10;

/// Largest packet the codec will accept (header + MAXPATHLEN).
pub const MAX_PACKET_LEN: usize = PACKET_HEADER_LEN + MAXPATHLEN;

/// Request number: client-chosen or library-allocated, unique per connection.
pub type ReqNo = u16;

/// Request type, the low 4 bits of the packet's type-with-options field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    File = 1,
    Dir = 2,
    Cancel = 3,
    Debug = 4,
}

impl RequestKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::File),
            2 => Some(Self::Dir),
            3 => Some(Self::Cancel),
            4 => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, Self::Dir)
    }
}

/// Option bits packed into the upper 12 bits of the type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReqOptions(u16);

impl ReqOptions {
    pub const NO_EXISTS: u16 = 0x10;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn no_exists(self) -> bool {
        self.0 & Self::NO_EXISTS != 0
    }

    pub fn with_no_exists(mut self, on: bool) -> Self {
        if on {
            self.0 |= Self::NO_EXISTS;
        } else {
            self.0 &= !Self::NO_EXISTS;
        }
        self
    }
}

/// Canonical event codes, as used on the wire and by applications
/// (values match `spec.md` §6's FAM-compatible numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    Changed = 1,
    Deleted = 2,
    StartExecuting = 3,
    StopExecuting = 4,
    Created = 5,
    Acknowledge = 6,
    Exists = 7,
    EndExist = 8,
    Moved = 9,
}

impl EventCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Changed),
            2 => Some(Self::Deleted),
            3 => Some(Self::StartExecuting),
            4 => Some(Self::StopExecuting),
            5 => Some(Self::Created),
            6 => Some(Self::Acknowledge),
            7 => Some(Self::Exists),
            8 => Some(Self::EndExist),
            9 => Some(Self::Moved),
            _ => None,
        }
    }
}

/// A typed event produced by the engine and delivered to one subscription.
///
/// `path` is the basename for directory-content events, and the full
/// subscribed path for the subscription root itself or for file
/// subscriptions (§3's Event row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub reqno: ReqNo,
    pub code: EventCode,
    pub path: PathBuf,
    /// Opaque handle the client attached to the request; never
    /// interpreted by the daemon, only echoed back.
    pub user_data: Option<u64>,
}

impl Event {
    pub fn new(reqno: ReqNo, code: EventCode, path: impl Into<PathBuf>) -> Self {
        Self { reqno, code, path: path.into(), user_data: None }
    }

    pub fn with_user_data(mut self, user_data: Option<u64>) -> Self {
        self.user_data = user_data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_round_trips() {
        for (v, kind) in [
            (1, RequestKind::File),
            (2, RequestKind::Dir),
            (3, RequestKind::Cancel),
            (4, RequestKind::Debug),
        ] {
            assert_eq!(RequestKind::from_u16(v), Some(kind));
        }
        assert_eq!(RequestKind::from_u16(0), None);
        assert_eq!(RequestKind::from_u16(5), None);
    }

    #[test]
    fn options_mask_ignores_request_bits() {
        let opts = ReqOptions::from_bits(RequestKind::Dir as u16 | ReqOptions::NO_EXISTS);
        assert!(opts.no_exists());
    }

    #[test]
    fn event_code_round_trips() {
        for code in [
            EventCode::Changed,
            EventCode::Deleted,
            EventCode::StartExecuting,
            EventCode::StopExecuting,
            EventCode::Created,
            EventCode::Acknowledge,
            EventCode::Exists,
            EventCode::EndExist,
            EventCode::Moved,
        ] {
            assert_eq!(EventCode::from_u16(code as u16), Some(code));
        }
    }
}
