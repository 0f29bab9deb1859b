// SPDX-License-Identifier: LGPL-2.1-or-later

//! Error taxonomy shared by client and daemon (`spec.md` §7).

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum GamError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("bad filename: {0}")]
    BadFilename(String),

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("credential check failed")]
    Auth,

    #[error("allocation failed")]
    Memory,

    #[error("unimplemented")]
    Unimplemented,

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type GamResult<T> = Result<T, GamError>;

impl GamError {
    /// Stable taxonomy name, used for logging and for the client's
    /// process/thread-local `last_error()` surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadArgument(_) => "bad-argument",
            Self::BadFilename(_) => "bad-filename",
            Self::Connect(_) => "connect",
            Self::Auth => "auth",
            Self::Memory => "memory",
            Self::Unimplemented => "unimplemented",
            Self::Protocol(_) => "protocol",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy() {
        assert_eq!(GamError::BadArgument("x".into()).kind(), "bad-argument");
        assert_eq!(GamError::Auth.kind(), "auth");
        assert_eq!(GamError::Unimplemented.kind(), "unimplemented");
    }
}
