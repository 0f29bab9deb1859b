// SPDX-License-Identifier: LGPL-2.1-or-later

//! Session identifiers and socket-path derivation shared by the
//! client library and the daemon (`spec.md` §4.10).

use std::fmt;
use std::path::PathBuf;

/// Session id: isolates multiple daemons per user (`GAM_CLIENT_ID`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads `GAM_CLIENT_ID`, defaulting to the empty (default) session.
    pub fn from_env() -> Self {
        Self(std::env::var("GAM_CLIENT_ID").unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either an abstract-namespace address (Linux only, preferred) or a
/// filesystem path under a owner-only-permission directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPath {
    #[cfg(target_os = "linux")]
    Abstract(String),
    Path(PathBuf),
}

/// Derive this (user, session) pair's socket path.
///
/// Mirrors the scheme in `spec.md` §4.10: `/tmp/fam-<user>-<client-id>`
/// when abstract sockets are available (Linux), otherwise
/// `/tmp/fam-<user>/fam-<client-id>` with the parent directory locked
/// to owner-only permissions.
pub fn socket_path(user: &str, session: &SessionId) -> SocketPath {
    #[cfg(target_os = "linux")]
    {
        let name = if session.as_str().is_empty() {
            format!("fam-{user}")
        } else {
            format!("fam-{user}-{}", session.as_str())
        };
        return SocketPath::Abstract(name);
    }

    #[cfg(not(target_os = "linux"))]
    {
        let name = if session.as_str().is_empty() {
            "fam".to_string()
        } else {
            format!("fam-{}", session.as_str())
        };
        let dir = std::env::temp_dir().join(format!("fam-{user}"));
        SocketPath::Path(dir.join(name))
    }
}

/// Ensure the filesystem-path variant's parent directory exists with
/// owner-only permissions. No-op for abstract-namespace addresses.
#[cfg(unix)]
pub fn ensure_socket_dir(path: &SocketPath) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let SocketPath::Path(p) = path else { return Ok(()) };
    let Some(dir) = p.parent() else { return Ok(()) };

    std::fs::create_dir_all(dir)?;
    let meta = std::fs::metadata(dir)?;
    let mode = meta.permissions().mode() & 0o777;
    if mode != 0o700 {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_from_env_defaults_empty() {
        std::env::remove_var("GAM_CLIENT_ID");
        assert_eq!(SessionId::from_env().as_str(), "");
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn path_variant_is_owner_scoped() {
        let path = socket_path("alice", &SessionId::new("work"));
        match path {
            SocketPath::Path(p) => {
                assert!(p.to_string_lossy().contains("fam-alice"));
                assert!(p.to_string_lossy().contains("fam-work"));
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected path variant off-Linux"),
        }
    }
}
