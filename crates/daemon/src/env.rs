// SPDX-License-Identifier: LGPL-2.1-or-later

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve the per-session state directory: `XDG_STATE_HOME/gamin/<session>`
/// or `~/.local/state/gamin/<session>`.
pub fn state_dir(session: &str) -> Result<PathBuf, LifecycleError> {
    let base = if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(xdg).join("gamin")
    } else {
        let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
        home.join(".local/state/gamin")
    };
    Ok(if session.is_empty() { base } else { base.join(session) })
}

/// Forces the poll-only backend regardless of platform kernel-watch
/// availability. Set by `--pollonly` or by `GAM_TEST_DNOTIFY` (there is
/// no separate dnotify driver in this rewrite; see `SPEC_FULL.md` §4.7).
pub fn force_poll_only() -> bool {
    std::env::var_os("GAM_TEST_DNOTIFY").is_some()
}

/// Verbose logging at startup, toggled further at runtime by `SIGUSR2`.
pub fn debug_enabled() -> bool {
    std::env::var_os("GAM_DEBUG").is_some()
}

/// Default polling-engine tick period (`spec.md` §4.6).
pub fn default_poll_period() -> Duration {
    Duration::from_secs(1)
}

/// Idle-exit timeout (`spec.md` §4.9).
pub fn idle_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Per-connection event-queue flush period (`spec.md` §4.8).
pub fn queue_flush_period() -> Duration {
    Duration::from_millis(100)
}
