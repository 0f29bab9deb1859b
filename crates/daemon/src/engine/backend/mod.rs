// SPDX-License-Identifier: LGPL-2.1-or-later

//! Kernel backend interface (`spec.md` §4.7). A small capability
//! struct chosen at startup, per §9's "replace `#ifdef` dispatch with
//! runtime capability structs" note — the engine holds one `Box<dyn
//! Backend>` and never cares which concrete driver is underneath.

mod notify_backend;
mod poll_only;

pub use notify_backend::NotifyBackend;
pub use poll_only::PollOnlyBackend;

use std::path::{Path, PathBuf};

/// `dir_mode`/`file_mode`'s hybrid-mode signal. Arming and disarming a
/// watch for a subscription (activate/deactivate) already has its own
/// pair of trait methods below (`add_subscription`/`remove_subscription`)
/// with per-path refcounting; only the two modes the polling engine
/// drives on its own — switching a hot path to poll-only and back —
/// need a distinct call here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    FlowStart,
    FlowStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEventKind {
    Create,
    Delete,
    Change,
    Move,
    Overflow,
}

#[derive(Debug, Clone)]
pub struct KernelEvent {
    pub path: PathBuf,
    pub kind: KernelEventKind,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend does not support this path")]
    Unsupported,
    #[error("backend error: {0}")]
    Io(#[from] std::io::Error),
}

/// One interchangeable kernel-notification driver. All operations are
/// refcounted per path: multiple subscriptions against the same
/// directory share one underlying watch.
pub trait Backend: Send {
    fn add_subscription(&mut self, path: &Path, is_dir: bool) -> Result<(), BackendError>;
    fn remove_subscription(&mut self, path: &Path);
    fn dir_mode(&mut self, path: &Path, mode: FlowMode);
    fn file_mode(&mut self, path: &Path, mode: FlowMode);
}
