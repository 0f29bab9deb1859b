// SPDX-License-Identifier: LGPL-2.1-or-later

//! Kernel backend on top of the `notify` crate, which itself wraps
//! inotify/kqueue/FSEvents/ReadDirectoryChangesW depending on platform
//! — the runtime capability struct this module exists to provide (see
//! `mod.rs`). `notify::RecommendedWatcher` is the concrete watcher
//! `notify` picks for the host platform.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use super::{Backend, BackendError, FlowMode, KernelEvent, KernelEventKind};

pub struct NotifyBackend {
    watcher: RecommendedWatcher,
    refcounts: HashMap<PathBuf, u32>,
}

impl NotifyBackend {
    pub fn new(events_tx: mpsc::Sender<KernelEvent>) -> Result<Self, BackendError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| {
            match res {
                Ok(event) => {
                    let Some(kind) = translate(event.kind) else { return };
                    for path in event.paths {
                        let _ = events_tx.blocking_send(KernelEvent { path, kind });
                    }
                }
                Err(err) => warn!(%err, "kernel watch error"),
            }
        })
        .map_err(|err| BackendError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;

        Ok(Self { watcher, refcounts: HashMap::new() })
    }
}

fn translate(kind: EventKind) -> Option<KernelEventKind> {
    match kind {
        EventKind::Create(_) => Some(KernelEventKind::Create),
        EventKind::Remove(_) => Some(KernelEventKind::Delete),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => Some(KernelEventKind::Move),
        EventKind::Modify(_) => Some(KernelEventKind::Change),
        EventKind::Access(_) | EventKind::Other | EventKind::Any => None,
    }
}

impl Backend for NotifyBackend {
    fn add_subscription(&mut self, path: &Path, _is_dir: bool) -> Result<(), BackendError> {
        let count = self.refcounts.entry(path.to_path_buf()).or_insert(0);
        if *count == 0 {
            self.watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|err| BackendError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        }
        *count += 1;
        Ok(())
    }

    fn remove_subscription(&mut self, path: &Path) {
        let Some(count) = self.refcounts.get_mut(path) else { return };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.refcounts.remove(path);
            let _ = self.watcher.unwatch(path);
        }
    }

    fn dir_mode(&mut self, path: &Path, mode: FlowMode) {
        if matches!(mode, FlowMode::FlowStart) {
            let _ = self.watcher.unwatch(path);
        } else if matches!(mode, FlowMode::FlowStop) {
            let _ = self.watcher.watch(path, RecursiveMode::NonRecursive);
        }
    }

    fn file_mode(&mut self, path: &Path, mode: FlowMode) {
        self.dir_mode(path, mode);
    }
}
