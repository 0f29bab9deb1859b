// SPDX-License-Identifier: LGPL-2.1-or-later

//! Backend that refuses every subscription, forcing the dispatcher to
//! fall back to the polling engine for everything. Selected when the
//! operator passes `--pollonly` or sets `GAM_TEST_DNOTIFY`.

use std::path::Path;

use super::{Backend, BackendError, FlowMode};

#[derive(Debug, Default)]
pub struct PollOnlyBackend;

impl Backend for PollOnlyBackend {
    fn add_subscription(&mut self, _path: &Path, _is_dir: bool) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }

    fn remove_subscription(&mut self, _path: &Path) {}
    fn dir_mode(&mut self, _path: &Path, _mode: FlowMode) {}
    fn file_mode(&mut self, _path: &Path, _mode: FlowMode) {}
}
