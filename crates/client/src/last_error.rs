// SPDX-License-Identifier: LGPL-2.1-or-later

//! Process-global-shaped `last_error()` surface.
//!
//! The FAM API this library mirrors reports failures as a 0/-1 return
//! plus a global error code; a thread-local is the closest idiomatic
//! equivalent for a library that may be driven from several threads,
//! each holding its own [`crate::Connection`] handles.

use std::cell::RefCell;

use gamin_core::GamError;

/// A snapshot of the last error seen by a [`crate::Connection`] call
/// on the current thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: &'static str,
    pub message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// The most recent error recorded on this thread, if any.
pub fn last_error() -> Option<LastError> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

pub(crate) fn record(err: &GamError) {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(LastError { kind: err.kind(), message: err.to_string() });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back() {
        record(&GamError::Auth);
        let seen = last_error().expect("recorded");
        assert_eq!(seen.kind, "auth");
    }
}
