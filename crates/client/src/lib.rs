// SPDX-License-Identifier: LGPL-2.1-or-later

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Client library for the per-(user, session) file-alteration-monitor
//! daemon: connection lifecycle, auto-launch of `gamind` on first
//! connect failure, and transparent reconnect with re-subscription.
//!
//! One [`Connection`] owns one background task that speaks the wire
//! protocol and holds the live-request table needed to resubscribe
//! after a reconnect; application code only ever sees the
//! [`Connection`] handle, matching the actor-plus-handle shape used by
//! the daemon's own engine.

mod last_error;
mod launch;
mod connection;
mod task;

pub use gamin_core::{Event, EventCode, GamError, GamResult, ReqNo};
pub use connection::Connection;
pub use last_error::{last_error, LastError};
