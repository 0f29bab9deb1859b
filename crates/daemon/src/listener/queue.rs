// SPDX-License-Identifier: LGPL-2.1-or-later

//! Per-connection event queue: tail-coalescing FIFO flushed on a timer
//! (`spec.md` §4.8, invariant 4).

use std::collections::VecDeque;
use std::time::Duration;

use gamin_core::Event;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Runs as part of the connection's write-side task: receives events
/// from the engine, coalesces consecutive duplicates, and flushes on
/// `period` or when told to flush immediately.
pub struct EventQueue {
    inner: VecDeque<Event>,
    period: Duration,
}

impl EventQueue {
    pub fn new(period: Duration) -> Self {
        Self { inner: VecDeque::new(), period }
    }

    /// Push `event`, dropping it if it exactly duplicates the current
    /// tail (reqno, code, path) — "tail-coalescing only", per §4.8.
    pub fn push(&mut self, event: Event) {
        if let Some(tail) = self.inner.back() {
            if tail.reqno == event.reqno && tail.code == event.code && tail.path == event.path {
                return;
            }
        }
        self.inner.push_back(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.inner.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn flush_period(&self) -> Duration {
        self.period
    }
}

/// Drives one connection's outbound side: receives events from the
/// engine via `events_rx`, coalesces through an [`EventQueue`], and
/// writes framed packets on a periodic flush timer.
pub async fn run_writer<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    mut events_rx: mpsc::Receiver<Event>,
    period: Duration,
) -> std::io::Result<()> {
    let mut queue = EventQueue::new(period);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = events_rx.recv() => {
                match maybe_event {
                    Some(event) => queue.push(event),
                    None => {
                        flush(&mut writer, &mut queue).await?;
                        return Ok(());
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&mut writer, &mut queue).await?;
            }
        }
    }
}

async fn flush<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    queue: &mut EventQueue,
) -> std::io::Result<()> {
    if queue.is_empty() {
        return Ok(());
    }
    let events: Vec<Event> = queue.drain().collect();
    for event in events {
        let packet = gamin_wire::encode_event(&event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        gamin_wire::write_packet(writer, &packet).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamin_core::EventCode;

    #[test]
    fn coalesces_identical_tail() {
        let mut queue = EventQueue::new(Duration::from_millis(100));
        queue.push(Event::new(1, EventCode::Changed, "/a"));
        queue.push(Event::new(1, EventCode::Changed, "/a"));
        assert_eq!(queue.drain().count(), 1);
    }

    #[test]
    fn does_not_coalesce_distinct_events() {
        let mut queue = EventQueue::new(Duration::from_millis(100));
        queue.push(Event::new(1, EventCode::Changed, "/a"));
        queue.push(Event::new(1, EventCode::Deleted, "/a"));
        assert_eq!(queue.drain().count(), 2);
    }
}
