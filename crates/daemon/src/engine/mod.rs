// SPDX-License-Identifier: LGPL-2.1-or-later

//! The event engine: path tree, subscription registry, polling engine,
//! and backend dispatcher, all owned by a single task (`spec.md` §5,
//! §9's "Global mutable state" note). Everything else talks to it over
//! [`EngineHandle`]'s `mpsc` channel — the actor pattern keeps the hard
//! state lock-free even though connection I/O runs on its own tasks.

pub mod backend;
pub mod registry;
pub mod tree;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use gamin_core::{Event, EventCode, GamError, GamResult, ReqNo, ReqOptions, RequestKind};

use crate::config::{FsPolicy, GaminRc};
use crate::listener::ConnId;
use backend::{Backend, FlowMode, KernelEvent, KernelEventKind};
use registry::{SubscriptionId, SubscriptionRegistry};
use tree::{NodeId, PathTree, StatSnapshot};

/// Consecutive same-second modifications before a node is marked BUSY.
const BUSY_CHECK_THRESHOLD: u8 = 4;
/// Consecutive quiet ticks before a BUSY node returns to normal.
const BUSY_QUIET_THRESHOLD: u8 = 5;

pub enum EngineCommand {
    Subscribe {
        conn: ConnId,
        reqno: ReqNo,
        kind: RequestKind,
        options: ReqOptions,
        path: PathBuf,
        reply: oneshot::Sender<GamResult<()>>,
    },
    Cancel {
        conn: ConnId,
        reqno: ReqNo,
    },
    ConnectionOpened {
        conn: ConnId,
        events_tx: mpsc::Sender<Event>,
    },
    ConnectionClosed {
        conn: ConnId,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Cheap, cloneable front for talking to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn subscribe(
        &self,
        conn: ConnId,
        reqno: ReqNo,
        kind: RequestKind,
        options: ReqOptions,
        path: PathBuf,
    ) -> GamResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(EngineCommand::Subscribe { conn, reqno, kind, options, path, reply })
            .await;
        rx.await.unwrap_or(Err(GamError::Connect(std::io::Error::new(
            std::io::ErrorKind::Other,
            "engine task gone",
        ))))
    }

    pub async fn cancel(&self, conn: ConnId, reqno: ReqNo) {
        let _ = self.tx.send(EngineCommand::Cancel { conn, reqno }).await;
    }

    pub async fn connection_opened(&self, conn: ConnId, events_tx: mpsc::Sender<Event>) {
        let _ = self.tx.send(EngineCommand::ConnectionOpened { conn, events_tx }).await;
    }

    pub async fn connection_closed(&self, conn: ConnId) {
        let _ = self.tx.send(EngineCommand::ConnectionClosed { conn }).await;
    }

    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::ConnectionCount { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Owns the running engine task. Dropping this without calling
/// [`Engine::shutdown`] leaves the task running detached.
pub struct Engine {
    handle: EngineHandle,
    task: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// `make_backend` receives the sender half of the kernel-event
    /// channel so backends that need one (e.g. [`backend::NotifyBackend`])
    /// can be constructed with it already wired up; backends that don't
    /// (e.g. [`backend::PollOnlyBackend`]) simply ignore the argument.
    pub fn spawn(
        make_backend: impl FnOnce(mpsc::Sender<KernelEvent>) -> Box<dyn Backend>,
        poll_period: Duration,
        rc: GaminRc,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (kernel_tx, kernel_rx) = mpsc::channel(256);
        let backend = make_backend(kernel_tx);
        let state = EngineState::new(backend, rc);
        let task = tokio::spawn(state.run(rx, kernel_rx, poll_period));
        Self { handle: EngineHandle { tx }, task }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub async fn connection_count(&self) -> usize {
        self.handle.connection_count().await
    }

    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(EngineCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

struct EngineState {
    tree: PathTree,
    registry: SubscriptionRegistry,
    backend: Box<dyn Backend>,
    rc: GaminRc,
    connections: HashMap<ConnId, mpsc::Sender<Event>>,
}

impl EngineState {
    fn new(backend: Box<dyn Backend>, rc: GaminRc) -> Self {
        Self {
            tree: PathTree::new(Instant::now()),
            registry: SubscriptionRegistry::default(),
            backend,
            rc,
            connections: HashMap::new(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut kernel_events: mpsc::Receiver<KernelEvent>,
        poll_period: Duration,
    ) {
        let mut ticker = tokio::time::interval(poll_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(cmd) = commands.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(kevent) = kernel_events.recv() => {
                    self.handle_kernel_event(kevent);
                }
                _ = ticker.tick() => {
                    self.poll_tick();
                }
                else => break,
            }
        }
    }

    /// Returns `true` if the engine should stop.
    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Subscribe { conn, reqno, kind, options, path, reply } => {
                let result = self.subscribe(conn, reqno, kind, options, path);
                let _ = reply.send(result);
                false
            }
            EngineCommand::Cancel { conn, reqno } => {
                self.cancel(conn, reqno);
                false
            }
            EngineCommand::ConnectionOpened { conn, events_tx } => {
                self.connections.insert(conn, events_tx);
                false
            }
            EngineCommand::ConnectionClosed { conn } => {
                self.connection_closed(conn);
                false
            }
            EngineCommand::ConnectionCount { reply } => {
                let _ = reply.send(self.connections.len());
                false
            }
            EngineCommand::Shutdown => true,
        }
    }

    fn subscribe(
        &mut self,
        conn: ConnId,
        reqno: ReqNo,
        kind: RequestKind,
        options: ReqOptions,
        path: PathBuf,
    ) -> GamResult<()> {
        if !path.is_absolute() {
            return Err(GamError::BadFilename(format!("{path:?} is not absolute")));
        }

        let now = Instant::now();
        let node_id = self.tree.get_or_create(&path, now);
        let sub_id = self
            .registry
            .add(conn, reqno, kind, options, node_id)
            .map_err(|e| GamError::BadArgument(e.to_string()))?;
        self.tree.node_mut(node_id).subs.push(sub_id);

        self.arm_backend_for(node_id, &path);
        self.emit_initial_enumeration(sub_id, node_id, kind, options);
        Ok(())
    }

    fn arm_backend_for(&mut self, node_id: NodeId, path: &Path) {
        let is_dir = self.tree.node(node_id).is_dir();
        let excluded = match self.rc.fs_policy_for_path(path) {
            Some(FsPolicy::Kernel) => false,
            Some(FsPolicy::Poll) | Some(FsPolicy::None) => true,
            None => self.rc.is_kernel_excluded(path),
        };
        let armed = !excluded && self.backend.add_subscription(path, is_dir).is_ok();
        self.tree.node_mut(node_id).flags.no_kernel = !armed;
    }

    fn emit_initial_enumeration(
        &mut self,
        sub_id: SubscriptionId,
        node_id: NodeId,
        kind: RequestKind,
        options: ReqOptions,
    ) {
        let path = self.tree.node(node_id).path.clone();
        let meta = fs::symlink_metadata(&path);

        match meta {
            Err(_) => {
                self.tree.node_mut(node_id).flags.missing = true;
                self.send_to_sub(sub_id, EventCode::Deleted, path);
            }
            Ok(meta) => {
                self.tree.node_mut(node_id).baseline = Some(snapshot(&meta));
                if kind.is_dir() && !meta.is_dir() {
                    self.tree.node_mut(node_id).flags.wrong_type = true;
                    self.send_to_sub(sub_id, EventCode::Deleted, path.clone());
                    self.send_to_sub(sub_id, EventCode::EndExist, path);
                    return;
                }
                if options.no_exists() {
                    return;
                }
                self.send_to_sub(sub_id, EventCode::Exists, path.clone());
                if meta.is_dir() {
                    if let Ok(entries) = fs::read_dir(&path) {
                        let mut names = std::collections::HashSet::new();
                        for entry in entries.flatten() {
                            let name = entry.file_name();
                            self.send_to_sub(sub_id, EventCode::Exists, PathBuf::from(&name));
                            names.insert(name);
                        }
                        self.tree.node_mut(node_id).entries = Some(names);
                    }
                }
                self.send_to_sub(sub_id, EventCode::EndExist, path);
            }
        }
    }

    fn cancel(&mut self, conn: ConnId, reqno: ReqNo) {
        let Some(sub_id) = self.registry.find(conn, reqno) else { return };
        let Some(node_id) = self.registry.get(sub_id).map(|s| s.node) else { return };
        let path = self.tree.node(node_id).path.clone();

        if self.registry.cancel(sub_id).is_err() {
            return;
        }
        // Drain: nothing further is enqueued for this subscription since
        // `dispatch` skips Cancelled subscriptions; Acknowledge is last.
        self.send_to_sub(sub_id, EventCode::Acknowledge, path);

        if let Some(removed) = self.registry.remove(sub_id) {
            self.tree.node_mut(removed.node).subs.retain(|&id| id != sub_id);
        }
        self.unarm_if_unused(node_id);
        self.tree.prune(node_id);
    }

    fn unarm_if_unused(&mut self, node_id: NodeId) {
        if self.tree.node(node_id).subs.is_empty() {
            let path = self.tree.node(node_id).path.clone();
            self.backend.remove_subscription(&path);
        }
    }

    fn connection_closed(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
        for sub_id in self.registry.for_connection(conn) {
            if let Some(removed) = self.registry.remove(sub_id) {
                let node_id = removed.node;
                self.tree.node_mut(node_id).subs.retain(|&id| id != sub_id);
                self.unarm_if_unused(node_id);
                self.tree.prune(node_id);
            }
        }
    }

    fn send_to_sub(&mut self, sub_id: SubscriptionId, code: EventCode, full_path: PathBuf) {
        let Some(sub) = self.registry.get(sub_id) else { return };
        if sub.state == registry::SubState::Cancelled && code != EventCode::Acknowledge {
            return;
        }
        let Some(tx) = self.connections.get(&sub.conn) else { return };
        let event = Event::new(sub.reqno, code, full_path).with_user_data(None);
        let _ = tx.try_send(event);
    }

    /// Deliver a node-level event to every live subscription attached
    /// directly to that node (`spec.md` §4.3's `dispatch(path, event)`).
    fn dispatch_node_event(&mut self, node_id: NodeId, code: EventCode) {
        let path = self.tree.node(node_id).path.clone();
        let sub_ids: Vec<SubscriptionId> =
            self.tree.node(node_id).subs.iter().copied().collect();
        for sub_id in sub_ids {
            self.send_to_sub(sub_id, code, path.clone());
        }
    }

    /// Deliver a directory-content event (basename only) to the
    /// directory-type subscriptions on `parent_id`.
    fn dispatch_entry_event(&mut self, parent_id: NodeId, code: EventCode, name: &std::ffi::OsStr) {
        let sub_ids: Vec<SubscriptionId> = self
            .tree
            .node(parent_id)
            .subs
            .iter()
            .copied()
            .filter(|id| self.registry.get(*id).map(|s| s.is_dir).unwrap_or(false))
            .collect();
        for sub_id in sub_ids {
            self.send_to_sub(sub_id, code, PathBuf::from(name));
        }
    }

    fn handle_kernel_event(&mut self, kevent: KernelEvent) {
        let KernelEvent { path, kind } = kevent;
        if kind == KernelEventKind::Overflow {
            warn!("kernel backend queue overflow, rescan will catch up on next tick");
            return;
        }

        if let Some(node_id) = self.tree.lookup(&path) {
            self.reconcile_node(node_id);
            return;
        }
        let Some(parent) = path.parent() else { return };
        let Some(parent_id) = self.tree.lookup(parent) else { return };
        let Some(name) = path.file_name() else { return };
        let code = match kind {
            KernelEventKind::Create => EventCode::Created,
            KernelEventKind::Delete => EventCode::Deleted,
            KernelEventKind::Move => EventCode::Moved,
            KernelEventKind::Change => EventCode::Changed,
            KernelEventKind::Overflow => return,
        };
        self.dispatch_entry_event(parent_id, code, name);
        if let Some(entries) = self.tree.node_mut(parent_id).entries.as_mut() {
            match kind {
                KernelEventKind::Create | KernelEventKind::Move => {
                    entries.insert(name.to_os_string());
                }
                KernelEventKind::Delete => {
                    entries.remove(name);
                }
                _ => {}
            }
        }
    }

    /// Re-stat a node that the kernel backend flagged as changed, and
    /// emit the appropriate event. Shared with the polling tick so the
    /// stat-diff logic exists in exactly one place.
    fn reconcile_node(&mut self, node_id: NodeId) {
        self.check_node(node_id, Instant::now());
    }

    fn poll_tick(&mut self) {
        let now = Instant::now();
        for node_id in self.tree.ids().collect::<Vec<_>>() {
            if node_id == tree::ROOT {
                continue;
            }
            let poll_timeout = self.poll_timeout_for(node_id);
            if now.duration_since(self.tree.node(node_id).last_poll) < poll_timeout {
                continue;
            }
            self.tree.node_mut(node_id).last_poll = now;
            self.check_node(node_id, now);
        }
    }

    fn poll_timeout_for(&self, node_id: NodeId) -> Duration {
        let path = &self.tree.node(node_id).path;
        self.rc.poll_period_for_path(path).unwrap_or_else(crate::env::default_poll_period)
    }

    /// The single stat-diff routine used by poll ticks, kernel-backend
    /// reconciliation, and missing-list rescans (`spec.md` §4.6).
    fn check_node(&mut self, node_id: NodeId, now: Instant) {
        let path = self.tree.node(node_id).path.clone();
        let meta = fs::symlink_metadata(&path);
        let was_missing = self.tree.node(node_id).flags.missing;

        match meta {
            Err(_) => {
                if !was_missing {
                    self.tree.node_mut(node_id).flags.missing = true;
                    self.tree.node_mut(node_id).flags.busy = false;
                    self.dispatch_node_event(node_id, EventCode::Deleted);
                }
                self.tree.node_mut(node_id).baseline = None;
            }
            Ok(meta) => {
                let new_snapshot = snapshot(&meta);
                let old_snapshot = self.tree.node(node_id).baseline;
                self.tree.node_mut(node_id).baseline = Some(new_snapshot);

                if was_missing {
                    self.tree.node_mut(node_id).flags.missing = false;
                    self.arm_backend_for(node_id, &path);
                    self.dispatch_node_event(node_id, EventCode::Created);
                } else if old_snapshot != Some(new_snapshot) {
                    self.dispatch_node_event(node_id, EventCode::Changed);
                    self.diff_directory_entries(node_id, &path, &meta);
                    self.update_adaptive_flow(node_id, now);
                } else {
                    self.decay_busy(node_id);
                }
            }
        }
    }

    fn diff_directory_entries(&mut self, node_id: NodeId, path: &Path, meta: &fs::Metadata) {
        if !meta.is_dir() {
            return;
        }
        let Ok(read) = fs::read_dir(path) else { return };
        let current: std::collections::HashSet<std::ffi::OsString> =
            read.flatten().map(|e| e.file_name()).collect();

        let previous = self.tree.node(node_id).entries.clone().unwrap_or_default();
        for added in current.difference(&previous) {
            self.dispatch_entry_event(node_id, EventCode::Created, added);
        }
        for removed in previous.difference(&current) {
            self.dispatch_entry_event(node_id, EventCode::Deleted, removed);
        }
        self.tree.node_mut(node_id).entries = Some(current);
    }

    /// §4.6's adaptive flow control: four consecutive same-tick
    /// modifications promotes a node to BUSY poll-only mode.
    fn update_adaptive_flow(&mut self, node_id: NodeId, _now: Instant) {
        let node = self.tree.node_mut(node_id);
        node.quiet_counter = 0;
        if node.flags.busy {
            return;
        }
        node.check_counter = node.check_counter.saturating_add(1);
        if node.check_counter < BUSY_CHECK_THRESHOLD {
            return;
        }

        node.flags.busy = true;
        let path = node.path.clone();
        let is_dir = node.is_dir();
        let parent = node.parent;

        if is_dir {
            self.backend.dir_mode(&path, FlowMode::FlowStart);
        } else {
            self.backend.file_mode(&path, FlowMode::FlowStart);
            if let Some(parent_id) = parent {
                self.tree.node_mut(parent_id).flags.busy = true;
            }
        }
        debug!(?path, "node marked busy, switching to poll-only flow control");
    }

    fn decay_busy(&mut self, node_id: NodeId) {
        let node = self.tree.node_mut(node_id);
        node.check_counter = 0;
        if !node.flags.busy {
            return;
        }
        node.quiet_counter = node.quiet_counter.saturating_add(1);
        if node.quiet_counter < BUSY_QUIET_THRESHOLD {
            return;
        }

        node.flags.busy = false;
        let path = node.path.clone();
        let is_dir = node.is_dir();
        if is_dir {
            self.backend.dir_mode(&path, FlowMode::FlowStop);
        } else {
            self.backend.file_mode(&path, FlowMode::FlowStop);
        }
        debug!(?path, "node quiesced, restoring kernel monitoring");
    }
}

fn snapshot(meta: &fs::Metadata) -> StatSnapshot {
    use std::os::unix::fs::MetadataExt;
    StatSnapshot {
        mtime_ns: meta.mtime() * 1_000_000_000 + meta.mtime_nsec(),
        ctime_ns: meta.ctime() * 1_000_000_000 + meta.ctime_nsec(),
        size: meta.size(),
        is_dir: meta.is_dir(),
    }
}
