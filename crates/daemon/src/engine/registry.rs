// SPDX-License-Identifier: LGPL-2.1-or-later

//! Subscription registry (`spec.md` §3, §4.3): the set of active
//! monitor requests, keyed by (connection, reqno) and indexed by tree
//! node for delivery.

use std::collections::HashMap;

use gamin_core::{ReqNo, ReqOptions, RequestKind};

use crate::engine::tree::NodeId;
use crate::listener::ConnId;

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    Init,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub conn: ConnId,
    pub reqno: ReqNo,
    pub node: NodeId,
    pub is_dir: bool,
    pub options: ReqOptions,
    pub state: SubState,
    /// Set once the subscription has delivered at least one
    /// post-reconnect live event, used to suppress "restart noise"
    /// from the client's point of view — tracked here too so a
    /// daemon restart test can assert on it directly.
    pub seen_live_event: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: HashMap<SubscriptionId, Subscription>,
    by_conn_reqno: HashMap<(ConnId, ReqNo), SubscriptionId>,
    next_id: SubscriptionId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("reqno {0} already in use on this connection")]
    ReqnoInUse(ReqNo),
    #[error("no such subscription")]
    NotFound,
}

impl SubscriptionRegistry {
    pub fn add(
        &mut self,
        conn: ConnId,
        reqno: ReqNo,
        kind: RequestKind,
        options: ReqOptions,
        node: NodeId,
    ) -> Result<SubscriptionId, RegistryError> {
        if self.by_conn_reqno.contains_key(&(conn, reqno)) {
            return Err(RegistryError::ReqnoInUse(reqno));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.subs.insert(
            id,
            Subscription {
                id,
                conn,
                reqno,
                node,
                is_dir: kind.is_dir(),
                options,
                state: SubState::Init,
                seen_live_event: false,
            },
        );
        self.by_conn_reqno.insert((conn, reqno), id);
        Ok(id)
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subs.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subs.get_mut(&id)
    }

    pub fn find(&self, conn: ConnId, reqno: ReqNo) -> Option<SubscriptionId> {
        self.by_conn_reqno.get(&(conn, reqno)).copied()
    }

    /// Marks cancelled; the caller is responsible for draining the
    /// queue and emitting the final Acknowledge, then calling
    /// [`SubscriptionRegistry::remove`] once that Acknowledge is sent.
    pub fn cancel(&mut self, id: SubscriptionId) -> Result<(), RegistryError> {
        let sub = self.subs.get_mut(&id).ok_or(RegistryError::NotFound)?;
        sub.state = SubState::Cancelled;
        Ok(())
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.subs.remove(&id)?;
        self.by_conn_reqno.remove(&(sub.conn, sub.reqno));
        Some(sub)
    }

    /// All subscriptions on `conn`, for teardown on connection close.
    pub fn for_connection(&self, conn: ConnId) -> Vec<SubscriptionId> {
        self.subs.values().filter(|s| s.conn == conn).map(|s| s.id).collect()
    }
}
