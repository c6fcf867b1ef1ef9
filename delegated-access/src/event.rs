// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::codec::RealmRole;

/// Kinds of changes to a user's delegated access on a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessEventKind {
    /// Direct access was granted.
    AccessGranted,

    /// Direct access was removed.
    AccessRevoked,

    /// Direct access persists but its settings changed.
    AccessModified,

    ShoppingAdminGranted,

    ShoppingAdminRevoked,

    AccessAdminGranted,

    AccessAdminRevoked,
}

impl AccessEventKind {
    /// Event name as understood by the event bus of the host system.
    pub fn name(&self) -> &'static str {
        match self {
            AccessEventKind::AccessGranted => "dac.nodeperms.add",
            AccessEventKind::AccessRevoked => "dac.nodeperms.delete",
            AccessEventKind::AccessModified => "dac.nodeperms.modified",
            AccessEventKind::ShoppingAdminGranted => "dac.shoppingAdmin.add",
            AccessEventKind::ShoppingAdminRevoked => "dac.shoppingAdmin.delete",
            AccessEventKind::AccessAdminGranted => "dac.accessAdmin.add",
            AccessEventKind::AccessAdminRevoked => "dac.accessAdmin.delete",
        }
    }
}

/// Event emitted by the mutation pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEvent {
    pub kind: AccessEventKind,
    pub user_id: String,
    pub node_id: String,
    pub realm_role: Option<RealmRole>,
}

impl AccessEvent {
    pub fn new(kind: AccessEventKind, user_id: &str, node_id: &str) -> Self {
        Self {
            kind,
            user_id: user_id.to_owned(),
            node_id: node_id.to_owned(),
            realm_role: None,
        }
    }

    pub fn with_realm_role(mut self, realm_role: Option<RealmRole>) -> Self {
        self.realm_role = realm_role;
        self
    }

    /// Resource path of the event, for example "/user/u1/node/n1/realm/r/role/x".
    pub fn resource(&self) -> String {
        match &self.realm_role {
            Some(pair) => format!(
                "/user/{}/node/{}/realm/{}/role/{}",
                self.user_id,
                self.node_id,
                pair.realm(),
                pair.role()
            ),
            None => format!("/user/{}/node/{}", self.user_id, self.node_id),
        }
    }
}

impl Display for AccessEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.resource())
    }
}

/// Fire-and-forget sink for access events.
///
/// Delivery failures are the bus' concern, posting never fails from the caller's point of view.
pub trait EventBus {
    fn post(&self, event: AccessEvent);
}

impl<T: EventBus + ?Sized> EventBus for &T {
    fn post(&self, event: AccessEvent) {
        (**self).post(event)
    }
}

impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    fn post(&self, event: AccessEvent) {
        (**self).post(event)
    }
}

/// Event bus broadcasting to any number of subscribers.
#[derive(Clone, Debug)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<AccessEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccessEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventBus for BroadcastEventBus {
    fn post(&self, event: AccessEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            debug!("no subscribers for access event {event}");
        }
    }
}
