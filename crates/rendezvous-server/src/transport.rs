//! Connection directory.
//!
//! Maps connection ids to the delivery lane and close token of the owning
//! `ConnectionActor`. The registry reaches connections only through the
//! [`Transport`] trait. The delivery lane is unbounded, so a relay is never
//! lost to a slow reader and the registry never waits on a peer.

use crate::actors::messages::Delivery;
use crate::actors::metrics::MailboxMonitor;
use crate::types::ConnectionId;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Delivery primitives the registry needs from the transport.
pub trait Transport: Send + Sync {
    /// Queue `delivery` for `to`. Returns false if the connection is gone.
    fn deliver(&self, to: &ConnectionId, delivery: Delivery) -> bool;

    /// Close `id` from the server side. Idempotent.
    fn force_close(&self, id: &ConnectionId);
}

/// Addressing information for one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    pub deliveries: mpsc::UnboundedSender<Delivery>,
    pub close_token: CancellationToken,
    /// The owning actor's mailbox monitor; deliveries count toward its depth.
    pub mailbox: Arc<MailboxMonitor>,
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    links: RwLock<HashMap<ConnectionId, ConnectionLink>>,
}

impl ConnectionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, link: ConnectionLink) {
        if let Ok(mut links) = self.links.write() {
            links.insert(id, link);
        }
    }

    pub fn unregister(&self, id: &ConnectionId) {
        if let Ok(mut links) = self.links.write() {
            links.remove(id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.read().map(|links| links.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn link(&self, id: &ConnectionId) -> Option<ConnectionLink> {
        self.links
            .read()
            .ok()
            .and_then(|links| links.get(id).cloned())
    }
}

impl Transport for ConnectionDirectory {
    fn deliver(&self, to: &ConnectionId, delivery: Delivery) -> bool {
        let Some(link) = self.link(to) else {
            debug!(
                target: "rendezvous.transport",
                connection_id = %to,
                event = delivery.event.name(),
                "Delivery target not registered"
            );
            return false;
        };

        link.mailbox.record_enqueue();
        if link.deliveries.send(delivery).is_err() {
            link.mailbox.cancel_enqueue();
            debug!(
                target: "rendezvous.transport",
                connection_id = %to,
                "Delivery target already stopped"
            );
            return false;
        }
        true
    }

    fn force_close(&self, id: &ConnectionId) {
        if let Some(link) = self.link(id) {
            debug!(
                target: "rendezvous.transport",
                connection_id = %id,
                "Force closing connection"
            );
            link.close_token.cancel();
        }
    }
}
