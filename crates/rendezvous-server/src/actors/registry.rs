//! `PairingRegistryActor` - process-wide room table.
//!
//! The registry is a singleton actor that owns every room:
//!
//! - Maps room id to its member connection ids (at most two)
//! - Keeps a reverse index so a connection is in at most one room
//! - Deletes rooms as soon as they become empty
//! - Delivers events and forced closes through a [`Transport`]
//!
//! Every operation is one mailbox message handled to completion, so the
//! size check and the insert of `try_join` can never interleave with another
//! join on the same room.

use crate::errors::RendezvousError;
use crate::observability::metrics as prom;
use crate::protocol::OutboundEvent;
use crate::transport::Transport;
use crate::types::{ConnectionId, RoomId};

use super::messages::{
    Delivery, JoinError, JoinOutcome, RegistryMessage, RegistryStatus, RelayError,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Maximum members of a room.
pub const ROOM_CAPACITY: usize = 2;

/// Handle to the `PairingRegistryActor`.
///
/// Cheap to clone; every connection actor holds one.
#[derive(Clone, Debug)]
pub struct PairingRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl PairingRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Registry, "registry"));

        let actor = PairingRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            transport,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn request<T>(
        &self,
        message: RegistryMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, RendezvousError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.mailbox.cancel_enqueue();
            return Err(RendezvousError::Internal(format!("channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| RendezvousError::Internal(format!("response receive failed: {e}")))
    }

    /// Allocate a fresh room with no members.
    pub async fn create_room(&self) -> Result<RoomId, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryMessage::CreateRoom { respond_to: tx }, rx)
            .await
    }

    /// Leave all rooms, then create a room with `connection_id` as its only member.
    pub async fn host_room(&self, connection_id: ConnectionId) -> Result<RoomId, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::HostRoom {
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Leave the current room, then join `room_id`.
    pub async fn try_join(
        &self,
        room_id: RoomId,
        connection_id: ConnectionId,
    ) -> Result<Result<JoinOutcome, JoinError>, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::TryJoin {
                room_id,
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Leave every room; returns the rooms that were vacated.
    pub async fn leave_all(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<RoomId>, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::LeaveAll {
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Current members of `room_id` (empty if it does not exist).
    pub async fn snapshot(
        &self,
        room_id: RoomId,
    ) -> Result<HashSet<ConnectionId>, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Snapshot {
                room_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Deliver `event` to every member of `room_id`.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        event: OutboundEvent,
    ) -> Result<usize, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Broadcast {
                room_id,
                event,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Relay `event` to the sender's room if it is a paired room.
    pub async fn relay(
        &self,
        connection_id: ConnectionId,
        event: OutboundEvent,
    ) -> Result<Result<RoomId, RelayError>, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Relay {
                connection_id,
                event,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Remove `connection_id` and close every peer that shared a room with it.
    pub async fn evict(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Vec<ConnectionId>, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RegistryMessage::Evict {
                connection_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, RendezvousError> {
        let (tx, rx) = oneshot::channel();
        self.request(RegistryMessage::GetStatus { respond_to: tx }, rx)
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Requests queued and not yet handled.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }
}

#[derive(Debug, Default)]
struct Room {
    members: HashSet<ConnectionId>,
}

/// The `PairingRegistryActor` implementation.
pub struct PairingRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, Room>,
    /// Reverse index: the room each connection belongs to.
    memberships: HashMap<ConnectionId, RoomId>,
    transport: Arc<dyn Transport>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl PairingRegistryActor {
    #[instrument(skip_all, name = "rendezvous.actor.registry")]
    async fn run(mut self) {
        info!(target: "rendezvous.actor.registry", "PairingRegistryActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rendezvous.actor.registry",
                        "PairingRegistryActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rendezvous.actor.registry",
                                "PairingRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rendezvous.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "PairingRegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom { respond_to } => {
                let _ = respond_to.send(self.create_room());
            }

            RegistryMessage::HostRoom {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.host_room(connection_id));
            }

            RegistryMessage::TryJoin {
                room_id,
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.try_join(&room_id, connection_id));
            }

            RegistryMessage::LeaveAll {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.leave_all(&connection_id));
            }

            RegistryMessage::Snapshot {
                room_id,
                respond_to,
            } => {
                let members = self
                    .rooms
                    .get(&room_id)
                    .map(|room| room.members.clone())
                    .unwrap_or_default();
                let _ = respond_to.send(members);
            }

            RegistryMessage::Broadcast {
                room_id,
                event,
                respond_to,
            } => {
                let _ = respond_to.send(self.broadcast(&room_id, &event));
            }

            RegistryMessage::Relay {
                connection_id,
                event,
                respond_to,
            } => {
                let _ = respond_to.send(self.relay(&connection_id, &event));
            }

            RegistryMessage::Evict {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.evict(&connection_id));
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    rooms: self.rooms.len(),
                    members: self.memberships.len(),
                });
            }
        }
    }

    fn create_room(&mut self) -> RoomId {
        let mut room_id = RoomId::generate();
        while self.rooms.contains_key(&room_id) {
            room_id = RoomId::generate();
        }
        self.rooms.insert(room_id.clone(), Room::default());
        self.metrics.set_rooms(self.rooms.len());
        prom::record_room_created();

        debug!(
            target: "rendezvous.actor.registry",
            total_rooms = self.rooms.len(),
            "Room created"
        );

        room_id
    }

    fn host_room(&mut self, connection_id: ConnectionId) -> RoomId {
        self.leave_all(&connection_id);
        let room_id = self.create_room();
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.members.insert(connection_id.clone());
        }
        self.memberships.insert(connection_id, room_id.clone());
        room_id
    }

    fn try_join(
        &mut self,
        room_id: &RoomId,
        connection_id: ConnectionId,
    ) -> Result<JoinOutcome, JoinError> {
        // A connection belongs to at most one room; it stays out of its old
        // room even when this join is refused.
        self.leave_all(&connection_id);

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(JoinError::RoomNotFound);
        };
        if room.members.len() >= ROOM_CAPACITY {
            return Err(JoinError::RoomFull);
        }
        room.members.insert(connection_id.clone());
        let outcome = outcome_for(room.members.len());
        self.memberships.insert(connection_id, room_id.clone());

        if outcome == JoinOutcome::Paired {
            prom::record_pairing();
        }

        debug!(
            target: "rendezvous.actor.registry",
            member_count = outcome.member_count(),
            "Connection joined room"
        );

        Ok(outcome)
    }

    fn leave_all(&mut self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let Some(room_id) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        let now_empty = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.members.remove(connection_id);
                room.members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(&room_id);
            self.metrics.set_rooms(self.rooms.len());
        }

        vec![room_id]
    }

    fn broadcast(&self, room_id: &RoomId, event: &OutboundEvent) -> usize {
        let Some(room) = self.rooms.get(room_id) else {
            return 0;
        };

        room.members
            .iter()
            .filter(|member| {
                self.transport.deliver(
                    member,
                    Delivery {
                        room_id: room_id.clone(),
                        event: event.clone(),
                    },
                )
            })
            .count()
    }

    fn relay(
        &self,
        connection_id: &ConnectionId,
        event: &OutboundEvent,
    ) -> Result<RoomId, RelayError> {
        let Some(room_id) = self.memberships.get(connection_id) else {
            return Err(RelayError::NotInRoom);
        };
        let paired = self
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.len() == ROOM_CAPACITY);
        if !paired {
            return Err(RelayError::RoomNotPaired);
        }

        let delivered = self.broadcast(room_id, event);
        if delivered < ROOM_CAPACITY {
            warn!(
                target: "rendezvous.actor.registry",
                event = event.name(),
                delivered = delivered,
                "Relay reached fewer members than the room holds"
            );
        }

        Ok(room_id.clone())
    }

    fn evict(&mut self, connection_id: &ConnectionId) -> Vec<ConnectionId> {
        let mut closed = Vec::new();

        for room_id in self.leave_all(connection_id) {
            let Some(room) = self.rooms.remove(&room_id) else {
                continue;
            };
            for peer in room.members {
                self.memberships.remove(&peer);
                self.transport.force_close(&peer);
                prom::record_forced_close();
                closed.push(peer);
            }
        }
        self.metrics.set_rooms(self.rooms.len());

        if !closed.is_empty() {
            info!(
                target: "rendezvous.actor.registry",
                peers_closed = closed.len(),
                total_rooms = self.rooms.len(),
                "Disconnect cascade closed peers"
            );
        }

        closed
    }
}

fn outcome_for(member_count: usize) -> JoinOutcome {
    if member_count >= ROOM_CAPACITY {
        JoinOutcome::Paired
    } else {
        JoinOutcome::Alone
    }
}
