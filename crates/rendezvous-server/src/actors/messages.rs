//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::SignalingError;
use crate::protocol::{ClientFrame, OutboundEvent};
use crate::types::{ConnectionId, RoomId};

use std::collections::HashSet;
use tokio::sync::oneshot;

use super::session::SessionSnapshot;

/// Messages sent to `PairingRegistryActor`.
///
/// Each message is handled to completion before the next one is dequeued,
/// so every operation below is atomic with respect to all others.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Allocate a fresh room id and insert an empty room.
    CreateRoom {
        respond_to: oneshot::Sender<RoomId>,
    },

    /// Leave all rooms, create a room and join it as its first member.
    HostRoom {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<RoomId>,
    },

    /// Add a connection to an existing room.
    TryJoin {
        room_id: RoomId,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<JoinOutcome, JoinError>>,
    },

    /// Remove a connection from every room it belongs to.
    LeaveAll {
        connection_id: ConnectionId,
        /// Rooms that were vacated.
        respond_to: oneshot::Sender<Vec<RoomId>>,
    },

    /// Read-only membership view of a room.
    Snapshot {
        room_id: RoomId,
        respond_to: oneshot::Sender<HashSet<ConnectionId>>,
    },

    /// Deliver an event to every current member of a room.
    Broadcast {
        room_id: RoomId,
        event: OutboundEvent,
        /// Number of members the event was delivered to.
        respond_to: oneshot::Sender<usize>,
    },

    /// Check the relay precondition for `connection_id` and broadcast to its room.
    Relay {
        connection_id: ConnectionId,
        event: OutboundEvent,
        respond_to: oneshot::Sender<Result<RoomId, RelayError>>,
    },

    /// Disconnect cascade: remove the connection, close its peers, delete its rooms.
    Evict {
        connection_id: ConnectionId,
        /// Peers that were force-closed.
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },

    /// Get current registry counts (for metrics and tests).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// A decoded frame from the peer.
    Inbound { frame: ClientFrame },

    /// The peer sent a frame that could not be decoded.
    Malformed,

    /// The transport reported that the peer went away.
    Disconnect { reason: Option<String> },

    /// Get current session state (for debugging/tests).
    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// An event the registry addressed to a connection.
///
/// Travels on the connection's delivery lane, separate from
/// `ConnectionMessage`, and names the room it was broadcast to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub room_id: RoomId,
    pub event: OutboundEvent,
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Room size after a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The joiner is the only member.
    Alone,
    /// The room now holds both parties.
    Paired,
}

impl JoinOutcome {
    #[must_use]
    pub const fn member_count(&self) -> usize {
        match self {
            JoinOutcome::Alone => 1,
            JoinOutcome::Paired => 2,
        }
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    RoomNotFound,
    RoomFull,
}

impl From<JoinError> for SignalingError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::RoomNotFound => SignalingError::RoomNotFound,
            JoinError::RoomFull => SignalingError::RoomFull,
        }
    }
}

/// Why a relay was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// The sender is not a member of exactly one room.
    NotInRoom,
    /// The sender's room does not hold exactly two members.
    RoomNotPaired,
}

impl RelayError {
    /// Map into the client-visible error for the event that was relayed.
    #[must_use]
    pub fn into_signaling(self, event: &'static str) -> SignalingError {
        match self {
            RelayError::NotInRoom => SignalingError::UnexpectedEvent { event },
            RelayError::RoomNotPaired => SignalingError::RoomNotPaired,
        }
    }
}

/// Registry counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStatus {
    pub rooms: usize,
    pub members: usize,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the socket (with its close reason, if any).
    ClientDisconnect(Option<String>),
    /// The negotiation deadline passed.
    IdleTimeout,
    /// The other member of the room disconnected.
    PeerLeft,
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Bounded label for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientDisconnect(_) => "client_disconnect",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::PeerLeft => "peer_left",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }
}
