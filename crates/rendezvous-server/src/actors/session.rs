//! Per-connection pairing state.
//!
//! ```text
//!            server-init             client-init delivered / relay ok
//!   Idle ─────────────────► Alone ─────────────────────────────────► Paired
//!    │  ▲                     │                                         │
//!    │  └── client-init fails ┴─────────────────────────────────────────┤
//!    │        client-init ok                                            │
//!    └─────────────────────────────────────────────────────────► Paired │
//!                                                                       ▼
//!                     disconnect / timeout / peer left (any state) ► Closed
//! ```
//!
//! `ConnectionSession` holds no channels or timers; the owning
//! `ConnectionActor` performs the registry calls and then records the result
//! here.

use crate::types::{ConnectionId, RoomId};

use std::time::Duration;
use tokio::time::Instant;

/// Deadline offset used when `connected_at + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not in any room.
    Idle,
    /// Sole member of a room it created.
    Alone,
    /// Member of a two-party room.
    Paired,
    /// Terminal.
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Alone => "alone",
            SessionState::Paired => "paired",
            SessionState::Closed => "closed",
        }
    }
}

/// Point-in-time view of a session (for debugging/tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection_id: ConnectionId,
    pub state: SessionState,
    pub room: Option<RoomId>,
}

#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    state: SessionState,
    room: Option<RoomId>,
    connected_at: Instant,
    deadline: Instant,
}

impl ConnectionSession {
    /// New `Idle` session whose deadline is `timeout` from now.
    #[must_use]
    pub fn new(id: ConnectionId, timeout: Duration) -> Self {
        let connected_at = Instant::now();
        Self {
            id,
            state: SessionState::Idle,
            room: None,
            connected_at,
            deadline: connected_at
                .checked_add(timeout)
                .or_else(|| connected_at.checked_add(FAR_FUTURE))
                .unwrap_or(connected_at),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Time since the connection was accepted.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Created and joined `room`.
    pub fn hosted(&mut self, room: RoomId) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Alone;
        self.room = Some(room);
    }

    /// Joined `room` as its second member.
    pub fn joined(&mut self, room: RoomId) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Paired;
        self.room = Some(room);
    }

    /// Left every room (failed join).
    pub fn left(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Idle;
        self.room = None;
    }

    /// `room` gained its second member. Returns true if the state changed.
    ///
    /// Ignored unless `room` is the room this session is in now.
    pub fn peer_joined(&mut self, room: &RoomId) -> bool {
        if self.state == SessionState::Alone && self.room.as_ref() == Some(room) {
            self.state = SessionState::Paired;
            true
        } else {
            false
        }
    }

    /// Mark terminal. Returns false if the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SessionState::Closed;
        self.room = None;
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_id: self.id.clone(),
            state: self.state,
            room: self.room.clone(),
        }
    }
}
