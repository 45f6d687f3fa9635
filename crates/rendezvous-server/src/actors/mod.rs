//! Actor model implementation for the rendezvous server.
//!
//! ```text
//! PairingRegistryActor (singleton)
//! └── owns room id -> members, delivers through the ConnectionDirectory
//!
//! ConnectionActor (one per WebSocket connection)
//! ├── owns ConnectionSession (state, room, deadline)
//! └── calls the registry for every room mutation
//! ```
//!
//! # Key Design Decisions
//!
//! - **Registry mailbox is the lock**: every room operation is one message, so
//!   join/leave/relay checks never interleave
//! - **No registry-to-connection awaits**: deliveries go onto an unbounded
//!   per-connection lane tagged with their room, so the registry never waits
//!   on a connection and a slow reader never loses a relay
//! - **CancellationToken propagation**: connection tokens are children of the
//!   server shutdown token
//! - **Mailbox monitoring**: senders record enqueues and actors record
//!   dequeues; depth thresholds Registry: 100/500, Connection: 16/48
//!
//! # Modules
//!
//! - [`registry`] - `PairingRegistryActor` singleton that owns rooms
//! - [`connection`] - `ConnectionActor` per WebSocket connection
//! - [`session`] - `ConnectionSession` pairing state machine
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, ConnectionContext};
pub use messages::*;
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use registry::{PairingRegistryActor, PairingRegistryHandle};
pub use session::{ConnectionSession, SessionSnapshot, SessionState};
