//! Rendezvous Server Library
//!
//! A two-party WebRTC signaling rendezvous service. Two peers that have never
//! talked before meet in a room identified by an unguessable id and exchange
//! their session descriptions and ICE candidates through the service:
//!
//! ```text
//! peer A                         service                          peer B
//!   │ server-init ───────────────► create room R, A joins
//!   │ ◄────────────── ack [R]
//!   │                               (R shared out of band)
//!   │                              B joins R ◄──────── client-init [R, offer]
//!   │ ◄──── client-init [offer] ──────────────── client-init [offer] ──► │
//!   │ server-answer [answer] ─────────────────── server-answer [answer] ►│
//!   │ ◄──── ice-candidate [c] ◄─────────────────── ice-candidate [c] ────│
//! ```
//!
//! Payloads are opaque strings copied verbatim. Rooms hold at most two
//! members, are deleted when empty, and both peers are disconnected as soon as
//! either leaves or the negotiation deadline passes.
//!
//! # Architecture
//!
//! - `PairingRegistryActor` (singleton): owns the room table
//! - `ConnectionActor` (per WebSocket): owns one session's state and deadline
//! - `ConnectionDirectory`: addressed delivery and forced close for the registry
//!
//! # Modules
//!
//! - [`actors`] - Registry and connection actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Client-visible and internal error types
//! - [`observability`] - Health checks and Prometheus metrics
//! - [`protocol`] - JSON event frames
//! - [`server`] - Axum router and WebSocket pump
//! - [`transport`] - Connection directory
//! - [`types`] - Room and connection identifiers

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod types;
