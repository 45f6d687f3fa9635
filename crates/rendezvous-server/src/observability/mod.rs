//! Observability for the rendezvous server.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rendezvous_connections_active` | Gauge | none | Open signaling connections |
//! | `rendezvous_rooms_active` | Gauge | none | Rooms with at least one member |
//! | `rendezvous_actor_mailbox_depth` | Gauge | `actor_type` | Queued requests and deliveries |
//! | `rendezvous_rooms_created_total` | Counter | none | `server-init` calls |
//! | `rendezvous_pairings_total` | Counter | none | Rooms that reached two members |
//! | `rendezvous_relays_total` | Counter | `event` | Payloads relayed to a room |
//! | `rendezvous_signaling_errors_total` | Counter | `category` | `custom-error` events sent |
//! | `rendezvous_session_timeouts_total` | Counter | none | Deadline expiries |
//! | `rendezvous_forced_closes_total` | Counter | none | Peers closed by the disconnect cascade |
//! | `rendezvous_session_duration_seconds` | Histogram | `reason` | Connect-to-close time |
//!
//! No metric carries room ids, connection ids or payloads.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
