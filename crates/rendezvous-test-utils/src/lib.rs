//! # Rendezvous Test Utilities
//!
//! Shared test utilities for the rendezvous server.
//!
//! This crate provides:
//! - Server test harness (`TestRendezvousServer` for E2E tests)
//! - WebSocket client speaking the signaling frame format (`TestPeer`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rendezvous_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRendezvousServer::spawn().await?;
//!     let mut host = TestPeer::connect(&server.ws_url()).await?;
//!
//!     let room = host.server_init().await?;
//!     assert_eq!(room.len(), 32);
//!     Ok(())
//! }
//! ```

pub mod peer;
pub mod server_harness;

// Re-export commonly used items
pub use peer::*;
pub use server_harness::*;
