//! Server-side components
//!
//! This module contains the QUIC endpoint, the per-connection session
//! handling, and the relay wiring between them.

pub mod connection;
pub mod relay_server;

pub use connection::SessionConnection;
pub use relay_server::{RelayServer, RelayStats};
