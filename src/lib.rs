//! QUIC-based room event relay with idempotent delivery
//!
//! This library provides a room-scoped publish/subscribe relay: sessions join
//! rooms, producers (human senders or an asynchronous processing pipeline)
//! publish events, and the relay deduplicates and fans each event out to every
//! member of the target room. Delivery is at-most-once per event within a
//! retention window, with per-room FIFO ordering.

pub mod client;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

pub use client::{ClientEvent, RelayClient, RelayClientConfig};
pub use error::{RelayError, Result};
pub use relay::dedup::DedupConfig;
pub use relay::dispatcher::RelayDispatcher;
pub use relay::event::{Event, EventBody, RoomId};
pub use relay::registry::RoomRegistry;
pub use relay::store::{EventStore, MemoryStore};
pub use server::RelayServer;

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique event ID
pub fn generate_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique session ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Relay server configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout in seconds
    pub idle_timeout_secs: u64,
    /// Maximum frame payload size in bytes
    pub max_frame_size: usize,
    /// Number of stored events replayed to a session on join
    pub history_limit: usize,
    /// How long an empty room lingers before the sweeper destroys it, in
    /// seconds. Lingering keeps dedup state alive across membership churn.
    pub room_linger_secs: u64,
    /// Dedup guard tuning
    pub dedup: DedupConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 1000,
            idle_timeout_secs: 300,
            max_frame_size: 1024 * 1024, // 1MB
            history_limit: 50,
            room_linger_secs: 60,
            dedup: DedupConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Set the bind address
    pub fn with_bind_addr(mut self, addr: std::net::SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the history replay limit
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the empty-room linger period in seconds
    pub fn with_room_linger_secs(mut self, secs: u64) -> Self {
        self.room_linger_secs = secs;
        self
    }

    /// Set the dedup guard configuration
    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }
}
