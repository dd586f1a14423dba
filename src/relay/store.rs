//! Event persistence port.
//!
//! The dispatcher appends every admitted event through [`EventStore`]
//! and replays recent history on join. Writes are fire-and-forget from
//! the relay's point of view: a failing store never blocks fan-out.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::relay::event::{Event, RoomId};

/// Durable event sink plus history source.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an admitted event to the room's history.
    async fn append(&self, event: &Event) -> Result<()>;

    /// Most recent events for a room, oldest first, up to `limit`.
    /// Unknown rooms yield an empty history.
    async fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<Event>>;
}

/// In-memory store with a bounded per-room history.
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomId, Vec<Event>>>,
    max_per_room: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_per_room: 100,
        }
    }

    /// Cap the retained history per room.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.max_per_room = limit;
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, event: &Event) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let events = rooms.entry(event.room_id.clone()).or_default();
        events.push(event.clone());
        if events.len() > self.max_per_room {
            events.remove(0);
        }
        Ok(())
    }

    async fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<Event>> {
        let rooms = self.rooms.read().await;
        Ok(match rooms.get(room_id) {
            Some(events) => {
                let start = events.len().saturating_sub(limit);
                events[start..].to_vec()
            }
            None => Vec::new(),
        })
    }
}
