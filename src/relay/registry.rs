//! Room registry: membership and room lifecycle.
//!
//! Rooms are created lazily on first join and reaped by the periodic
//! sweep once they have been empty past the linger. A session occupies
//! at most one room at a time; joining a different room leaves the
//! previous one first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::current_timestamp;
use crate::relay::event::{RoomId, SessionId};

/// A live room: its member set and activity clock.
#[derive(Debug)]
pub struct Room {
    /// Room ID
    pub id: RoomId,
    /// Sessions currently in the room
    members: RwLock<HashSet<SessionId>>,
    /// Room creation timestamp (Unix ms)
    pub created_at: u64,
    /// Last join, leave or publish touching this room
    last_activity: RwLock<Instant>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashSet::new()),
            created_at: current_timestamp(),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Add a session to the room. Returns false if it was already in.
    pub async fn add_member(&self, session_id: &str) -> bool {
        let mut members = self.members.write().await;
        members.insert(session_id.to_string())
    }

    /// Remove a session from the room. Returns false if it was not in.
    pub async fn remove_member(&self, session_id: &str) -> bool {
        let mut members = self.members.write().await;
        members.remove(session_id)
    }

    pub async fn is_member(&self, session_id: &str) -> bool {
        let members = self.members.read().await;
        members.contains(session_id)
    }

    /// Snapshot of the current member session IDs.
    pub async fn member_ids(&self) -> Vec<SessionId> {
        let members = self.members.read().await;
        members.iter().cloned().collect()
    }

    pub async fn member_count(&self) -> usize {
        let members = self.members.read().await;
        members.len()
    }

    /// Refresh the activity clock.
    pub async fn touch(&self) {
        let mut last = self.last_activity.write().await;
        *last = Instant::now();
    }

    /// Time since the room last saw a join, leave or publish.
    pub async fn idle_for(&self) -> Duration {
        let last = self.last_activity.read().await;
        last.elapsed()
    }
}

/// Outcome of a join: the room handle plus what changed.
#[derive(Debug)]
pub struct JoinOutcome {
    /// The joined room.
    pub room: Arc<Room>,
    /// Room the session left to get here, if any.
    pub left: Option<RoomId>,
    /// True when the session was already in this room (no-op join).
    pub rejoined: bool,
}

/// Tracks every room and which room each session occupies.
pub struct RoomRegistry {
    /// All rooms indexed by room ID
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    /// Session to room mapping
    sessions: RwLock<HashMap<SessionId, RoomId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Put a session into a room, creating the room if needed.
    ///
    /// Rejoining the current room is a no-op. Joining a different room
    /// leaves the previous one first.
    pub async fn join(&self, session_id: &str, room_id: &str) -> JoinOutcome {
        if self.room_of(session_id).await.as_deref() == Some(room_id) {
            let room = self.get_or_create(room_id).await;
            room.touch().await;
            return JoinOutcome {
                room,
                left: None,
                rejoined: true,
            };
        }

        let left = self.leave(session_id).await;

        let room = self.get_or_create(room_id).await;
        room.add_member(session_id).await;
        room.touch().await;

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session_id.to_string(), room_id.to_string());
        }

        JoinOutcome {
            room,
            left,
            rejoined: false,
        }
    }

    /// Remove a session from its room. Returns the room it left, or
    /// None if it was not in one.
    pub async fn leave(&self, session_id: &str) -> Option<RoomId> {
        let room_id = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        }?;

        if let Some(room) = self.get_room(&room_id).await {
            room.remove_member(session_id).await;
            room.touch().await;
        }

        Some(room_id)
    }

    /// Member session IDs of a room. Empty for unknown rooms.
    pub async fn members_of(&self, room_id: &str) -> Vec<SessionId> {
        match self.get_room(room_id).await {
            Some(room) => room.member_ids().await,
            None => Vec::new(),
        }
    }

    /// Room a session currently occupies.
    pub async fn room_of(&self, session_id: &str) -> Option<RoomId> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    pub async fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    /// Fetch a room, creating it lazily.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.get_room(room_id).await {
            return room;
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }
        let room = Arc::new(Room::new(room_id));
        // Fresh activity clock under the map lock, so a concurrent sweep
        // cannot reap a room between creation and first member.
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        room
    }

    /// Refresh a room's activity clock if it exists.
    pub async fn touch_room(&self, room_id: &str) {
        if let Some(room) = self.get_room(room_id).await {
            room.touch().await;
        }
    }

    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Reap rooms that are empty and have been idle at least `linger`.
    /// Returns the reaped room IDs.
    pub async fn sweep_idle(&self, linger: Duration) -> Vec<RoomId> {
        let mut reaped = Vec::new();
        let mut rooms = self.rooms.write().await;
        let ids: Vec<RoomId> = rooms.keys().cloned().collect();

        for id in ids {
            if let Some(room) = rooms.get(&id) {
                if room.member_count().await == 0 && room.idle_for().await >= linger {
                    rooms.remove(&id);
                    reaped.push(id);
                }
            }
        }

        reaped
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_creates_room_lazily() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.room_count().await, 0);

        let outcome = registry.join("s1", "r1").await;
        assert!(!outcome.rejoined);
        assert!(outcome.left.is_none());
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.members_of("r1").await, vec!["s1".to_string()]);
        assert_eq!(registry.room_of("s1").await.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_rejoin_same_room_is_noop() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        let outcome = registry.join("s1", "r1").await;

        assert!(outcome.rejoined);
        assert!(outcome.left.is_none());
        assert_eq!(outcome.room.member_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_other_room_leaves_prior() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        let outcome = registry.join("s1", "r2").await;

        assert_eq!(outcome.left.as_deref(), Some("r1"));
        assert!(registry.members_of("r1").await.is_empty());
        assert_eq!(registry.members_of("r2").await, vec!["s1".to_string()]);
        assert_eq!(registry.room_of("s1").await.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let registry = RoomRegistry::new();
        assert!(registry.leave("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_leave_removes_membership() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        assert_eq!(registry.leave("s1").await.as_deref(), Some("r1"));

        assert!(registry.members_of("r1").await.is_empty());
        assert!(registry.room_of("s1").await.is_none());
        // Second leave is a no-op.
        assert!(registry.leave("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_members_of_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.members_of("nowhere").await.is_empty());
    }

    #[tokio::test]
    async fn test_memberships_are_room_scoped() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        registry.join("s2", "r2").await;

        assert_eq!(registry.members_of("r1").await, vec!["s1".to_string()]);
        assert_eq!(registry.members_of("r2").await, vec!["s2".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_reaps_empty_idle_rooms() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        registry.leave("s1").await;

        let reaped = registry.sweep_idle(Duration::ZERO).await;
        assert_eq!(reaped, vec!["r1".to_string()]);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_occupied_rooms() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        let reaped = registry.sweep_idle(Duration::ZERO).await;

        assert!(reaped.is_empty());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_linger() {
        let registry = RoomRegistry::new();

        registry.join("s1", "r1").await;
        registry.leave("s1").await;

        // Empty, but not idle long enough.
        let reaped = registry.sweep_idle(Duration::from_secs(60)).await;
        assert!(reaped.is_empty());
        assert_eq!(registry.room_count().await, 1);
    }
}
