//! Relay event model.
//!
//! An [`Event`] is the unit of fan-out: every chat message, translation
//! sentence and rendered video notification becomes one event scoped to
//! a single room. Events carry a content fingerprint used by the dedup
//! guard, so republishing the same content yields at most one delivery
//! within the retention window.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::generate_event_id;

/// Opaque room identifier.
pub type RoomId = String;
/// Opaque session identifier.
pub type SessionId = String;
/// Opaque event identifier.
pub type EventId = String;

/// Payload variants an event can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    /// A plain chat message typed by a participant.
    ChatMessage { text: String },
    /// A translated sentence produced by the pipeline.
    TranslationResult { sentence: String },
    /// A rendered sign-language video ready for playback.
    VideoReady { url: String },
}

/// A single relayed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID, assigned at construction.
    pub id: EventId,
    /// Room this event belongs to.
    pub room_id: RoomId,
    /// Identity of the producer (participant name or pipeline name).
    pub sender: String,
    /// Payload.
    pub body: EventBody,
    /// Origin timestamp in Unix ms, as reported by the producer.
    pub origin_ts: u64,
}

impl Event {
    pub fn new(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        body: EventBody,
        origin_ts: u64,
    ) -> Self {
        Self {
            id: generate_event_id(),
            room_id: room_id.into(),
            sender: sender.into(),
            body,
            origin_ts,
        }
    }

    /// Chat message event.
    pub fn chat(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
        origin_ts: u64,
    ) -> Self {
        Self::new(
            room_id,
            sender,
            EventBody::ChatMessage { text: text.into() },
            origin_ts,
        )
    }

    /// Translation result event.
    pub fn translation(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        sentence: impl Into<String>,
        origin_ts: u64,
    ) -> Self {
        Self::new(
            room_id,
            sender,
            EventBody::TranslationResult {
                sentence: sentence.into(),
            },
            origin_ts,
        )
    }

    /// Video ready event.
    pub fn video(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        url: impl Into<String>,
        origin_ts: u64,
    ) -> Self {
        Self::new(
            room_id,
            sender,
            EventBody::VideoReady { url: url.into() },
            origin_ts,
        )
    }

    /// Content fingerprint for dedup admission.
    ///
    /// The fingerprint is derived from the payload, not the event ID, so
    /// a republished payload maps to the same fingerprint:
    ///
    /// * chat messages hash sender, text and origin timestamp
    /// * translation results hash the sentence alone
    /// * video notifications hash the playback URL alone
    ///
    /// The guard is per room, so identical content in different rooms
    /// never collides.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match &self.body {
            EventBody::ChatMessage { text } => {
                0u8.hash(&mut hasher);
                self.sender.hash(&mut hasher);
                text.hash(&mut hasher);
                self.origin_ts.hash(&mut hasher);
            }
            EventBody::TranslationResult { sentence } => {
                1u8.hash(&mut hasher);
                sentence.hash(&mut hasher);
            }
            EventBody::VideoReady { url } => {
                2u8.hash(&mut hasher);
                url.hash(&mut hasher);
            }
        }
        hasher.finish()
    }

    /// Whether this event rides the result channel and is subject to the
    /// per-room watermark. Both pipeline outputs count; chat does not.
    pub fn is_result(&self) -> bool {
        matches!(
            self.body,
            EventBody::TranslationResult { .. } | EventBody::VideoReady { .. }
        )
    }

    /// Short payload kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::ChatMessage { .. } => "chat_message",
            EventBody::TranslationResult { .. } => "translation_result",
            EventBody::VideoReady { .. } => "video_ready",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_fingerprint_covers_content() {
        let a = Event::chat("r1", "alice", "hi", 100);
        let b = Event::chat("r1", "alice", "hi", 100);

        // Distinct events, identical content.
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());

        assert_ne!(
            a.fingerprint(),
            Event::chat("r1", "alice", "hi!", 100).fingerprint()
        );
        assert_ne!(
            a.fingerprint(),
            Event::chat("r1", "bob", "hi", 100).fingerprint()
        );
        assert_ne!(
            a.fingerprint(),
            Event::chat("r1", "alice", "hi", 101).fingerprint()
        );
    }

    #[test]
    fn test_translation_fingerprint_is_sentence_only() {
        let a = Event::translation("r1", "pipeline", "good morning", 100);
        let b = Event::translation("r1", "pipeline", "good morning", 9999);

        // Same sentence from a later cycle still maps to the same fingerprint.
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            a.fingerprint(),
            Event::translation("r1", "pipeline", "good evening", 100).fingerprint()
        );
    }

    #[test]
    fn test_video_fingerprint_is_url_only() {
        let a = Event::video("r1", "pipeline", "https://cdn/v/1.mp4", 100);
        let b = Event::video("r1", "renderer", "https://cdn/v/1.mp4", 200);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(
            a.fingerprint(),
            Event::video("r1", "pipeline", "https://cdn/v/2.mp4", 100).fingerprint()
        );
    }

    #[test]
    fn test_body_kinds_do_not_collide() {
        // Same string content under different payload kinds must not
        // share a fingerprint.
        let chat = Event::chat("r1", "x", "same", 0);
        let translation = Event::translation("r1", "x", "same", 0);
        let video = Event::video("r1", "x", "same", 0);

        assert_ne!(chat.fingerprint(), translation.fingerprint());
        assert_ne!(translation.fingerprint(), video.fingerprint());
    }

    #[test]
    fn test_is_result() {
        assert!(!Event::chat("r1", "alice", "hi", 1).is_result());
        assert!(Event::translation("r1", "pipeline", "hi", 1).is_result());
        assert!(Event::video("r1", "pipeline", "u", 1).is_result());
    }

    #[test]
    fn test_serde_tags_body_kind() {
        let event = Event::chat("r1", "alice", "hi", 100);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"chat_message\""));

        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
