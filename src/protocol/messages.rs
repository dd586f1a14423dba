//! Wire message payloads for the relay protocol.
//!
//! Every frame payload is one of these types serialized as JSON. Frame
//! type tags are assigned in [`super::frame::FrameType`]; the codec glue
//! lives in [`super::codec`].

use crate::relay::event::Event;
use serde::{Deserialize, Serialize};

// =============================================================================
// Control Messages (0x00 - 0x0F)
// =============================================================================

/// Initial handshake from a connecting peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version
    pub version: u32,
    /// Peer capabilities
    pub capabilities: Vec<String>,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            version: 1,
            capabilities: vec!["chat".to_string(), "translation".to_string()],
        }
    }
}

/// Server response to Hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAck {
    /// Server protocol version
    pub version: u32,
    /// Session ID assigned to this connection
    pub session_id: String,
}

/// Identity declaration for the session.
///
/// Identity is accepted as declared; there is no credential check here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    /// Display identity for this session (chat sender name or pipeline name)
    pub identity: String,
}

/// Successful identity registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    /// Echo of the registered identity
    pub identity: String,
    /// Server clock in Unix ms, for peers that compare event timestamps
    pub server_ts: u64,
}

/// Identity registration failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailed {
    /// Error code
    pub code: u32,
    /// Human-readable error message
    pub message: String,
}

/// Ping message for keepalive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

/// Graceful disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect
    pub reason: String,
}

// =============================================================================
// Session Commands (0x10 - 0x1F) - Client -> Server, with acks
// =============================================================================

/// Join a room, creating it if it does not exist yet.
///
/// A session occupies at most one room; joining a different room leaves
/// the previous one first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Room ID to join
    pub room_id: String,
}

/// Acknowledgment of a join, with the current membership snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOk {
    /// Room ID that was joined
    pub room_id: String,
    /// Sessions currently in the room, including the joiner
    pub members: Vec<PeerInfo>,
}

/// Leave the current room. No-op if the session is not in one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRoom {}

/// Acknowledgment of a leave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveOk {
    /// Room ID that was left, or None if the session was not in a room
    pub room_id: Option<String>,
}

/// Publish a chat message to the session's current room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishChat {
    /// Message text
    pub text: String,
    /// Client-side origin timestamp in Unix ms
    pub client_ts: u64,
}

/// Start a translation cycle for the session's current room.
///
/// Resets the room's result watermark so the next batch of translation
/// results is accepted fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerTranslation {}

/// A session visible to other members of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Session ID
    pub session_id: String,
    /// Declared identity
    pub identity: String,
}

// =============================================================================
// Pipeline Producer Results (0x20 - 0x2F) - Producer -> Server
// =============================================================================

/// A translated sentence produced by the pipeline.
///
/// Producers name the room explicitly; they are not room members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    /// Room the translation belongs to
    pub room_id: String,
    /// Translated sentence
    pub sentence: String,
    /// Pipeline completion timestamp in Unix ms
    pub completed_at: u64,
}

/// A rendered sign-language video ready for playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoReady {
    /// Room the video belongs to
    pub room_id: String,
    /// Playback URL of the rendered video
    pub url: String,
    /// Recording completion timestamp in Unix ms
    pub recorded_at: u64,
}

// =============================================================================
// Deliveries (0x30 - 0x3F) - Server -> Client
// =============================================================================

/// A single relayed event, pushed down the session's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDeliver {
    /// The relayed event
    pub event: Event,
}

/// Recent room history, sent once after a successful join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHistory {
    /// Room ID
    pub room_id: String,
    /// Events oldest-first
    pub events: Vec<Event>,
}

// =============================================================================
// Error Message (0xFF)
// =============================================================================

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// Error code
    pub code: u32,
    /// Error message
    pub message: String,
    /// Related entity (room_id, frame type, etc.)
    pub context: Option<String>,
}

impl Error {
    // Common error codes
    pub const UNKNOWN: u32 = 1000;
    pub const INVALID_FRAME: u32 = 1001;
    pub const AUTH_REQUIRED: u32 = 1002;
    pub const AUTH_FAILED: u32 = 1003;
    pub const NOT_JOINED: u32 = 1004;
    pub const INVALID_PAYLOAD: u32 = 1005;
    pub const SERVER_ERROR: u32 = 1006;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, message)
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_FRAME, message)
    }

    pub fn auth_required() -> Self {
        Self::new(Self::AUTH_REQUIRED, "Authentication required")
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(Self::AUTH_FAILED, message)
    }

    pub fn not_joined() -> Self {
        Self::new(Self::NOT_JOINED, "Session has not joined a room")
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PAYLOAD, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(Self::SERVER_ERROR, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_default() {
        let hello = Hello::default();
        assert_eq!(hello.version, 1);
        assert!(hello.capabilities.contains(&"chat".to_string()));
    }

    #[test]
    fn test_serialize_publish_chat() {
        let msg = PublishChat {
            text: "Hello, World!".to_string(),
            client_ts: 1234567890,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: PublishChat = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.text, decoded.text);
        assert_eq!(msg.client_ts, decoded.client_ts);
    }

    #[test]
    fn test_serialize_translation_result() {
        let msg = TranslationResult {
            room_id: "r1".to_string(),
            sentence: "good morning".to_string(),
            completed_at: 1700000000123,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: TranslationResult = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.room_id, decoded.room_id);
        assert_eq!(msg.sentence, decoded.sentence);
    }

    #[test]
    fn test_empty_command_payloads() {
        // LeaveRoom and TriggerTranslation carry no fields; they must still
        // round-trip as JSON objects.
        let json = serde_json::to_string(&LeaveRoom {}).unwrap();
        let _: LeaveRoom = serde_json::from_str(&json).unwrap();

        let json = serde_json::to_string(&TriggerTranslation {}).unwrap();
        let _: TriggerTranslation = serde_json::from_str(&json).unwrap();
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::auth_failed("identity rejected");
        assert_eq!(err.code, Error::AUTH_FAILED);

        let err = Error::not_joined().with_context("room_id=r1");
        assert_eq!(err.code, Error::NOT_JOINED);
        assert_eq!(err.context, Some("room_id=r1".to_string()));
    }
}
