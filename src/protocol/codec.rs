//! Codec glue between typed messages and binary frames.
//!
//! Payloads are JSON today; the traits keep the wire format swappable
//! without touching the call sites.

use super::frame::{Frame, FrameType};
use super::messages::*;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded into frames.
pub trait Encodable {
    /// Frame type tag for this message.
    fn frame_type(&self) -> FrameType;

    /// Serialize the message payload.
    fn encode_payload(&self) -> io::Result<Vec<u8>>;

    /// Build the complete frame.
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames.
pub trait Decodable: Sized {
    /// Frame type tag this message is carried under.
    fn expected_frame_type() -> FrameType;

    /// Deserialize the message from a payload.
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type first.
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Implement Encodable and Decodable for a message type.
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Vec<u8>> {
                serde_json::to_vec(self).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Hello, FrameType::Hello);
impl_codec!(HelloAck, FrameType::HelloAck);
impl_codec!(Auth, FrameType::Auth);
impl_codec!(AuthOk, FrameType::AuthOk);
impl_codec!(AuthFailed, FrameType::AuthFailed);
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);
impl_codec!(Goodbye, FrameType::Goodbye);

// Session commands and acks
impl_codec!(JoinRoom, FrameType::JoinRoom);
impl_codec!(JoinOk, FrameType::JoinOk);
impl_codec!(LeaveRoom, FrameType::LeaveRoom);
impl_codec!(LeaveOk, FrameType::LeaveOk);
impl_codec!(PublishChat, FrameType::PublishChat);
impl_codec!(TriggerTranslation, FrameType::TriggerTranslation);

// Pipeline producer results
impl_codec!(TranslationResult, FrameType::TranslationResult);
impl_codec!(VideoReady, FrameType::VideoReady);

// Deliveries
impl_codec!(EventDeliver, FrameType::EventDeliver);
impl_codec!(RoomHistory, FrameType::RoomHistory);

// Error message
impl_codec!(Error, FrameType::Error);

/// Encode a message straight to wire bytes (convenience function).
pub fn encode<T: Encodable>(msg: &T) -> io::Result<Vec<u8>> {
    msg.encode_frame()?.encode()
}

/// Decode a frame to a specific message type (convenience function).
pub fn decode<T: Decodable>(frame: &Frame) -> io::Result<T> {
    T::decode_frame(frame)
}
