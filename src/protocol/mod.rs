//! Wire protocol for the relay.
//!
//! Defines the binary framing, the JSON message payloads, and the codec
//! glue between them.

pub mod codec;
pub mod frame;
pub mod messages;

// Re-export commonly used types
pub use codec::{decode, encode, Decodable, Encodable};
pub use frame::{Frame, FrameCodec, FrameType, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use messages::*;
