//! Binary framing for relay streams.
//!
//! Every frame is `[type: u8][length: u32 BE][payload: length bytes]`.
//! The payload is a JSON document described in [`super::messages`].

use bytes::{Buf, BufMut, BytesMut};
use std::io;

/// Header size: 1 byte type + 4 bytes payload length.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Hard cap on payload size. Anything larger is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame type identifiers, grouped by range.
///
/// * `0x00..=0x0F` control (handshake, keepalive, shutdown)
/// * `0x10..=0x1F` session commands and their acks
/// * `0x20..=0x2F` pipeline producer results
/// * `0x30..=0x3F` server-to-session deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    // Control
    Hello = 0x00,
    HelloAck = 0x01,
    Auth = 0x02,
    AuthOk = 0x03,
    AuthFailed = 0x04,
    Ping = 0x05,
    Pong = 0x06,
    Goodbye = 0x07,

    // Session commands
    JoinRoom = 0x10,
    JoinOk = 0x11,
    LeaveRoom = 0x12,
    LeaveOk = 0x13,
    PublishChat = 0x14,
    TriggerTranslation = 0x15,

    // Pipeline producer results
    TranslationResult = 0x20,
    VideoReady = 0x21,

    // Deliveries
    EventDeliver = 0x30,
    RoomHistory = 0x31,

    // Error
    Error = 0xFF,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(FrameType::Hello),
            0x01 => Some(FrameType::HelloAck),
            0x02 => Some(FrameType::Auth),
            0x03 => Some(FrameType::AuthOk),
            0x04 => Some(FrameType::AuthFailed),
            0x05 => Some(FrameType::Ping),
            0x06 => Some(FrameType::Pong),
            0x07 => Some(FrameType::Goodbye),
            0x10 => Some(FrameType::JoinRoom),
            0x11 => Some(FrameType::JoinOk),
            0x12 => Some(FrameType::LeaveRoom),
            0x13 => Some(FrameType::LeaveOk),
            0x14 => Some(FrameType::PublishChat),
            0x15 => Some(FrameType::TriggerTranslation),
            0x20 => Some(FrameType::TranslationResult),
            0x21 => Some(FrameType::VideoReady),
            0x30 => Some(FrameType::EventDeliver),
            0x31 => Some(FrameType::RoomHistory),
            0xFF => Some(FrameType::Error),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Handshake, keepalive and shutdown frames.
    pub fn is_control(self) -> bool {
        (self.as_u8() & 0xF0) == 0x00
    }

    /// Commands a session issues after authentication, plus their acks.
    pub fn is_command(self) -> bool {
        (self.as_u8() & 0xF0) == 0x10
    }

    /// Results produced by the translation pipeline.
    pub fn is_pipeline_result(self) -> bool {
        (self.as_u8() & 0xF0) == 0x20
    }

    /// Frames the server pushes down a session's event stream.
    pub fn is_delivery(self) -> bool {
        (self.as_u8() & 0xF0) == 0x30
    }
}

/// A single wire frame: type tag plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Serialize the frame with its header into a fresh buffer.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        if self.payload.len() > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame payload too large: {} > {}",
                    self.payload.len(),
                    MAX_FRAME_SIZE
                ),
            ));
        }

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.frame_type.as_u8());
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Try to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame; the buffer is only consumed on a full decode.
    pub fn decode(buf: &mut BytesMut) -> io::Result<Option<Self>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let frame_type_byte = buf[0];
        let payload_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

        let frame_type = FrameType::from_u8(frame_type_byte).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame type: {frame_type_byte:#04x}"),
            )
        })?;

        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame payload too large: {payload_len} > {MAX_FRAME_SIZE}"),
            ));
        }

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).to_vec();

        Ok(Some(Frame::new(frame_type, payload)))
    }
}

/// Incremental decoder for a byte stream carrying frames back to back.
///
/// Feed raw reads with [`FrameCodec::feed`], then drain complete frames
/// with [`FrameCodec::decode_next`] until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn decode_next(&mut self) -> io::Result<Option<Frame>> {
        Frame::decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded into a frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}
