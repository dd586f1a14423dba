//! Session handles: the delivery side of a connection.
//!
//! The dispatcher never writes to the network itself. Each connection
//! registers a [`SessionHandle`] whose queue is drained by that
//! connection's writer task; fan-out is a best-effort channel send. A
//! failed send means the peer is gone, and the first party to notice
//! wins the close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::current_timestamp;
use crate::relay::event::{Event, RoomId, SessionId};

/// Commands pushed to a session's writer task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Deliver one relayed event.
    Deliver(Event),
    /// Replay recent room history after a join.
    History { room_id: RoomId, events: Vec<Event> },
    /// Tear the connection down.
    Close { reason: String },
}

/// Handle to a live session, cloneable across room tasks.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session ID
    pub id: SessionId,
    /// Declared identity
    pub identity: String,
    /// Connection timestamp (Unix ms)
    pub connected_at: u64,
    outbound: mpsc::UnboundedSender<SessionCommand>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new(
        id: impl Into<String>,
        identity: impl Into<String>,
        outbound: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            connected_at: current_timestamp(),
            outbound,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Best-effort send. Returns false when the session is closed or its
    /// writer is gone; the caller treats that as a disconnect.
    pub fn send(&self, command: SessionCommand) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.send(command).is_ok()
    }

    /// Flip the close latch. Only the first caller gets true, so the
    /// leave-on-disconnect path runs exactly once even when the writer
    /// failure and the connection teardown race each other.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
