//! Core relay semantics: rooms, sessions, admission and fan-out.
//!
//! Everything in this module is transport-agnostic. The QUIC server in
//! [`crate::server`] feeds it decoded commands; tests drive it directly
//! with in-process session handles.

pub mod dedup;
pub mod dispatcher;
pub mod event;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use dedup::{Admission, DedupConfig, DedupGuard, ResultCheck};
pub use dispatcher::{JoinSummary, RelayDispatcher};
pub use event::{Event, EventBody, EventId, RoomId, SessionId};
pub use registry::{JoinOutcome, Room, RoomRegistry};
pub use session::{SessionCommand, SessionHandle};
pub use store::{EventStore, MemoryStore};
