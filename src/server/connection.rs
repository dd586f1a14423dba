//! Per-connection session handling.
//!
//! Each client connection runs one [`SessionConnection`]: it owns the
//! control stream dialogue (handshake, room commands, pipeline results)
//! and, once the session is authenticated, a writer task that drains the
//! session's delivery queue onto a server-opened uni stream. The relay
//! itself never touches the network; everything it wants to say to this
//! peer arrives here as a [`SessionCommand`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quinn::{Connection, RecvStream, SendStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::error::{RelayError, Result};
use crate::protocol::codec::{self, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::{
    Auth, AuthFailed, AuthOk, Error as ErrorMessage, EventDeliver, Goodbye, Hello, HelloAck,
    JoinOk, JoinRoom, LeaveOk, LeaveRoom, PeerInfo, Ping, Pong, PublishChat, RoomHistory,
    TriggerTranslation,
};
use crate::relay::dispatcher::{JoinSummary, RelayDispatcher};
use crate::relay::event::Event;
use crate::relay::pipeline;
use crate::relay::session::{SessionCommand, SessionHandle};

/// Protocol version spoken by this server.
const PROTOCOL_VERSION: u32 = 1;

/// Longest accepted identity, in bytes.
const MAX_IDENTITY_LEN: usize = 64;

/// Interval between server pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Handshake progress for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for the client's Hello
    AwaitingHello,
    /// Hello acknowledged, waiting for Auth
    AwaitingAuth,
    /// Fully authenticated
    Authenticated,
}

/// Server-side handler for one client connection.
pub struct SessionConnection {
    /// The QUIC connection
    connection: Connection,
    /// Relay dispatcher shared across all connections
    dispatcher: RelayDispatcher,
    /// Session ID assigned at accept time
    session_id: String,
    /// Declared identity, set once Auth succeeds
    identity: RwLock<Option<String>>,
    /// Handshake state
    handshake_state: RwLock<HandshakeState>,
    /// Control stream for protocol replies
    control_send: RwLock<Option<SendStream>>,
    /// Queue feeding the outbound event stream
    outbound_tx: mpsc::UnboundedSender<SessionCommand>,
    /// Receiver side, taken by the writer task when it starts
    outbound_rx: RwLock<Option<mpsc::UnboundedReceiver<SessionCommand>>>,
    /// When the last server ping went out, for RTT logging
    last_ping: RwLock<Option<Instant>>,
}

impl SessionConnection {
    pub fn new(connection: Connection, dispatcher: RelayDispatcher) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            connection,
            dispatcher,
            session_id: crate::generate_session_id(),
            identity: RwLock::new(None),
            handshake_state: RwLock::new(HandshakeState::AwaitingHello),
            control_send: RwLock::new(None),
            outbound_tx,
            outbound_rx: RwLock::new(Some(outbound_rx)),
            last_ping: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Drive the connection until it closes.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let remote_addr = self.connection.remote_address();
        info!(session_id = %self.session_id, peer = %remote_addr, "new connection");

        // The client opens the control stream as its first bi stream.
        let (control_send, control_recv) = self.connection.accept_bi().await?;
        *self.control_send.write().await = Some(control_send);
        debug!(session_id = %self.session_id, "control stream established");

        let control_task = {
            let handler = Arc::clone(&self);
            tokio::spawn(async move { handler.handle_control_stream(control_recv).await })
        };

        let ping_task = {
            let handler = Arc::clone(&self);
            tokio::spawn(async move { handler.ping_loop().await })
        };

        tokio::select! {
            result = control_task => {
                if let Ok(Err(e)) = result {
                    debug!(session_id = %self.session_id, error = %e, "control stream ended with error");
                }
            }
            _ = ping_task => {}
        }

        // First closer wins; the writer task hitting a dead stream takes
        // the same path.
        self.dispatcher.disconnect(&self.session_id).await;
        self.connection.close(0u32.into(), b"session closed");
        info!(session_id = %self.session_id, peer = %remote_addr, "connection closed");
        Ok(())
    }

    /// Read frames off the control stream and dispatch them.
    async fn handle_control_stream(&self, mut recv: RecvStream) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = vec![0u8; 4096];

        loop {
            match recv.read(&mut buf).await {
                Ok(Some(n)) => {
                    codec.feed(&buf[..n]);
                    while let Some(frame) = codec.decode_next()? {
                        if let Err(e) = self.handle_control_frame(frame).await {
                            warn!(
                                session_id = %self.session_id,
                                error = %e,
                                "error handling control frame"
                            );
                            self.send_error(&e).await?;
                        }
                    }
                }
                Ok(None) => {
                    debug!(session_id = %self.session_id, "control stream closed by peer");
                    break;
                }
                Err(e) => {
                    return Err(RelayError::network(format!(
                        "control stream read error: {}",
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Dispatch a single control frame against the handshake state.
    async fn handle_control_frame(&self, frame: Frame) -> Result<()> {
        let state = *self.handshake_state.read().await;

        match (state, frame.frame_type) {
            (HandshakeState::AwaitingHello, FrameType::Hello) => {
                let hello: Hello = codec::decode(&frame)?;
                if hello.version != PROTOCOL_VERSION {
                    return Err(RelayError::protocol(format!(
                        "unsupported protocol version {}",
                        hello.version
                    )));
                }

                *self.handshake_state.write().await = HandshakeState::AwaitingAuth;
                self.send_control_frame(&HelloAck {
                    version: PROTOCOL_VERSION,
                    session_id: self.session_id.clone(),
                })
                .await
            }

            (HandshakeState::AwaitingAuth, FrameType::Auth) => {
                let auth: Auth = codec::decode(&frame)?;
                self.handle_auth(auth).await
            }

            (HandshakeState::Authenticated, FrameType::JoinRoom) => {
                let join: JoinRoom = codec::decode(&frame)?;
                self.handle_join(join).await
            }

            (HandshakeState::Authenticated, FrameType::LeaveRoom) => {
                let _: LeaveRoom = codec::decode(&frame)?;
                let left = self.dispatcher.leave(&self.session_id).await;
                self.send_control_frame(&LeaveOk { room_id: left }).await
            }

            (HandshakeState::Authenticated, FrameType::PublishChat) => {
                let publish: PublishChat = codec::decode(&frame)?;
                self.handle_publish_chat(publish).await
            }

            (HandshakeState::Authenticated, FrameType::TriggerTranslation) => {
                let _: TriggerTranslation = codec::decode(&frame)?;
                match self.dispatcher.room_of(&self.session_id).await {
                    Some(room_id) => {
                        self.dispatcher.begin_cycle(&room_id).await;
                        Ok(())
                    }
                    None => self.send_control_frame(&ErrorMessage::not_joined()).await,
                }
            }

            (HandshakeState::Authenticated, FrameType::TranslationResult) => {
                // Malformed pipeline payloads are logged and dropped at
                // this boundary, never bounced back to the producer.
                let identity = self.authenticated_identity().await?;
                if let Ok(event) = pipeline::parse_translation(&frame.payload, &identity) {
                    self.dispatcher.publish(event).await;
                }
                Ok(())
            }

            (HandshakeState::Authenticated, FrameType::VideoReady) => {
                let identity = self.authenticated_identity().await?;
                if let Ok(event) = pipeline::parse_video(&frame.payload, &identity) {
                    self.dispatcher.publish(event).await;
                }
                Ok(())
            }

            (_, FrameType::Ping) => {
                let ping: Ping = codec::decode(&frame)?;
                self.send_control_frame(&Pong {
                    timestamp: ping.timestamp,
                })
                .await
            }

            (HandshakeState::Authenticated, FrameType::Pong) => {
                let _: Pong = codec::decode(&frame)?;
                if let Some(sent) = *self.last_ping.read().await {
                    debug!(
                        session_id = %self.session_id,
                        rtt_ms = sent.elapsed().as_millis() as u64,
                        "pong received"
                    );
                }
                Ok(())
            }

            (_, FrameType::Goodbye) => {
                let goodbye: Goodbye = codec::decode(&frame)?;
                info!(
                    session_id = %self.session_id,
                    reason = %goodbye.reason,
                    "goodbye received"
                );
                if state == HandshakeState::Authenticated {
                    // Through the queue, so buffered deliveries flush first.
                    let _ = self.outbound_tx.send(SessionCommand::Close {
                        reason: goodbye.reason,
                    });
                } else {
                    self.connection.close(0u32.into(), b"goodbye");
                }
                Ok(())
            }

            (HandshakeState::AwaitingHello | HandshakeState::AwaitingAuth, frame_type)
                if frame_type.is_command() || frame_type.is_pipeline_result() =>
            {
                self.send_control_frame(&ErrorMessage::auth_required())
                    .await
            }

            (state, frame_type) => {
                warn!(
                    session_id = %self.session_id,
                    state = ?state,
                    frame_type = ?frame_type,
                    "unexpected frame"
                );
                Err(RelayError::protocol(format!(
                    "unexpected {:?} frame in {:?} state",
                    frame_type, state
                )))
            }
        }
    }

    async fn handle_auth(&self, auth: Auth) -> Result<()> {
        let identity = auth.identity.trim().to_string();
        if !valid_identity(&identity) {
            self.send_control_frame(&AuthFailed {
                code: ErrorMessage::AUTH_FAILED,
                message: format!("identity must be 1-{} characters", MAX_IDENTITY_LEN),
            })
            .await?;
            return Ok(());
        }

        *self.identity.write().await = Some(identity.clone());

        // The writer task owns the event stream from here on.
        let rx = self.outbound_rx.write().await.take();
        if let Some(rx) = rx {
            let send = self.connection.open_uni().await?;
            tokio::spawn(run_session_writer(
                send,
                rx,
                self.dispatcher.clone(),
                self.session_id.clone(),
                self.connection.clone(),
            ));
        }

        let handle = SessionHandle::new(
            self.session_id.clone(),
            identity.clone(),
            self.outbound_tx.clone(),
        );
        self.dispatcher.register_session(handle).await;

        *self.handshake_state.write().await = HandshakeState::Authenticated;

        self.send_control_frame(&AuthOk {
            identity: identity.clone(),
            server_ts: current_timestamp(),
        })
        .await?;

        info!(session_id = %self.session_id, identity = %identity, "session authenticated");
        Ok(())
    }

    async fn handle_join(&self, join: JoinRoom) -> Result<()> {
        let room_id = join.room_id.trim().to_string();
        if room_id.is_empty() {
            return self
                .send_control_frame(&ErrorMessage::invalid_payload("room id must not be empty"))
                .await;
        }

        let summary =
            join_with_replay(&self.dispatcher, &self.outbound_tx, &self.session_id, &room_id)
                .await;
        let members = summary
            .members
            .into_iter()
            .map(|(session_id, identity)| PeerInfo {
                session_id,
                identity,
            })
            .collect();

        self.send_control_frame(&JoinOk {
            room_id: summary.room_id,
            members,
        })
        .await
    }

    async fn handle_publish_chat(&self, publish: PublishChat) -> Result<()> {
        let room_id = match self.dispatcher.room_of(&self.session_id).await {
            Some(room_id) => room_id,
            None => {
                return self.send_control_frame(&ErrorMessage::not_joined()).await;
            }
        };

        let text = publish.text.trim();
        if text.is_empty() {
            return self
                .send_control_frame(&ErrorMessage::invalid_payload("chat text must not be empty"))
                .await;
        }

        let identity = self.authenticated_identity().await?;
        let origin_ts = if publish.client_ts > 0 {
            publish.client_ts
        } else {
            current_timestamp()
        };

        self.dispatcher
            .publish(Event::chat(room_id, identity, text, origin_ts))
            .await;
        Ok(())
    }

    async fn authenticated_identity(&self) -> Result<String> {
        let identity = self.identity.read().await;
        identity
            .clone()
            .ok_or_else(|| RelayError::auth("session identity missing"))
    }

    /// Send a frame on the control stream.
    async fn send_control_frame<T: Encodable>(&self, message: &T) -> Result<()> {
        let data = codec::encode(message)?;
        let mut send_guard = self.control_send.write().await;
        match send_guard.as_mut() {
            Some(send) => {
                send.write_all(&data).await?;
                Ok(())
            }
            None => Err(RelayError::connection("control stream not established")),
        }
    }

    /// Report a frame-handling error to the peer.
    async fn send_error(&self, error: &RelayError) -> Result<()> {
        self.send_control_frame(&wire_error(error)).await
    }

    /// Periodic keepalive toward the client.
    async fn ping_loop(&self) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);

        loop {
            ticker.tick().await;

            let state = *self.handshake_state.read().await;
            if state != HandshakeState::Authenticated {
                continue;
            }

            *self.last_ping.write().await = Some(Instant::now());
            let ping = Ping {
                timestamp: current_timestamp(),
            };
            if self.send_control_frame(&ping).await.is_err() {
                debug!(session_id = %self.session_id, "ping failed, stopping keepalive");
                break;
            }
        }
    }
}

/// Map an internal error to its wire representation.
fn wire_error(error: &RelayError) -> ErrorMessage {
    let code = match error {
        RelayError::Auth(_) => ErrorMessage::AUTH_FAILED,
        RelayError::Serialization(_) | RelayError::Protocol(_) => ErrorMessage::INVALID_FRAME,
        RelayError::InvalidEvent(_) => ErrorMessage::INVALID_PAYLOAD,
        _ => ErrorMessage::SERVER_ERROR,
    };
    ErrorMessage::new(code, error.message())
}

fn valid_identity(identity: &str) -> bool {
    !identity.is_empty() && identity.len() <= MAX_IDENTITY_LEN
}

/// Queue the room's history replay, then register membership.
///
/// The snapshot is taken and queued before the session can appear in
/// fan-out, so on the event stream the replay precedes every live
/// delivery for the room.
async fn join_with_replay(
    dispatcher: &RelayDispatcher,
    outbound_tx: &mpsc::UnboundedSender<SessionCommand>,
    session_id: &str,
    room_id: &str,
) -> JoinSummary {
    let events = dispatcher.history(room_id).await;
    let _ = outbound_tx.send(SessionCommand::History {
        room_id: room_id.to_string(),
        events,
    });
    dispatcher.join(session_id, room_id).await
}

/// Ids carried by the most recent history replay.
///
/// A store append that completes between the history snapshot and the
/// membership registration can put the same event on both paths; the
/// writer consults this to drop the second copy.
#[derive(Debug, Default)]
struct ReplayFilter {
    replayed: HashSet<String>,
}

impl ReplayFilter {
    fn note_replay(&mut self, events: &[Event]) {
        self.replayed = events.iter().map(|e| e.id.clone()).collect();
    }

    /// True when the event was part of the last replay. Each id is
    /// suppressed at most once.
    fn suppress(&mut self, event: &Event) -> bool {
        self.replayed.remove(&event.id)
    }
}

/// Drain a session's delivery queue onto its event stream.
///
/// Runs until the queue closes or a write fails. Either way the session
/// is detached afterwards; the close latch makes that a no-op when the
/// connection teardown got there first.
async fn run_session_writer(
    mut send: SendStream,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
    dispatcher: RelayDispatcher,
    session_id: String,
    connection: Connection,
) {
    let mut filter = ReplayFilter::default();

    while let Some(command) = rx.recv().await {
        let result = match command {
            SessionCommand::Deliver(event) => {
                if filter.suppress(&event) {
                    debug!(
                        session_id = %session_id,
                        event_id = %event.id,
                        "delivery already covered by replay"
                    );
                    continue;
                }
                write_message(&mut send, &EventDeliver { event }).await
            }
            SessionCommand::History { room_id, events } => {
                filter.note_replay(&events);
                write_message(&mut send, &RoomHistory { room_id, events }).await
            }
            SessionCommand::Close { reason } => {
                connection.close(0u32.into(), reason.as_bytes());
                break;
            }
        };

        if let Err(e) = result {
            debug!(session_id = %session_id, error = %e, "event stream write failed");
            break;
        }
    }

    dispatcher.disconnect(&session_id).await;
}

async fn write_message<T: Encodable>(send: &mut SendStream, message: &T) -> Result<()> {
    let data = codec::encode(message)?;
    send.write_all(&data).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::store::MemoryStore;
    use crate::RelayConfig;

    #[test]
    fn test_identity_validation() {
        assert!(valid_identity("alice"));
        assert!(valid_identity("a"));
        assert!(!valid_identity(""));
        assert!(!valid_identity(&"x".repeat(MAX_IDENTITY_LEN + 1)));
    }

    #[test]
    fn test_replay_filter_suppresses_duplicates_once() {
        let mut filter = ReplayFilter::default();
        let replayed = Event::chat("r1", "alice", "caught by replay", 100);
        let fresh = Event::chat("r1", "alice", "after replay", 200);

        filter.note_replay(&[replayed.clone()]);
        assert!(filter.suppress(&replayed));
        assert!(!filter.suppress(&replayed));
        assert!(!filter.suppress(&fresh));

        // The next replay resets the tracked window.
        filter.note_replay(&[fresh.clone()]);
        assert!(filter.suppress(&fresh));
    }

    #[tokio::test]
    async fn test_replay_precedes_live_deliveries() {
        let dispatcher =
            RelayDispatcher::new(Arc::new(MemoryStore::new()), &RelayConfig::default());

        // One event already stored before anyone joins. Appends are
        // fire-and-forget, so poll until it lands.
        dispatcher
            .publish(Event::chat("r1", "alice", "earlier", 100))
            .await;
        let mut stored = Vec::new();
        for _ in 0..100 {
            stored = dispatcher.history("r1").await;
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.len(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher
            .register_session(SessionHandle::new("s1", "bob", tx.clone()))
            .await;
        let summary = join_with_replay(&dispatcher, &tx, "s1", "r1").await;
        assert_eq!(summary.room_id, "r1");

        dispatcher
            .publish(Event::chat("r1", "alice", "live", 200))
            .await;

        // The replay is first on the queue, and the live delivery does
        // not repeat anything from it.
        let replayed = match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(SessionCommand::History { events, .. })) => events,
            other => panic!("expected the replay first, got {other:?}"),
        };
        assert_eq!(replayed.len(), 1);

        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(SessionCommand::Deliver(event))) => {
                assert!(replayed.iter().all(|e| e.id != event.id));
            }
            other => panic!("expected a live delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_error_mapping() {
        let err = wire_error(&RelayError::auth("bad identity"));
        assert_eq!(err.code, ErrorMessage::AUTH_FAILED);

        let err = wire_error(&RelayError::protocol("unexpected frame"));
        assert_eq!(err.code, ErrorMessage::INVALID_FRAME);

        let err = wire_error(&RelayError::invalid_event("empty room id"));
        assert_eq!(err.code, ErrorMessage::INVALID_PAYLOAD);

        let err = wire_error(&RelayError::internal("boom"));
        assert_eq!(err.code, ErrorMessage::SERVER_ERROR);
    }
}
