//! QUIC-based relay client implementation
//!
//! This module provides a client for connecting to the relay server,
//! joining rooms, publishing events, and receiving real-time deliveries.
//! Both chat participants and pipeline producers use the same client;
//! producers simply call the `publish_*` methods instead of joining.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, RecvStream, SendStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::current_timestamp;
use crate::error::{RelayError, Result};
use crate::protocol::codec::{self, Encodable};
use crate::protocol::frame::{Frame, FrameCodec, FrameType};
use crate::protocol::messages::{
    Auth, AuthFailed, AuthOk, Error as ErrorMessage, EventDeliver, Goodbye, Hello, HelloAck,
    JoinOk, JoinRoom, LeaveOk, LeaveRoom, PeerInfo, Ping, Pong, PublishChat, RoomHistory,
    TranslationResult, TriggerTranslation, VideoReady,
};
use crate::relay::event::Event;

/// ALPN protocol identifier spoken by relay endpoints.
const ALPN: &[u8] = b"roomcast";

/// Relay client configuration
#[derive(Clone, Debug)]
pub struct RelayClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// TLS server name presented during the handshake
    pub server_name: String,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            server_name: "localhost".to_string(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
        }
    }
}

/// Events that the client can receive
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected and authenticated
    Connected,
    /// Disconnected from server
    Disconnected(String),
    /// A relayed event arrived on the delivery stream
    EventReceived(Event),
    /// Room history replay, sent once after a join
    HistoryReceived { room_id: String, events: Vec<Event> },
    /// Join acknowledged, with the membership snapshot
    JoinedRoom {
        room_id: String,
        members: Vec<PeerInfo>,
    },
    /// Leave acknowledged
    LeftRoom { room_id: Option<String> },
    /// Error frame sent by the server
    ServerError(ErrorMessage),
    /// Local error (parse failure, dead stream)
    Error(RelayError),
}

/// QUIC-based relay client
pub struct RelayClient {
    config: RelayClientConfig,
    identity: Option<String>,
    session_id: Option<String>,
    connection: Option<Connection>,
    endpoint: Option<Endpoint>,
    control_send: Arc<RwLock<Option<SendStream>>>,
    event_tx: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl RelayClient {
    /// Create a new relay client with the given configuration
    pub fn new(config: RelayClientConfig) -> Self {
        Self {
            config,
            identity: None,
            session_id: None,
            connection: None,
            endpoint: None,
            control_send: Arc::new(RwLock::new(None)),
            event_tx: None,
        }
    }

    /// Connect to the relay server and authenticate as `identity`
    pub async fn connect(
        &mut self,
        identity: String,
    ) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("Connecting to relay server at {}", self.config.server_addr);

        let client_config = self.configure_client()?;

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| RelayError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);
        self.endpoint = Some(endpoint.clone());

        let connecting = endpoint
            .connect(self.config.server_addr, &self.config.server_name)
            .map_err(|e| RelayError::connection(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| RelayError::timeout("Connection timeout"))?
        .map_err(|e| RelayError::connection(format!("Failed to connect: {}", e)))?;

        self.connection = Some(connection.clone());

        // The control stream carries the handshake and all commands.
        let (mut control_send, mut control_recv) = connection.open_bi().await?;
        let mut codec = FrameCodec::new();
        let session_id =
            handshake(&mut control_send, &mut control_recv, &mut codec, &identity).await?;

        info!(session_id = %session_id, identity = %identity, "connected to relay");
        self.session_id = Some(session_id);
        self.identity = Some(identity);
        *self.control_send.write().await = Some(control_send);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.event_tx = Some(event_tx.clone());
        let _ = event_tx.send(ClientEvent::Connected);

        // Acks, pings and errors keep arriving on the control stream;
        // deliveries come down the server-opened uni stream.
        tokio::spawn(run_control_reader(
            control_recv,
            codec,
            Arc::clone(&self.control_send),
            event_tx.clone(),
        ));
        tokio::spawn(run_event_reader(connection, event_tx));

        Ok(event_rx)
    }

    /// Configure the QUIC client
    fn configure_client(&self) -> Result<QuinnClientConfig> {
        // Accepts the server's self-signed certificate.
        // WARNING: This is insecure and should only be used for development/testing
        let mut crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();

        // Set ALPN protocol to match server
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        Ok(QuinnClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| RelayError::config(format!("Failed to create QUIC config: {}", e)))?,
        )))
    }

    /// Join a room, creating it on the server if needed. The ack arrives
    /// as [`ClientEvent::JoinedRoom`], followed by the history replay.
    pub async fn join(&self, room_id: impl Into<String>) -> Result<()> {
        self.send_control(&JoinRoom {
            room_id: room_id.into(),
        })
        .await
    }

    /// Leave the current room, if any.
    pub async fn leave(&self) -> Result<()> {
        self.send_control(&LeaveRoom {}).await
    }

    /// Publish a chat message to the current room.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.send_control(&PublishChat {
            text: text.into(),
            client_ts: current_timestamp(),
        })
        .await
    }

    /// Start a translation cycle for the current room.
    pub async fn trigger_translation(&self) -> Result<()> {
        self.send_control(&TriggerTranslation {}).await
    }

    /// Publish a translated sentence as a pipeline producer.
    pub async fn publish_translation(
        &self,
        room_id: impl Into<String>,
        sentence: impl Into<String>,
        completed_at: u64,
    ) -> Result<()> {
        self.send_control(&TranslationResult {
            room_id: room_id.into(),
            sentence: sentence.into(),
            completed_at,
        })
        .await
    }

    /// Publish a rendered video URL as a pipeline producer.
    pub async fn publish_video(
        &self,
        room_id: impl Into<String>,
        url: impl Into<String>,
        recorded_at: u64,
    ) -> Result<()> {
        self.send_control(&VideoReady {
            room_id: room_id.into(),
            url: url.into(),
            recorded_at,
        })
        .await
    }

    /// Disconnect from the relay server
    pub async fn disconnect(&mut self) -> Result<()> {
        // Goodbye lets the server flush buffered deliveries first.
        let _ = self
            .send_control(&Goodbye {
                reason: "client disconnect".to_string(),
            })
            .await;
        *self.control_send.write().await = None;

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"client disconnect");
            info!("Disconnected from relay server");
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"client shutdown");
        }

        self.identity = None;
        self.session_id = None;
        self.event_tx = None;

        Ok(())
    }

    /// Session ID assigned by the server, once connected
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Identity this client authenticated as
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Check if connected to server
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Get connection statistics
    pub fn connection_stats(&self) -> Option<ConnectionStats> {
        self.connection.as_ref().map(|conn| {
            let stats = conn.stats();
            ConnectionStats {
                bytes_sent: stats.udp_tx.bytes,
                bytes_received: stats.udp_rx.bytes,
                packets_sent: stats.udp_tx.datagrams,
                packets_received: stats.udp_rx.datagrams,
                round_trip_time: stats.path.rtt,
            }
        })
    }

    async fn send_control<T: Encodable>(&self, message: &T) -> Result<()> {
        let data = codec::encode(message)?;
        let mut guard = self.control_send.write().await;
        match guard.as_mut() {
            Some(send) => {
                send.write_all(&data).await?;
                Ok(())
            }
            None => Err(RelayError::connection("Not connected to server")),
        }
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub round_trip_time: std::time::Duration,
}

/// Run the Hello/Auth handshake on a fresh control stream. Returns the
/// session ID assigned by the server.
async fn handshake(
    send: &mut SendStream,
    recv: &mut RecvStream,
    codec: &mut FrameCodec,
    identity: &str,
) -> Result<String> {
    let data = codec::encode(&Hello::default())?;
    send.write_all(&data).await?;

    let frame = read_frame(recv, codec).await?;
    let ack: HelloAck = match frame.frame_type {
        FrameType::HelloAck => codec::decode(&frame)?,
        FrameType::Error => {
            let err: ErrorMessage = codec::decode(&frame)?;
            return Err(RelayError::protocol(format!(
                "handshake rejected: {}",
                err.message
            )));
        }
        other => {
            return Err(RelayError::protocol(format!(
                "expected HelloAck, got {:?}",
                other
            )));
        }
    };

    let data = codec::encode(&Auth {
        identity: identity.to_string(),
    })?;
    send.write_all(&data).await?;

    let frame = read_frame(recv, codec).await?;
    match frame.frame_type {
        FrameType::AuthOk => {
            let _: AuthOk = codec::decode(&frame)?;
            Ok(ack.session_id)
        }
        FrameType::AuthFailed => {
            let failed: AuthFailed = codec::decode(&frame)?;
            Err(RelayError::auth(failed.message))
        }
        other => Err(RelayError::protocol(format!(
            "expected AuthOk, got {:?}",
            other
        ))),
    }
}

/// Read one complete frame, feeding the codec as needed.
async fn read_frame(recv: &mut RecvStream, codec: &mut FrameCodec) -> Result<Frame> {
    let mut buf = vec![0u8; 4096];
    loop {
        if let Some(frame) = codec.decode_next()? {
            return Ok(frame);
        }
        match recv.read(&mut buf).await? {
            Some(n) => codec.feed(&buf[..n]),
            None => {
                return Err(RelayError::connection(
                    "control stream closed during handshake",
                ));
            }
        }
    }
}

/// Background task: acks, errors and keepalives on the control stream.
async fn run_control_reader(
    mut recv: RecvStream,
    mut codec: FrameCodec,
    control_send: Arc<RwLock<Option<SendStream>>>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut buf = vec![0u8; 4096];

    loop {
        loop {
            match codec.decode_next() {
                Ok(Some(frame)) => {
                    if handle_control_frame(frame, &control_send, &event_tx)
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = event_tx.send(ClientEvent::Error(e.into()));
                    return;
                }
            }
        }

        match recv.read(&mut buf).await {
            Ok(Some(n)) => codec.feed(&buf[..n]),
            Ok(None) => {
                debug!("control stream closed by server");
                return;
            }
            Err(e) => {
                debug!(error = %e, "control stream read error");
                return;
            }
        }
    }
}

async fn handle_control_frame(
    frame: Frame,
    control_send: &Arc<RwLock<Option<SendStream>>>,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) -> Result<()> {
    match frame.frame_type {
        FrameType::Ping => {
            let ping: Ping = codec::decode(&frame)?;
            let pong = codec::encode(&Pong {
                timestamp: ping.timestamp,
            })?;
            let mut guard = control_send.write().await;
            if let Some(send) = guard.as_mut() {
                send.write_all(&pong).await?;
            }
            Ok(())
        }
        FrameType::Pong => Ok(()),
        FrameType::JoinOk => {
            let ok: JoinOk = codec::decode(&frame)?;
            let _ = event_tx.send(ClientEvent::JoinedRoom {
                room_id: ok.room_id,
                members: ok.members,
            });
            Ok(())
        }
        FrameType::LeaveOk => {
            let ok: LeaveOk = codec::decode(&frame)?;
            let _ = event_tx.send(ClientEvent::LeftRoom {
                room_id: ok.room_id,
            });
            Ok(())
        }
        FrameType::Error => {
            let err: ErrorMessage = codec::decode(&frame)?;
            let _ = event_tx.send(ClientEvent::ServerError(err));
            Ok(())
        }
        other => {
            debug!(frame_type = ?other, "ignoring unexpected control frame");
            Ok(())
        }
    }
}

/// Background task: deliveries on the server-opened uni stream.
async fn run_event_reader(connection: Connection, event_tx: mpsc::UnboundedSender<ClientEvent>) {
    let mut recv = match connection.accept_uni().await {
        Ok(recv) => recv,
        Err(e) => {
            let _ = event_tx.send(ClientEvent::Disconnected(format!("connection lost: {}", e)));
            return;
        }
    };

    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        loop {
            match codec.decode_next() {
                Ok(Some(frame)) => handle_event_frame(frame, &event_tx),
                Ok(None) => break,
                Err(e) => {
                    let _ = event_tx.send(ClientEvent::Disconnected(format!(
                        "event stream corrupted: {}",
                        e
                    )));
                    return;
                }
            }
        }

        match recv.read(&mut buf).await {
            Ok(Some(n)) => codec.feed(&buf[..n]),
            Ok(None) => {
                let _ = event_tx.send(ClientEvent::Disconnected("event stream closed".to_string()));
                return;
            }
            Err(e) => {
                let _ =
                    event_tx.send(ClientEvent::Disconnected(format!("connection lost: {}", e)));
                return;
            }
        }
    }
}

fn handle_event_frame(frame: Frame, event_tx: &mpsc::UnboundedSender<ClientEvent>) {
    match frame.frame_type {
        FrameType::EventDeliver => match codec::decode::<EventDeliver>(&frame) {
            Ok(deliver) => {
                let _ = event_tx.send(ClientEvent::EventReceived(deliver.event));
            }
            Err(e) => {
                let _ = event_tx.send(ClientEvent::Error(e.into()));
            }
        },
        FrameType::RoomHistory => match codec::decode::<RoomHistory>(&frame) {
            Ok(history) => {
                let _ = event_tx.send(ClientEvent::HistoryReceived {
                    room_id: history.room_id,
                    events: history.events,
                });
            }
            Err(e) => {
                let _ = event_tx.send(ClientEvent::Error(e.into()));
            }
        },
        other => {
            debug!(frame_type = ?other, "ignoring unexpected delivery frame");
        }
    }
}

/// Custom certificate verifier that accepts any certificate (INSECURE - for development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}
