//! QUIC relay server.
//!
//! Owns the endpoint and the accept loop, enforces the connection cap,
//! and hands each accepted connection to a [`SessionConnection`]. The
//! relay state itself lives in the [`RelayDispatcher`], which is shared
//! by every connection and by the periodic maintenance task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::QuicServerConfig;
use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::relay::dispatcher::RelayDispatcher;
use crate::relay::store::{EventStore, MemoryStore};
use crate::server::connection::SessionConnection;
use crate::RelayConfig;

/// ALPN protocol identifier spoken by relay endpoints.
const ALPN: &[u8] = b"roomcast";

/// Room relay server over QUIC.
pub struct RelayServer {
    config: RelayConfig,
    dispatcher: RelayDispatcher,
    endpoint: Option<Endpoint>,
    connection_limit: Arc<Semaphore>,
}

impl RelayServer {
    /// Create a server backed by an in-memory event store.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Create a server with a caller-provided event store.
    pub fn with_store(config: RelayConfig, store: Arc<dyn EventStore>) -> Self {
        let dispatcher = RelayDispatcher::new(store, &config);
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            dispatcher,
            endpoint: None,
            connection_limit,
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Handle to the relay shared with all connections. Useful for
    /// publishing server-side events or inspecting rooms.
    pub fn dispatcher(&self) -> RelayDispatcher {
        self.dispatcher.clone()
    }

    /// Bind the endpoint without accepting yet. Returns the local
    /// address, which matters when binding port 0.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let endpoint = self.ensure_endpoint()?;
        Ok(endpoint.local_addr()?)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.as_ref().and_then(|e| e.local_addr().ok())
    }

    /// Run the server.
    ///
    /// This method blocks until the endpoint stops accepting.
    pub async fn run(&mut self) -> Result<()> {
        let endpoint = self.ensure_endpoint()?;
        let maintenance = self.dispatcher.spawn_maintenance();

        let result = self.accept_loop(&endpoint).await;

        maintenance.abort();
        result
    }

    /// Run the server with graceful shutdown.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let endpoint = self.ensure_endpoint()?;
        let maintenance = self.dispatcher.spawn_maintenance();

        let result = tokio::select! {
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&endpoint) => result,
        };

        maintenance.abort();
        endpoint.close(0u32.into(), b"server shutdown");
        result
    }

    /// Point-in-time relay counters.
    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            sessions: self.dispatcher.session_count().await,
            rooms: self.dispatcher.room_count().await,
        }
    }

    /// Close the endpoint, dropping all connections.
    pub fn shutdown(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"server shutdown");
            info!("Server shutdown complete");
        }
    }

    async fn accept_loop(&self, endpoint: &Endpoint) -> Result<()> {
        loop {
            match endpoint.accept().await {
                Some(incoming) => self.handle_incoming(incoming),
                None => {
                    warn!("Endpoint stopped accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_incoming(&self, incoming: quinn::Incoming) {
        let permit = match Arc::clone(&self.connection_limit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(peer = %incoming.remote_address(), "connection rejected: limit reached");
                incoming.refuse();
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match incoming.await {
                Ok(connection) => {
                    let handler = Arc::new(SessionConnection::new(connection, dispatcher));
                    if let Err(e) = handler.run().await {
                        debug!(error = %e, "connection handling failed");
                    }
                }
                Err(e) => {
                    debug!(error = %e, "connection handshake failed");
                }
            }
        });
    }

    /// Build the QUIC endpoint on first use.
    fn ensure_endpoint(&mut self) -> Result<Endpoint> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }

        let bind_addr = self.config.bind_addr;

        // Self-signed certificate; deployments front this with their own.
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| RelayError::config(format!("failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(cert.serialize_der().map_err(|e| {
            RelayError::config(format!("failed to serialize certificate: {}", e))
        })?);
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| RelayError::config(format!("failed to configure TLS: {}", e)))?;

        tls_config.alpn_protocols = vec![ALPN.to_vec()];
        tls_config.max_early_data_size = 0;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(8u32.into());
        transport_config.max_concurrent_uni_streams(8u32.into());

        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        transport_config.max_idle_timeout(Some(
            idle.try_into()
                .map_err(|_| RelayError::config("idle timeout too large"))?,
        ));

        // Flow control sized to the largest frame we accept.
        let window = u32::try_from(self.config.max_frame_size.saturating_mul(2)).unwrap_or(u32::MAX);
        transport_config.stream_receive_window(window.into());

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            QuicServerConfig::try_from(tls_config)
                .map_err(|e| RelayError::config(format!("failed to create QUIC config: {}", e)))?,
        ));
        server_config.transport_config(Arc::new(transport_config));

        let endpoint = Endpoint::server(server_config, bind_addr)
            .map_err(|e| RelayError::network(format!("failed to bind {}: {}", bind_addr, e)))?;

        info!("Relay server listening on {}", endpoint.local_addr()?);
        self.endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }
}

/// Relay counters reported by [`RelayServer::stats`].
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Connected, authenticated sessions
    pub sessions: usize,
    /// Rooms currently tracked by the registry
    pub rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = RelayServer::with_defaults();
        assert!(server.endpoint.is_none());
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_initial_stats() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.rooms, 0);
    }

    #[tokio::test]
    async fn test_dispatcher_is_shared() {
        let server = RelayServer::with_defaults();
        let dispatcher = server.dispatcher();

        dispatcher.join("s1", "lobby").await;

        assert_eq!(server.stats().await.rooms, 1);
    }
}
