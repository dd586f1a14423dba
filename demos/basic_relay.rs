//! Basic Usage Example for the Roomcast Relay
//!
//! This example demonstrates server configuration and the relay's
//! admission behavior: duplicate publishes collapse to one delivery and
//! stale translation results are refused after a new cycle starts.
//!
//! Run with: cargo run --example basic_relay

use std::sync::Arc;
use std::time::Duration;

use roomcast::relay::{SessionCommand, SessionHandle};
use roomcast::{
    current_timestamp, DedupConfig, Event, MemoryStore, RelayConfig, RelayDispatcher, RelayServer,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Roomcast Relay - Basic Usage Example");
    info!("====================================");

    // Example 1: Create server with default configuration
    example_default_server().await;

    // Example 2: Custom dedup tuning
    example_custom_config();

    // Example 3: Publish, dedup and fan-out without a network
    example_relay_flow().await;

    info!("Examples completed!");
    Ok(())
}

/// Example 1: Server with default configuration
async fn example_default_server() {
    info!("\n--- Example 1: Default Server Configuration ---");

    let config = RelayConfig::default();

    info!("Default configuration:");
    info!("  Bind address: {}", config.bind_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Dedup window: {:?}", config.dedup.window);
    info!("  Cycle timeout: {:?}", config.dedup.cycle_timeout);
    info!("  History replay: {} events", config.history_limit);

    // Create server (but don't start it in this example)
    let server = RelayServer::new(config);
    let stats = server.stats().await;

    info!("Server created:");
    info!("  Sessions: {}", stats.sessions);
    info!("  Rooms: {}", stats.rooms);
}

/// Example 2: Custom configuration
fn example_custom_config() {
    info!("\n--- Example 2: Custom Configuration ---");

    let dedup = DedupConfig::default()
        .with_window(Duration::from_secs(120))
        .with_sweep_interval(Duration::from_secs(30))
        .with_cycle_timeout(Duration::from_secs(15));

    let config = RelayConfig::default()
        .with_bind_addr("0.0.0.0:5000".parse().unwrap())
        .with_max_connections(5000)
        .with_history_limit(100)
        .with_room_linger_secs(120)
        .with_dedup(dedup);

    info!("Custom configuration:");
    info!("  Bind address: {}", config.bind_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Dedup window: {:?}", config.dedup.window);
    info!("  Sweep interval: {:?}", config.dedup.sweep_interval);
    info!("  Cycle timeout: {:?}", config.dedup.cycle_timeout);
    info!("  Room linger: {}s", config.room_linger_secs);
}

/// Example 3: The relay core, driven in-process
async fn example_relay_flow() {
    info!("\n--- Example 3: Publish, Dedup and Fan-Out ---");

    let config = RelayConfig::default();
    let dispatcher = RelayDispatcher::new(Arc::new(MemoryStore::new()), &config);

    // Two in-process sessions standing in for connections
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    dispatcher
        .register_session(SessionHandle::new("session-a", "alice", tx_a))
        .await;
    dispatcher
        .register_session(SessionHandle::new("session-b", "bob", tx_b))
        .await;

    let summary = dispatcher.join("session-a", "lobby").await;
    info!(
        "alice joined {} ({} member(s))",
        summary.room_id,
        summary.members.len()
    );
    dispatcher.join("session-b", "lobby").await;

    // Publish the same chat payload twice; the dedup guard admits one
    let ts = current_timestamp();
    dispatcher
        .publish(Event::chat("lobby", "alice", "hello room", ts))
        .await;
    dispatcher
        .publish(Event::chat("lobby", "alice", "hello room", ts))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(
        "chat deliveries to bob: {} (duplicate dropped)",
        drain_deliveries(&mut rx_b)
    );

    // A translation cycle re-baselines the result watermark: output
    // stamped before the trigger is stale, fresh output passes once.
    dispatcher.begin_cycle("lobby").await;
    let now = current_timestamp();
    dispatcher
        .publish(Event::translation(
            "lobby",
            "pipeline",
            "good morning",
            now.saturating_sub(60_000),
        ))
        .await;
    dispatcher
        .publish(Event::translation("lobby", "pipeline", "good evening", now + 1_000))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(
        "translation deliveries to bob: {} (stale result dropped)",
        drain_deliveries(&mut rx_b)
    );

    info!("Rooms: {}", dispatcher.room_count().await);
    info!("Sessions: {}", dispatcher.session_count().await);
}

fn drain_deliveries(rx: &mut mpsc::UnboundedReceiver<SessionCommand>) -> usize {
    let mut delivered = 0;
    while let Ok(command) = rx.try_recv() {
        if let SessionCommand::Deliver(event) = command {
            info!("  delivered: {:?}", event.body);
            delivered += 1;
        }
    }
    delivered
}

/// To actually run the server, uncomment and use this function
#[allow(dead_code)]
async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::default();
    let mut server = RelayServer::new(config);

    info!("Starting server...");
    info!("Press Ctrl+C to stop");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
    };

    server.run_until(shutdown).await?;
    Ok(())
}
