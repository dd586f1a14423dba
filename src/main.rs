//! Roomcast relay server
//!
//! Room-scoped publish/subscribe relay over QUIC with idempotent event
//! delivery. Sessions join rooms, producers publish chat messages and
//! pipeline results, and the relay dedups and fans each event out to
//! every room member.
//!
//! Usage:
//!   cargo run -- server                    # Run the relay server
//!   cargo run -- server --port 4433        # Run on specific port

use roomcast::{RelayConfig, RelayServer};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            let port = parse_port(&args);
            run_server(port).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Roomcast - Room Event Relay over QUIC");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the relay server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 1000)");
    println!();
    println!("PROTOCOL:");
    println!("    Each session speaks two QUIC streams:");
    println!("    - Control stream (bidirectional): handshake, room commands, acks");
    println!("    - Event stream (server→client): deduplicated room deliveries");
    println!();
    println!("    Events are admitted once per content fingerprint within the");
    println!("    retention window; translation results are additionally gated by");
    println!("    a per-room watermark that resets on each translation cycle.");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4433 // default port
}

fn parse_max_connections(args: &[String]) -> usize {
    for i in 0..args.len() {
        if args[i] == "--max-conn" && i + 1 < args.len() {
            if let Ok(max) = args[i + 1].parse() {
                return max;
            }
        }
    }
    1000 // default
}

async fn run_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Roomcast relay server...");

    let args: Vec<String> = env::args().collect();
    let max_connections = parse_max_connections(&args);

    let config = RelayConfig::default()
        .with_bind_addr(format!("0.0.0.0:{}", port).parse()?)
        .with_max_connections(max_connections);

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - Dedup window: {:?}", config.dedup.window);
    info!("  - Cycle timeout: {:?}", config.dedup.cycle_timeout);
    info!("  - History replay: {} events", config.history_limit);

    let mut server = RelayServer::new(config);

    // Run until the process is terminated
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
