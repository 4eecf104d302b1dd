//! Broker server demo with a simulated producer
//!
//! Run with: cargo run --example broker_server [--upstream] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example broker_server                    # binds to 0.0.0.0:9001
//!   cargo run --example broker_server 127.0.0.1:9101     # binds to 127.0.0.1:9101
//!   cargo run --example broker_server --upstream         # real STOMP feeds
//!
//! Connect with any WebSocket client (e.g. `websocat ws://localhost:9001`)
//! and send:
//!
//! ```text
//! {"id":"1","type":"connect","payload":{"providerId":"desk-1","websocketUrl":"ws://feeds/ws","dataType":"positions"}}
//! {"id":"2","type":"get-snapshot"}
//! {"id":"3","type":"get-statistics"}
//! {"id":"4","type":"refresh"}
//! ```
//!
//! By default the upstream side is an in-memory transport: a producer task
//! waits for the session to subscribe, emits a small snapshot followed by the
//! end-of-snapshot sentinel, then sends a price update every second. With
//! `--upstream` each session connects to the `websocketUrl` in its connect
//! request over STOMP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use stomp_broker::transport::{
    MemoryFeed, MemoryTransportFactory, TransportFactory, WsTransportConfig, WsTransportFactory,
};
use stomp_broker::{Broker, ServerConfig};

const PROVIDER: &str = "desk-1";
const INSTRUMENTS: [&str; 4] = ["AAPL", "MSFT", "NVDA", "TSLA"];

/// Plays the remote producer for one provider id
async fn produce(feed: MemoryFeed) {
    let mut published_seen = 0;
    let mut tick: u64 = 0;

    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;

        // A new trigger means a new snapshot cycle
        let published = feed.published().len();
        if published > published_seen && feed.is_active() {
            published_seen = published;
            for (i, symbol) in INSTRUMENTS.iter().enumerate() {
                feed.frame(json!({ "id": symbol, "qty": (i + 1) * 100, "px": 100.0 }).to_string());
            }
            feed.frame(format!("Success: All {} records delivered", INSTRUMENTS.len()));
            continue;
        }

        if feed.is_active() && published_seen > 0 {
            tick += 1;
            if tick % 4 == 0 {
                let symbol = INSTRUMENTS[(tick / 4) as usize % INSTRUMENTS.len()];
                feed.frame(json!({ "id": symbol, "px": 100.0 + (tick as f64) / 10.0 }).to_string());
            }
        }
    }
}

fn print_usage() {
    eprintln!("Usage: broker_server [--upstream] [BIND_ADDR]");
    eprintln!();
    eprintln!("  --upstream  connect sessions to real STOMP-over-WebSocket feeds");
    eprintln!("  BIND_ADDR   address to listen on (default 0.0.0.0:9001)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let upstream = args.iter().any(|a| a == "--upstream");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

    let mut config = ServerConfig::default();
    if let Some(addr) = positional.first() {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Invalid bind address {:?}: {}", addr, e);
                print_usage();
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stomp_broker=debug".parse()?)
                .add_directive("broker_server=debug".parse()?),
        )
        .init();

    let factory: Arc<dyn TransportFactory> = if upstream {
        let settings = WsTransportConfig::default().reconnect_delay(Duration::from_secs(2));
        Arc::new(WsTransportFactory::new(settings))
    } else {
        let factory = MemoryTransportFactory::new();
        tokio::spawn(produce(factory.feed(PROVIDER)));
        Arc::new(factory)
    };

    let broker = Broker::new(factory);
    let server = broker.server(config);

    println!("Broker listening on ws://{}", server.bind_addr());
    if upstream {
        println!("Sessions connect to the websocketUrl of each connect request");
    } else {
        println!("Provider id for the simulated feed: {}", PROVIDER);
    }

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    broker.shutdown().await;
    result?;
    Ok(())
}
