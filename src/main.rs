//! Deribit client session entry point
//!
//! Connects and authenticates a session, demonstrates the command layer
//! (instrument lookup, order book snapshot, order-book streaming), and
//! shuts down cleanly on Ctrl+C.

use std::path::Path;

use tokio::signal;
use tracing::{error, info, warn};

use deribit_client::commands::{self, Command};
use deribit_client::config;
use deribit_client::session::{Credentials, Session, WsConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    // Initialize logging
    config::init_logging();

    // Load configuration from YAML
    let config = match config::load_config(Path::new("config.yaml")) {
        Ok(cfg) => {
            info!(ws_url = %cfg.exchange.ws_url, "configuration loaded");
            cfg
        }
        Err(e) => {
            error!("Configuration failed: {}", e);
            std::process::exit(1);
        }
    };

    let credentials = Credentials::from_env()?;
    let instrument = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ETH-PERPETUAL".to_string());

    let session = Session::new(
        WsConnector::new(&config.exchange.ws_url),
        credentials,
        config.reconnect.to_policy(),
        config.call_timeout(),
    );
    session.connect().await?;

    // Instrument metadata
    let meta = commands::dispatch(
        &session,
        Command::Instrument {
            instrument: instrument.clone(),
        },
    )
    .await?;
    info!(
        instrument = %instrument,
        contract_size = meta.get("contract_size").and_then(|v| v.as_f64()),
        "instrument metadata"
    );

    // Order book snapshot
    let book = commands::dispatch(
        &session,
        Command::OrderBook {
            instrument: instrument.clone(),
            depth: 5,
        },
    )
    .await?;
    info!(
        best_bid = book.get("best_bid_price").and_then(|v| v.as_f64()),
        best_ask = book.get("best_ask_price").and_then(|v| v.as_f64()),
        "order book snapshot"
    );

    // Stream order-book updates until Ctrl+C
    commands::dispatch(
        &session,
        Command::StreamBook {
            instrument: instrument.clone(),
            interval: "100ms".to_string(),
        },
    )
    .await?;
    info!(instrument = %instrument, "streaming order book, press Ctrl+C to stop");

    let mut events = session.events();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Graceful shutdown initiated");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        info!(channel = %event.channel, "market data update: {}", event.payload);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event consumer lagging, updates dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.close().await;
    info!("Clean exit");
    Ok(())
}
