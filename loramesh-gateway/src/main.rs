//! `loramesh-gateway`: in-memory reference gateway.
//!
//! # Usage
//!
//! ```bash
//! # API on 0.0.0.0:5000, live channel on 0.0.0.0:8000
//! cargo run --bin loramesh-gateway
//!
//! # Everything on one port
//! cargo run --bin loramesh-gateway -- --bind 127.0.0.1:7000 --live-bind 127.0.0.1:7000
//! ```

use std::sync::Arc;

use clap::Parser;
use loramesh_gateway::config::{GatewayCliArgs, GatewayConfig};
use loramesh_gateway::gateway::{self, GatewayState};
use loramesh_gateway::store::MessageLog;

#[tokio::main]
async fn main() {
    let cli = GatewayCliArgs::parse();

    let config = match GatewayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let state = Arc::new(GatewayState::with_log(MessageLog::with_cap(
        config.history_cap,
    )));

    let mut handles = Vec::new();
    let mut addrs = vec![config.bind_addr.as_str()];
    if config.separate_live_listener() {
        addrs.push(config.live_bind_addr.as_str());
    }
    for addr in addrs {
        match gateway::start_server_with_state(addr, Arc::clone(&state)).await {
            Ok((bound_addr, handle)) => {
                tracing::info!(addr = %bound_addr, "gateway listening");
                handles.push(handle);
            }
            Err(e) => {
                tracing::error!(addr, error = %e, "failed to start gateway");
                std::process::exit(1);
            }
        }
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "gateway task failed");
        }
    }
}
