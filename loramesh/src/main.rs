//! `loramesh`: console client for a LoRa mesh gateway.
//!
//! Loads the message backlog, follows the live channel, and publishes what
//! you type. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/loramesh/config.toml`).
//!
//! ```bash
//! # Gateway on this machine (HTTP :5000, live channel :8000)
//! cargo run --bin loramesh
//!
//! # Remote gateway
//! cargo run --bin loramesh -- --origin https://mesh.example.org
//!
//! # Or via environment variables
//! LORAMESH_ORIGIN=http://10.0.0.5:5000 cargo run --bin loramesh
//! ```
//!
//! Commands: `/older` loads older history, `/peers` lists nodes, `/quit`
//! exits. Anything else is sent.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use loramesh::api::http::HttpApi;
use loramesh::config::{CliArgs, ClientConfig};
use loramesh::console::{self, Input};
use loramesh::live::ws::WsConnector;
use loramesh::peers::PeerRecord;
use loramesh::session::{self, SessionCommand, SessionEvent};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout belongs to the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("loramesh starting");
    let result = run(&config).await;
    tracing::info!("loramesh exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("loramesh: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("loramesh.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Run one session until the user quits or stdin closes.
async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session_config = config.to_session_config()?;
    let api = HttpApi::new(config.origin_url()?)?;

    println!(
        "Connecting to {} (live: {})",
        api.origin(),
        session_config.live_url
    );
    let (cmd_tx, mut evt_rx) =
        session::spawn_session(session_config, Arc::new(api), Arc::new(WsConnector));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut peers: BTreeMap<String, PeerRecord> = BTreeMap::new();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = evt_rx.recv() => {
                let Some(event) = event else { break };
                for line in console::render_event(&event, &Local) {
                    println!("{line}");
                }
                if let SessionEvent::PeerUpdated(peer) = event {
                    peers.insert(peer.id.clone(), peer);
                }
            }
            line = lines.next_line(), if stdin_open => {
                let command = match line {
                    Ok(Some(line)) => match console::parse_input(&line) {
                        None => continue,
                        Some(Input::Send(text)) => SessionCommand::Send { text },
                        Some(Input::Older) => SessionCommand::LoadOlder,
                        Some(Input::Quit) => SessionCommand::Shutdown,
                        Some(Input::Peers) => {
                            print_peers(&peers);
                            continue;
                        }
                        Some(Input::Unknown(cmd)) => {
                            println!("unknown command {cmd} (try /older, /peers, /quit)");
                            continue;
                        }
                    },
                    Ok(None) => {
                        stdin_open = false;
                        SessionCommand::Shutdown
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        stdin_open = false;
                        SessionCommand::Shutdown
                    }
                };
                if cmd_tx.send(command).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn print_peers(peers: &BTreeMap<String, PeerRecord>) {
    if peers.is_empty() {
        println!("no nodes seen yet");
        return;
    }
    for peer in peers.values() {
        println!("  {}", console::render_peer(peer, &Local));
    }
}
