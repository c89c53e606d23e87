//! mcpe-server: game server supervisor.
//!
//! Runs the server binary under a PTY and lets the console, Unix socket and
//! WebSocket clients attach to it, submit commands and wait for their
//! results. `:restart` respawns the server, `:quit` stops everything.

mod config;
mod hub;
mod lifecycle;
mod server;
mod supervisor;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use hub::{Hub, HubConfig, LogSink};
use lifecycle::Controller;
use mcpe_core::{LineStream, McpeResult, Source};
use rand::RngCore;
use server::AttachServer;
use std::path::PathBuf;
use supervisor::{prepare_data_dir, PtySpawner};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use transport::unix::SocketGuard;
use transport::{Framing, SessionOptions};

/// mcpe-server: game server supervisor
#[derive(Parser, Debug)]
#[command(name = "mcpe-server", version, about = "Game server supervisor")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "mcpe.toml")]
    config: String,

    /// Directory holding the server binary
    #[arg(long)]
    bin: Option<String>,

    /// Working directory of the server
    #[arg(long)]
    data: Option<String>,

    /// Directory holding worlds, mods and server.properties
    #[arg(long)]
    link: Option<String>,

    /// Append-only log of everything broadcast to sessions
    #[arg(long)]
    log_file: Option<String>,

    /// Unix socket to accept attach clients on
    #[arg(long)]
    socket: Option<String>,

    /// WebSocket bind address (e.g. 127.0.0.1:8080)
    #[arg(long)]
    websocket: Option<String>,

    /// WebSocket path token
    #[arg(long)]
    token: Option<String>,

    /// Do not attach this terminal as the console session
    #[arg(long)]
    no_console: bool,

    /// Respawn the server when it exits on its own
    #[arg(long)]
    restart_on_exit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Diagnostics go to stderr; stdout belongs to the console session.
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting mcpe-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        bin: cli.bin,
        data: cli.data,
        link: cli.link,
        log_file: cli.log_file,
        socket: cli.socket,
        websocket: cli.websocket,
        token: cli.token,
        no_console: cli.no_console,
        restart_on_exit: cli.restart_on_exit,
    };
    let config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let restarts = match run(config).await {
        Ok(restarts) => restarts,
        Err(e) => {
            error!(error = %e, "supervisor failed");
            std::process::exit(1);
        }
    };

    info!(restarts, "mcpe-server stopped");
    // The console reader may still be parked on stdin.
    std::process::exit(0);
}

async fn run(config: ServerConfig) -> McpeResult<u32> {
    if config.prepare {
        prepare_data_dir(&config.data_dir, &config.link_dir)?;
    }
    let sink = LogSink::open(&config.log_file).await?;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (hub, hub_task) = Hub::spawn(
        HubConfig {
            queue_capacity: config.queue_capacity,
            result_window: config.result_window,
            result_cache: config.result_cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        Some(sink),
        control_tx.clone(),
    );

    let (socket_rx, _socket_guard) = match &config.socket {
        Some(path) => (
            Some(transport::unix::start_listener(path)?),
            Some(SocketGuard(path.clone())),
        ),
        None => (None, None),
    };

    let ws_rx = match config.websocket {
        Some(addr) => {
            let token = if config.token.is_empty() {
                generate_token()
            } else {
                config.token.clone()
            };
            let (local, rx) = transport::websocket::start_listener(addr, &token).await?;
            info!(url = %format!("ws://{local}/{token}"), "WebSocket attach enabled");
            Some(rx)
        }
        None => None,
    };

    tokio::spawn(AttachServer::new(hub.clone(), config.max_timeout, socket_rx, ws_rx).run());

    if config.console {
        let console = LineStream::new(tokio::io::stdin(), tokio::io::stdout());
        let options = SessionOptions {
            source: Source::Console,
            owner: true,
            framing: Framing::Plain,
            max_timeout: config.max_timeout,
        };
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::serve(hub, console, options).await {
                warn!(error = %e, "console session error");
            }
        });
    }

    let spawner = PtySpawner::new(
        config.bin_dir.clone(),
        config.program.clone(),
        config.data_dir.clone(),
        config.stop_grace,
    );
    let controller = Controller::new(spawner, hub, control_rx, control_tx, config.restart_on_exit);
    let restarts = controller.run(shutdown_signal()).await?;

    if let Err(e) = hub_task.await {
        warn!(error = %e, "hub task failed");
    }
    Ok(restarts)
}

/// 32 random bytes, hex encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
