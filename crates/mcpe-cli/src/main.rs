//! mcpe: client for the mcpe server supervisor.
//!
//! Attaches to the supervisor's Unix socket to follow the server log,
//! run commands and wait for their results, check liveness or stop it.

mod client;
mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::Client;
use commands::exec::Outcome;
use std::path::PathBuf;
use tracing::error;

/// mcpe: server supervisor client
#[derive(Parser)]
#[command(name = "mcpe", version, about = "Attach to and control a running mcpe-server")]
struct Cli {
    /// Attach socket of the supervisor
    #[arg(short, long, global = true)]
    socket: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the server log and send commands typed on stdin
    Attach,

    /// Run one command and print its result
    Exec {
        /// Milliseconds to wait for the result; 0 prints the ticket and returns
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command text
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Print the supervisor version
    Ping,

    /// Stop the server and the supervisor
    Stop,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "mcpe=debug,mcpe_cli=debug,mcpe_core=debug"
    } else {
        "mcpe=warn,mcpe_cli=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(config::Config::default_path);
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("mcpe: {e:#}");
            std::process::exit(1);
        }
    };
    let socket = config::expand_tilde(cli.socket.as_deref().unwrap_or(&cfg.default.socket));

    let result = run(cli.command, &socket, cfg.default.timeout_ms).await;
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("mcpe: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Run a subcommand and return the process exit code.
async fn run(command: Command, socket: &std::path::Path, default_timeout_ms: u64) -> Result<i32> {
    let mut client = Client::connect(socket).await?;
    match command {
        Command::Attach => {
            commands::attach::run(&mut client, tokio::io::stdin(), tokio::io::stdout()).await?;
            Ok(0)
        }
        Command::Exec { timeout, command } => {
            let command = command.join(" ");
            let timeout_ms = timeout.unwrap_or(default_timeout_ms);
            match commands::exec::run(&mut client, &command, timeout_ms).await? {
                Outcome::Submitted(ticket) => println!("{ticket}"),
                Outcome::Result(text) => println!("{text}"),
                Outcome::Timeout => {
                    eprintln!("Timeout");
                    return Ok(1);
                }
                Outcome::Failed(message) => {
                    eprintln!("mcpe: {message}");
                    return Ok(1);
                }
            }
            Ok(0)
        }
        Command::Ping => {
            println!("{}", commands::control::ping(&mut client).await?);
            Ok(0)
        }
        Command::Stop => {
            commands::control::stop(&mut client).await?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_joins_trailing_words() {
        let cli = Cli::try_parse_from(["mcpe", "exec", "-t", "0", "say", "hello", "world"]).unwrap();
        match cli.command {
            Command::Exec { timeout, command } => {
                assert_eq!(timeout, Some(0));
                assert_eq!(command.join(" "), "say hello world");
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn exec_requires_a_command() {
        assert!(Cli::try_parse_from(["mcpe", "exec"]).is_err());
    }

    #[test]
    fn socket_flag_is_global() {
        let cli = Cli::try_parse_from(["mcpe", "ping", "--socket", "/run/mcpe.sock"]).unwrap();
        assert_eq!(cli.socket.as_deref(), Some("/run/mcpe.sock"));
    }
}
