//! `mcpe attach`: interactive session over the attach socket.
//!
//! Lines typed on stdin are sent as commands; everything the supervisor
//! broadcasts is printed. The broadcast of our own submissions is skipped
//! since the terminal already shows them.

use crate::client::Client;
use anyhow::{Context, Result};
use mcpe_core::{Event, LineTransport, LogEvent, Request, Source};
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Commands sent by this client whose broadcast has not come back yet.
#[derive(Debug, Default)]
pub struct OwnEchoes {
    pending: VecDeque<String>,
}

impl OwnEchoes {
    pub fn sent(&mut self, command: &str) {
        self.pending.push_back(command.trim().to_string());
    }

    /// True if `log` is one of our own submissions (consumed on match).
    pub fn is_own(&mut self, log: &LogEvent) -> bool {
        if log.source != Source::Socket {
            return false;
        }
        match self.pending.iter().position(|c| *c == log.text) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Run an attach session until stdin closes or the server hangs up.
pub async fn run<T, R, W>(client: &mut Client<T>, input: R, mut output: W) -> Result<()>
where
    T: LineTransport,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut echoes = OwnEchoes::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                echoes.sent(command);
                client
                    .send(&Request::Exec { command: command.to_string(), timeout_ms: None })
                    .await?;
            }

            event = client.next_event() => {
                let Some(event) = event? else {
                    eprintln!("mcpe: server closed the connection");
                    break;
                };
                if let Some(text) = render(event, &mut echoes) {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
            }
        }
    }

    client.close().await
}

fn render(event: Event, echoes: &mut OwnEchoes) -> Option<String> {
    match event {
        Event::Log(log) if echoes.is_own(&log) => None,
        Event::Log(log) => Some(log.render()),
        Event::Error { message, .. } => Some(format!("error: {message}")),
        Event::Pong { version } => Some(version),
        Event::Ticket { .. } | Event::Result { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::pair;
    use mcpe_core::Ticket;

    #[test]
    fn own_echo_is_skipped_once() {
        let mut echoes = OwnEchoes::default();
        echoes.sent("list");
        let own = LogEvent::info(Source::Socket, "list");
        assert!(echoes.is_own(&own));
        assert!(!echoes.is_own(&own));
        // Same text from another source is never ours.
        echoes.sent("list");
        assert!(!echoes.is_own(&LogEvent::info(Source::Console, "list")));
    }

    #[tokio::test]
    async fn forwards_input_and_prints_other_traffic() {
        let (mut client, mut server) = pair();
        let (mut stdin_w, stdin_r) = tokio::io::duplex(1024);
        let (stdout_w, mut stdout_r) = tokio::io::duplex(4096);

        let session = tokio::spawn(async move { run(&mut client, stdin_r, stdout_w).await });

        stdin_w.write_all(b"list\n").await.unwrap();
        assert_eq!(
            server.request().await,
            Request::Exec {
                command: "list".into(),
                timeout_ms: None
            }
        );
        server.emit(Event::Log(LogEvent::info(Source::Socket, "list"))).await;
        server.emit(Event::Ticket { ticket: Ticket(1) }).await;
        server
            .emit(Event::Log(LogEvent::info(Source::Server, "There are 0/10 players online")))
            .await;
        server.emit(Event::Log(LogEvent::info(Source::Console, "say hi"))).await;
        drop(server);

        session.await.unwrap().unwrap();
        let mut printed = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stdout_r, &mut printed)
            .await
            .unwrap();
        assert_eq!(printed, "There are 0/10 players online\nconsole>say hi\n");
    }
}
