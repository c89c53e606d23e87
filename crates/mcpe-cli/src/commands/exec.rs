//! `mcpe exec <command>`: submit one command and print its result.
//!
//! With `--timeout 0` the command is fire-and-forget and the ticket is
//! printed instead.

use crate::client::Client;
use anyhow::{bail, Result};
use mcpe_core::{Event, LineTransport, Request, Ticket};
use std::time::Duration;
use tracing::debug;

/// Extra time granted to the server to report its own timeout.
const LOCAL_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Fire-and-forget: the command was accepted under this ticket.
    Submitted(Ticket),
    /// The first output line after the command's echo.
    Result(String),
    /// The server gave up waiting.
    Timeout,
    /// The server rejected the request.
    Failed(String),
}

pub async fn run<T: LineTransport>(
    client: &mut Client<T>,
    command: &str,
    timeout_ms: u64,
) -> Result<Outcome> {
    let request = Request::Exec {
        command: command.to_string(),
        timeout_ms: (timeout_ms > 0).then_some(timeout_ms),
    };
    client.send(&request).await?;

    let deadline = Duration::from_millis(timeout_ms) + LOCAL_MARGIN;
    let outcome = match tokio::time::timeout(deadline, wait(client, timeout_ms == 0)).await {
        Ok(outcome) => outcome?,
        Err(_) => Outcome::Timeout,
    };
    client.close().await?;
    Ok(outcome)
}

async fn wait<T: LineTransport>(client: &mut Client<T>, fire_and_forget: bool) -> Result<Outcome> {
    let mut ours: Option<Ticket> = None;
    loop {
        let Some(event) = client.next_event().await? else {
            bail!("server closed the connection");
        };
        match event {
            Event::Ticket { ticket } if fire_and_forget => return Ok(Outcome::Submitted(ticket)),
            Event::Ticket { ticket } => {
                debug!(%ticket, "command accepted");
                ours = Some(ticket);
            }
            Event::Result { ticket, text } if ours == Some(ticket) => {
                return Ok(Outcome::Result(text))
            }
            Event::Error { ticket: Some(ticket), message } if ours == Some(ticket) => {
                return Ok(if message == "Timeout" {
                    Outcome::Timeout
                } else {
                    Outcome::Failed(message)
                });
            }
            Event::Error {
                ticket: None,
                message,
            } => return Ok(Outcome::Failed(message)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::pair;
    use mcpe_core::{LogEvent, Source};

    #[tokio::test]
    async fn timed_exec_prints_result_for_its_ticket() {
        let (mut client, mut server) = pair();
        let exec = tokio::spawn(async move { run(&mut client, "list", 1000).await });

        assert_eq!(
            server.request().await,
            Request::Exec {
                command: "list".into(),
                timeout_ms: Some(1000)
            }
        );
        server.emit(Event::Log(LogEvent::info(Source::Socket, "list"))).await;
        server.emit(Event::Ticket { ticket: Ticket(4) }).await;
        server
            .emit(Event::Result {
                ticket: Ticket(3),
                text: "someone else's".into(),
            })
            .await;
        server
            .emit(Event::Result {
                ticket: Ticket(4),
                text: "There are 0/10 players online".into(),
            })
            .await;

        assert_eq!(
            exec.await.unwrap().unwrap(),
            Outcome::Result("There are 0/10 players online".into())
        );
    }

    #[tokio::test]
    async fn zero_timeout_returns_the_ticket() {
        let (mut client, mut server) = pair();
        let exec = tokio::spawn(async move { run(&mut client, "say hi", 0).await });

        assert_eq!(
            server.request().await,
            Request::Exec {
                command: "say hi".into(),
                timeout_ms: None
            }
        );
        server.emit(Event::Ticket { ticket: Ticket(9) }).await;
        assert_eq!(exec.await.unwrap().unwrap(), Outcome::Submitted(Ticket(9)));
    }

    #[tokio::test]
    async fn server_timeout_is_reported() {
        let (mut client, mut server) = pair();
        let exec = tokio::spawn(async move { run(&mut client, "save hold", 50).await });
        server.request().await;
        server.emit(Event::Ticket { ticket: Ticket(2) }).await;
        server
            .emit(Event::Error {
                message: "Timeout".into(),
                ticket: Some(Ticket(2)),
            })
            .await;
        assert_eq!(exec.await.unwrap().unwrap(), Outcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_locally() {
        let (mut client, mut server) = pair();
        let exec = tokio::spawn(async move { run(&mut client, "list", 100).await });
        server.request().await;
        assert_eq!(exec.await.unwrap().unwrap(), Outcome::Timeout);
    }

    #[tokio::test]
    async fn rejection_is_a_failure() {
        let (mut client, mut server) = pair();
        let exec = tokio::spawn(async move { run(&mut client, "list", 100).await });
        server.request().await;
        server
            .emit(Event::Error {
                message: "closed: server is not running".into(),
                ticket: None,
            })
            .await;
        assert_eq!(
            exec.await.unwrap().unwrap(),
            Outcome::Failed("closed: server is not running".into())
        );
    }
}
