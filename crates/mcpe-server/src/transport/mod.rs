//! Attached sessions over any [`LineTransport`].
//!
//! `serve` is the per-connection loop: it registers with the hub, forwards
//! broadcast events out and turns inbound lines into hub requests. The
//! concrete carriers (console, Unix socket, WebSocket) only provide the
//! transport.

pub mod unix;
pub mod websocket;

use crate::hub::{HubHandle, QUIT_COMMAND};
use mcpe_core::{
    decode_request, encode_line, Event, LineTransport, McpeError, McpeResult, Request, Source,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Pause after a failed `accept` so a persistent error (EMFILE) cannot spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Log a failed `accept` and back off before the listener retries.
pub(crate) async fn accept_failed(listener: &str, e: &std::io::Error) {
    error!(listener, error = %e, "accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// How events are written to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON event per line; inbound lines are requests.
    Json,
    /// Human-readable text; every inbound line is a command.
    Plain,
}

/// Per-session options.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub source: Source,
    /// Closing this session stops the supervisor.
    pub owner: bool,
    pub framing: Framing,
    /// Upper bound for a requested exec timeout.
    pub max_timeout: Duration,
}

/// Run one attached session until the peer disconnects or the hub drops it.
pub async fn serve<T: LineTransport>(
    hub: HubHandle,
    mut transport: T,
    options: SessionOptions,
) -> McpeResult<()> {
    let (id, events) = hub.register(options.source, options.owner).await?;
    let result = session_loop(&hub, &mut transport, events, options).await;
    hub.unregister(id).await;
    if let Err(e) = transport.close().await {
        debug!(session = %id, error = %e, "close failed");
    }
    debug!(session = %id, "session ended");
    result
}

async fn session_loop<T: LineTransport>(
    hub: &HubHandle,
    transport: &mut T,
    mut events: mpsc::Receiver<Event>,
    options: SessionOptions,
) -> McpeResult<()> {
    // Results of timed execs arrive here from their waiting tasks.
    let (reply_tx, mut replies) = mpsc::channel::<Event>(64);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("hub closed the session");
                    return Ok(());
                };
                send_event(transport, &event, options).await?;
            }

            Some(event) = replies.recv() => {
                send_event(transport, &event, options).await?;
            }

            line = transport.recv_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return Ok(()),
                    Err(McpeError::InvalidMessage(message)) => {
                        warn!(source = %options.source, %message, "inbound line rejected");
                        send_event(transport, &error_event(message), options).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if let Some(event) = handle_line(hub, &line, options, &reply_tx).await {
                    send_event(transport, &event, options).await?;
                }
            }
        }
    }
}

async fn send_event<T: LineTransport>(
    transport: &mut T,
    event: &Event,
    options: SessionOptions,
) -> McpeResult<()> {
    if let Some(line) = render(event, options)? {
        transport.send_line(&line).await?;
    }
    Ok(())
}

fn render(event: &Event, options: SessionOptions) -> McpeResult<Option<String>> {
    match options.framing {
        Framing::Json => encode_line(event).map(Some),
        Framing::Plain => Ok(match event {
            // The terminal already shows what was typed into it.
            Event::Log(log) if log.source == options.source => None,
            Event::Log(log) => Some(log.render()),
            Event::Error { message, .. } => Some(format!("error: {message}")),
            Event::Pong { version } => Some(version.clone()),
            Event::Ticket { .. } | Event::Result { .. } => None,
        }),
    }
}

/// Act on one inbound line. Returns the immediate reply, if any.
async fn handle_line(
    hub: &HubHandle,
    line: &str,
    options: SessionOptions,
    replies: &mpsc::Sender<Event>,
) -> Option<Event> {
    let request = match options.framing {
        Framing::Plain => {
            let command = line.trim();
            if command.is_empty() {
                return None;
            }
            Request::Exec {
                command: command.to_string(),
                timeout_ms: None,
            }
        }
        Framing::Json => match decode_request(line) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(e) => {
                warn!(source = %options.source, error = %e, "bad request");
                return Some(error_event(e.to_string()));
            }
        },
    };

    match request {
        Request::Exec {
            command,
            timeout_ms,
        } => {
            let ticket = match hub.submit(options.source, command).await {
                Ok(ticket) => ticket,
                Err(e) => return Some(error_event(e.to_string())),
            };
            if let Some(ms) = timeout_ms {
                let timeout = Duration::from_millis(ms).min(options.max_timeout);
                let hub = hub.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let event = match hub.await_result(ticket, timeout).await {
                        Ok(text) => Event::Result { ticket, text },
                        Err(e) => Event::Error {
                            message: e.to_string(),
                            ticket: Some(ticket),
                        },
                    };
                    let _ = replies.send(event).await;
                });
            }
            Some(Event::Ticket { ticket })
        }
        Request::Ping => Some(match hub.ping().await {
            Ok(version) => Event::Pong { version },
            Err(e) => error_event(e.to_string()),
        }),
        Request::Stop => match hub.submit(options.source, QUIT_COMMAND).await {
            Ok(_) => None,
            Err(e) => Some(error_event(e.to_string())),
        },
    }
}

fn error_event(message: String) -> Event {
    Event::Error {
        message,
        ticket: None,
    }
}
