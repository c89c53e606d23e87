//! Attach protocol message types.
//!
//! Every message is one JSON object on its own line, tagged by `type`.
//! Clients send [`Request`]s; the server answers with [`Event`]s.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading byte of an output line that carries a command issued by a server mod.
pub const MOD_MARKER: char = '\u{7}';

/// Correlation identifier minted for every submitted command.
///
/// Unique within one hub lifetime; never reused while the hub is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub u32);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a submitted command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The supervisor's own terminal.
    Console,
    /// A client attached over the Unix socket.
    Socket,
    /// A client attached over WebSocket.
    #[serde(rename = "ws")]
    WebSocket,
    /// A command the server process issued itself through the mod marker.
    Mod,
    /// Output of the supervised process.
    Server,
    /// Supervisor lifecycle notices.
    System,
}

impl Source {
    /// Short label used in log lines (`label>command`).
    pub fn label(self) -> &'static str {
        match self {
            Source::Console => "console",
            Source::Socket => "socket",
            Source::WebSocket => "ws",
            Source::Mod => "mod",
            Source::Server => "server",
            Source::System => "system",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
}

/// A line broadcast to every attached session and appended to the log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: Level,
    pub source: Source,
    pub text: String,
}

impl LogEvent {
    pub fn info(source: Source, text: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            source,
            text: text.into(),
        }
    }

    pub fn warn(source: Source, text: impl Into<String>) -> Self {
        Self {
            level: Level::Warn,
            source,
            text: text.into(),
        }
    }

    /// Line written to the persistent log sink.
    ///
    /// Submitted commands render as `source>text`; process output and
    /// lifecycle notices render as their bare text.
    pub fn render(&self) -> String {
        match self.source {
            Source::Server | Source::System => self.text.clone(),
            source => format!("{}>{}", source.label(), self.text),
        }
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Submit a command. Without a timeout the server answers with a
    /// `ticket` event; with one it answers with `result` or `error`.
    Exec {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Ping,
    Stop,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log(LogEvent),
    Ticket { ticket: Ticket },
    Result { ticket: Ticket, text: String },
    /// A failed request. `ticket` is set when a timed exec gave up.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket: Option<Ticket>,
    },
    Pong { version: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_lowercase_on_the_wire() {
        let line = serde_json::to_string(&LogEvent::warn(Source::System, "Stopping...")).unwrap();
        assert_eq!(line, r#"{"level":"warn","source":"system","text":"Stopping..."}"#);
        assert!(serde_json::from_str::<Level>(r#""error""#).is_err());
    }

    #[test]
    fn render_prefixes_submitted_commands() {
        let ev = LogEvent::info(Source::Socket, "list");
        assert_eq!(ev.render(), "socket>list");
    }

    #[test]
    fn render_leaves_output_bare() {
        let ev = LogEvent::info(Source::Server, "There are 0/10 players online");
        assert_eq!(ev.render(), "There are 0/10 players online");
        assert_eq!(LogEvent::warn(Source::System, "Restarting...").render(), "Restarting...");
    }

    #[test]
    fn log_event_wire_shape() {
        let ev = Event::Log(LogEvent::info(Source::WebSocket, "say hi"));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["source"], "ws");
        assert_eq!(json["level"], "info");
        assert_eq!(json["text"], "say hi");
    }

    #[test]
    fn ticket_is_a_bare_number_on_the_wire() {
        let ev = Event::Result {
            ticket: Ticket(7),
            text: "ok".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"result","ticket":7,"text":"ok"}"#);
    }

    #[test]
    fn error_carries_ticket_only_when_known() {
        let plain = Event::Error {
            message: "bad request".into(),
            ticket: None,
        };
        assert_eq!(
            serde_json::to_string(&plain).unwrap(),
            r#"{"type":"error","message":"bad request"}"#
        );
        let timed_out: Event =
            serde_json::from_str(r#"{"type":"error","message":"Timeout","ticket":3}"#).unwrap();
        assert_eq!(
            timed_out,
            Event::Error {
                message: "Timeout".into(),
                ticket: Some(Ticket(3))
            }
        );
    }

    #[test]
    fn exec_timeout_is_optional() {
        let req: Request = serde_json::from_str(r#"{"type":"exec","command":"list"}"#).unwrap();
        assert_eq!(
            req,
            Request::Exec {
                command: "list".into(),
                timeout_ms: None
            }
        );
    }
}
