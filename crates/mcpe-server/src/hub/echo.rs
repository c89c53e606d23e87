//! Echo suppression and result attribution for process output.
//!
//! The PTY reflects every line written to the server back as output. Each
//! submission is recorded here before it is written; the matching output
//! line is swallowed and the ticket then waits for the next genuine line,
//! which becomes its result.
//!
//! Echoes are matched to the ticket whose text they reproduce, so commands
//! from different sessions cannot steal each other's echo. A line that
//! matches no in-flight text still consumes the oldest expectation.

use mcpe_core::{Ticket, MOD_MARKER};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Inflight {
    ticket: Ticket,
    text: String,
}

/// What a single output line turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Classified {
    /// The reflection of a submitted command; not to be redelivered.
    Echo { ticket: Ticket },
    /// A command the server issued through the mod marker.
    ModCommand(String),
    /// A mod marker with no command behind it.
    EmptyMod,
    /// Genuine output, possibly the result of an earlier submission.
    Output {
        line: String,
        result_for: Option<Ticket>,
    },
}

#[derive(Debug)]
pub struct EchoFilter {
    awaiting_echo: VecDeque<Inflight>,
    awaiting_result: VecDeque<(Ticket, Instant)>,
    result_window: Duration,
}

impl EchoFilter {
    pub fn new(result_window: Duration) -> Self {
        Self {
            awaiting_echo: VecDeque::new(),
            awaiting_result: VecDeque::new(),
            result_window,
        }
    }

    /// Record a submission. Must happen before the text is written.
    pub fn expect_echo(&mut self, ticket: Ticket, text: &str) {
        self.awaiting_echo.push_back(Inflight {
            ticket,
            text: text.trim().to_string(),
        });
    }

    /// Forget a submission that never reached the process.
    pub fn cancel(&mut self, ticket: Ticket) {
        self.awaiting_echo.retain(|f| f.ticket != ticket);
    }

    /// Echo lines still expected (the suppression counter).
    pub fn outstanding(&self) -> usize {
        self.awaiting_echo.len()
    }

    /// Tickets whose echo was seen and which still wait for a result line.
    #[cfg(test)]
    pub fn awaiting_results(&self) -> usize {
        self.awaiting_result.len()
    }

    /// Drop all expectations; used when the process is replaced.
    pub fn reset(&mut self) {
        self.awaiting_echo.clear();
        self.awaiting_result.clear();
    }

    pub fn classify(&mut self, line: String, now: Instant) -> Classified {
        if let Some(rest) = line.strip_prefix(MOD_MARKER) {
            // Marker in front, one delimiter character at the end.
            let mut command = rest.to_string();
            command.pop();
            if command.trim().is_empty() {
                return Classified::EmptyMod;
            }
            return Classified::ModCommand(command);
        }

        if !self.awaiting_echo.is_empty() {
            let trimmed = line.trim();
            let index = self
                .awaiting_echo
                .iter()
                .position(|f| f.text == trimmed)
                .unwrap_or(0);
            if let Some(inflight) = self.awaiting_echo.remove(index) {
                self.awaiting_result.push_back((inflight.ticket, now));
                return Classified::Echo {
                    ticket: inflight.ticket,
                };
            }
        }

        while let Some(&(_, seen)) = self.awaiting_result.front() {
            if now.saturating_duration_since(seen) > self.result_window {
                self.awaiting_result.pop_front();
            } else {
                break;
            }
        }
        let result_for = self.awaiting_result.pop_front().map(|(ticket, _)| ticket);
        Classified::Output { line, result_for }
    }
}
