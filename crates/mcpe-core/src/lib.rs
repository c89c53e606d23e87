//! mcpe-core: Shared protocol library for the mcpe server supervisor.
//!
//! Provides the error type, command tickets, session sources, log events,
//! the newline-delimited JSON wire protocol and the abstract line transport
//! used by both the server and the attach client.

pub mod codec;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode_event, decode_request, encode_line, LineDecoder};
pub use error::{McpeError, McpeResult};
pub use messages::{Event, Level, LogEvent, Request, Source, Ticket, MOD_MARKER};
pub use transport::{LineStream, LineTransport, MAX_LINE_LEN};
