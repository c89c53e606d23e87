//! Connection to a running supervisor.

use anyhow::{Context, Result};
use mcpe_core::{decode_event, encode_line, Event, LineStream, LineTransport, Request};
use std::path::Path;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

/// Server events wrap whole output lines, which may run long.
const MAX_EVENT_LEN: usize = 1 << 20;

pub struct Client<T> {
    transport: T,
}

impl Client<LineStream<OwnedReadHalf, OwnedWriteHalf>> {
    /// Connect to the supervisor's attach socket.
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .with_context(|| format!("failed to connect to {}", socket.display()))?;
        debug!(socket = %socket.display(), "connected");
        let (reader, writer) = stream.into_split();
        Ok(Self::new(LineStream::with_limit(reader, writer, MAX_EVENT_LEN)))
    }
}

impl<T: LineTransport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let line = encode_line(request)?;
        self.transport
            .send_line(&line)
            .await
            .context("failed to send request")
    }

    /// Next event from the server; `None` once it hangs up.
    ///
    /// Cancel safe.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        match self.transport.recv_line().await? {
            Some(line) => Ok(Some(decode_event(&line)?)),
            None => Ok(None),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        Ok(self.transport.close().await?)
    }
}

#[cfg(test)]
pub mod test_support {
    //! A client wired to an in-memory fake server.

    use super::*;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    pub type TestClient = Client<LineStream<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>;

    /// The server's end: reads requests, writes events.
    pub struct FakeServer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        pub async fn request(&mut self) -> Request {
            let line = self.lines.next_line().await.unwrap().unwrap();
            mcpe_core::decode_request(&line).unwrap().unwrap()
        }

        pub async fn emit(&mut self, event: Event) {
            let mut line = encode_line(&event).unwrap();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }
    }

    pub fn pair() -> (TestClient, FakeServer) {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (cr, cw) = tokio::io::split(client_end);
        let (sr, sw) = tokio::io::split(server_end);
        (
            Client::new(LineStream::new(cr, cw)),
            FakeServer {
                lines: BufReader::new(sr).lines(),
                writer: sw,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::pair;
    use super::*;
    use mcpe_core::Ticket;

    #[tokio::test]
    async fn sends_requests_and_decodes_events() {
        let (mut client, mut server) = pair();
        client.send(&Request::Ping).await.unwrap();
        assert_eq!(server.request().await, Request::Ping);

        server.emit(Event::Ticket { ticket: Ticket(5) }).await;
        assert_eq!(
            client.next_event().await.unwrap(),
            Some(Event::Ticket { ticket: Ticket(5) })
        );

        drop(server);
        assert_eq!(client.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn connect_reports_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = Client::connect(&dir.path().join("absent.sock"))
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("absent.sock"));
    }
}
