//! Abstract line transport for the attach protocol.
//!
//! The hub only ever sees [`LineTransport`]; the Unix socket, console and
//! WebSocket carriers are variants behind it, chosen at startup.

use crate::error::{McpeError, McpeResult};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest request line the server accepts from a peer, in bytes.
pub const MAX_LINE_LEN: usize = 4096;

/// A bidirectional, line-oriented session channel.
pub trait LineTransport: Send {
    /// Receive the next inbound line. `Ok(None)` means the peer disconnected.
    ///
    /// An over-long line is consumed and reported as
    /// [`McpeError::InvalidMessage`]; the stream stays usable afterwards.
    ///
    /// Implementations must be cancel safe: the connection loop races this
    /// against outbound traffic in `tokio::select!`.
    fn recv_line(&mut self) -> impl Future<Output = McpeResult<Option<String>>> + Send;

    /// Send one line; the newline is added by the transport.
    fn send_line(&mut self, line: &str) -> impl Future<Output = McpeResult<()>> + Send;

    /// Close the outbound side.
    fn close(&mut self) -> impl Future<Output = McpeResult<()>> + Send;
}

/// [`LineTransport`] over any async reader/writer pair (socket halves, stdio).
///
/// Lines are capped (by default at [`MAX_LINE_LEN`] bytes) and decoded
/// lossily, so a misbehaving peer can neither grow the buffer without bound
/// nor end the session with a stray non-UTF-8 byte.
pub struct LineStream<R, W> {
    reader: BufReader<R>,
    writer: W,
    max_len: usize,
    /// Bytes of the line being assembled; survives a cancelled read.
    pending: Vec<u8>,
    /// Bytes of the current line dropped past the cap.
    overflow: usize,
}

impl<R, W> LineStream<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_limit(reader, writer, MAX_LINE_LEN)
    }

    /// Like [`LineStream::new`] with a different inbound line cap.
    pub fn with_limit(reader: R, writer: W, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            max_len,
            pending: Vec::new(),
            overflow: 0,
        }
    }

    fn finish_line(&mut self) -> McpeResult<String> {
        let overflow = std::mem::take(&mut self.overflow);
        let mut bytes = std::mem::take(&mut self.pending);
        if overflow > 0 {
            return Err(McpeError::InvalidMessage(format!(
                "line too long: {} bytes (max {})",
                bytes.len() + overflow,
                self.max_len
            )));
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<R, W> LineTransport for LineStream<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv_line(&mut self) -> McpeResult<Option<String>> {
        loop {
            // `fill_buf` is cancel safe and nothing is consumed before it
            // returns, so a cancelled call loses no input.
            let available = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| McpeError::Transport(format!("read failed: {e}")))?;
            if available.is_empty() {
                if self.pending.is_empty() && self.overflow == 0 {
                    return Ok(None);
                }
                return self.finish_line().map(Some);
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let chunk = &available[..newline.unwrap_or(available.len())];
            let room = self.max_len.saturating_sub(self.pending.len());
            let kept = chunk.len().min(room);
            self.pending.extend_from_slice(&chunk[..kept]);
            self.overflow += chunk.len() - kept;
            let used = newline.map_or(available.len(), |i| i + 1);
            self.reader.consume(used);

            if newline.is_some() {
                return self.finish_line().map(Some);
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> McpeResult<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer
            .write_all(&buf)
            .await
            .map_err(|e| McpeError::Transport(format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| McpeError::Transport(format!("flush failed: {e}")))
    }

    async fn close(&mut self) -> McpeResult<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| McpeError::Transport(format!("shutdown failed: {e}")))
    }
}
