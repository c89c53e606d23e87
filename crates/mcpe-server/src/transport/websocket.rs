//! WebSocket listener using tokio-tungstenite.
//!
//! Clients connect to `ws://<addr>/<token>`; any other path is refused
//! during the handshake. Each text frame carries one request line and each
//! event goes out as one text frame.

use futures_util::{SinkExt, StreamExt};
use mcpe_core::{LineTransport, McpeError, McpeResult, MAX_LINE_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Frame and message limits: one request line per message.
fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_LINE_LEN),
        max_frame_size: Some(MAX_LINE_LEN),
        ..WebSocketConfig::default()
    }
}

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    token: &str,
) -> McpeResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| McpeError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;
    info!(addr = %local_addr, "WebSocket listener started");

    let expected: Arc<str> = format!("/{token}").into();
    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let expected = expected.clone();
                    tokio::spawn(async move {
                        let check = move |req: &Request, resp: Response| {
                            if req.uri().path() == &*expected {
                                Ok(resp)
                            } else {
                                let mut refused = ErrorResponse::new(Some("not found".into()));
                                *refused.status_mut() = StatusCode::NOT_FOUND;
                                Err(refused)
                            }
                        };
                        match tokio_tungstenite::accept_hdr_async_with_config(
                            stream,
                            check,
                            Some(ws_config()),
                        )
                        .await
                        {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => super::accept_failed("websocket", &e).await,
            }
        }
    });

    Ok((local_addr, rx))
}

/// [`LineTransport`] over an accepted WebSocket.
pub struct WsTransport {
    ws: WebSocketStream<TcpStream>,
}

impl WsTransport {
    pub fn new(conn: WebSocketConnection) -> Self {
        Self { ws: conn.ws_stream }
    }
}

impl LineTransport for WsTransport {
    async fn recv_line(&mut self) -> McpeResult<Option<String>> {
        loop {
            match self.ws.next().await {
                // A message is one line.
                Some(Ok(Message::Text(text))) => return Ok(Some(text.replace(['\r', '\n'], " "))),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(McpeError::Transport(format!("WS recv failed: {e}")));
                }
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> McpeResult<()> {
        self.ws
            .send(Message::Text(line.to_string().into()))
            .await
            .map_err(|e| McpeError::Transport(format!("WS send failed: {e}")))
    }

    async fn close(&mut self) -> McpeResult<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| McpeError::Transport(format!("WS close failed: {e}")))
    }
}
