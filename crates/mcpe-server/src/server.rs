//! Attach server: accepts socket and WebSocket connections and runs a
//! session for each.

use crate::hub::HubHandle;
use crate::transport::websocket::{WebSocketConnection, WsTransport};
use crate::transport::{serve, unix, Framing, SessionOptions};
use mcpe_core::Source;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct AttachServer {
    hub: HubHandle,
    max_timeout: Duration,
    socket: Option<mpsc::Receiver<UnixStream>>,
    websocket: Option<mpsc::Receiver<WebSocketConnection>>,
}

impl AttachServer {
    pub fn new(
        hub: HubHandle,
        max_timeout: Duration,
        socket: Option<mpsc::Receiver<UnixStream>>,
        websocket: Option<mpsc::Receiver<WebSocketConnection>>,
    ) -> Self {
        Self {
            hub,
            max_timeout,
            socket,
            websocket,
        }
    }

    fn options(&self, source: Source) -> SessionOptions {
        SessionOptions {
            source,
            owner: false,
            framing: Framing::Json,
            max_timeout: self.max_timeout,
        }
    }

    /// Accept connections from every configured listener until all close.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(stream) = next(&mut self.socket) => {
                    let hub = self.hub.clone();
                    let options = self.options(Source::Socket);
                    tokio::spawn(async move {
                        if let Err(e) = serve(hub, unix::transport(stream), options).await {
                            warn!(error = %e, "socket session error");
                        }
                    });
                }
                Some(conn) = next(&mut self.websocket) => {
                    let hub = self.hub.clone();
                    let options = self.options(Source::WebSocket);
                    let remote = conn.remote_addr;
                    tokio::spawn(async move {
                        if let Err(e) = serve(hub, WsTransport::new(conn), options).await {
                            warn!(%remote, error = %e, "WebSocket session error");
                        }
                        debug!(%remote, "WebSocket session closed");
                    });
                }
                else => {
                    info!("all listeners closed");
                    break;
                }
            }
        }
    }
}

async fn next<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use mcpe_core::{decode_event, Event, LineTransport};

    #[tokio::test]
    async fn socket_clients_get_sessions() {
        let (control_tx, _control) = mpsc::unbounded_channel();
        let (hub, _task) = Hub::spawn(HubConfig::default(), None, control_tx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpe.sock");
        let rx = unix::start_listener(&path).unwrap();
        let server = AttachServer::new(hub.clone(), Duration::from_secs(1), Some(rx), None);
        tokio::spawn(server.run());

        let mut client = unix::transport(UnixStream::connect(&path).await.unwrap());
        client.send_line(r#"{"type":"ping"}"#).await.unwrap();
        let line = client.recv_line().await.unwrap().unwrap();
        assert!(matches!(decode_event(&line).unwrap(), Event::Pong { .. }));
        assert_eq!(hub.stats().await.unwrap().sessions, 1);
    }

    #[tokio::test]
    async fn run_returns_without_listeners() {
        let (control_tx, _control) = mpsc::unbounded_channel();
        let (hub, _task) = Hub::spawn(HubConfig::default(), None, control_tx);
        AttachServer::new(hub, Duration::from_secs(1), None, None)
            .run()
            .await;
    }
}
