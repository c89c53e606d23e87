//! Unix domain socket listener for local attach clients.

use mcpe_core::{LineStream, McpeError, McpeResult};
use std::path::{Path, PathBuf};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type UnixTransport = LineStream<OwnedReadHalf, OwnedWriteHalf>;

pub fn transport(stream: UnixStream) -> UnixTransport {
    let (reader, writer) = stream.into_split();
    LineStream::new(reader, writer)
}

/// Bind `path` and yield accepted connections.
///
/// A leftover socket file from an earlier run is replaced. Any other file
/// at that path is left alone and the bind fails.
pub fn start_listener(path: &Path) -> McpeResult<mpsc::Receiver<UnixStream>> {
    remove_stale_socket(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path).map_err(|e| {
        McpeError::Transport(format!("socket bind failed at {}: {e}", path.display()))
    })?;
    info!(path = %path.display(), "socket listener started");

    let (tx, rx) = mpsc::channel::<UnixStream>(64);
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("socket connection accepted");
                    if tx.send(stream).await.is_err() {
                        break;
                    }
                }
                Err(e) => super::accept_failed("socket", &e).await,
            }
        }
    });

    Ok(rx)
}

fn remove_stale_socket(path: &Path) -> McpeResult<()> {
    use std::os::unix::fs::FileTypeExt;
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Ok(_) => Err(McpeError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Removes the socket file when dropped.
pub struct SocketGuard(pub PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!(path = %self.0.display(), error = %e, "could not remove socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpe_core::LineTransport;

    #[tokio::test]
    async fn accepts_connections_and_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/mcpe.sock");

        let first = start_listener(&path).unwrap();
        drop(first);
        // The file is still there; a restart must be able to bind again.
        let mut rx = start_listener(&path).unwrap();

        let client = UnixStream::connect(&path).await.unwrap();
        let server = rx.recv().await.unwrap();
        let mut client = transport(client);
        let mut server = transport(server);

        client.send_line("list").await.unwrap();
        assert_eq!(server.recv_line().await.unwrap().as_deref(), Some("list"));
    }

    #[tokio::test]
    async fn refuses_to_clobber_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpe.sock");
        std::fs::write(&path, "precious").unwrap();
        let err = start_listener(&path).unwrap_err();
        assert!(matches!(err, McpeError::Config(_)));
    }

    #[test]
    fn guard_removes_the_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        std::fs::write(&path, "").unwrap();
        drop(SocketGuard(path.clone()));
        assert!(!path.exists());
    }
}
