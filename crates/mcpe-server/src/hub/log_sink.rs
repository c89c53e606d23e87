//! Append-only log file mirroring everything broadcast to sessions.

use mcpe_core::{LogEvent, McpeResult};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    /// Open (or create) the log file for appending. Failure is fatal to startup.
    pub async fn open(path: &Path) -> McpeResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        debug!(path = %path.display(), "log file opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one rendered event. Errors are logged, never propagated.
    pub async fn append(&mut self, event: &LogEvent) {
        let mut line = event.render();
        line.push('\n');
        if let Err(e) = self.file.write_all(line.as_bytes()).await {
            error!(path = %self.path.display(), error = %e, "failed to write log file");
            return;
        }
        if let Err(e) = self.file.flush().await {
            error!(path = %self.path.display(), error = %e, "failed to flush log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpe_core::Source;

    #[tokio::test]
    async fn appends_rendered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("mcpe.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "old\n").unwrap();

        let mut sink = LogSink::open(&path).await.unwrap();
        sink.append(&LogEvent::info(Source::Socket, "list")).await;
        sink.append(&LogEvent::info(Source::Server, "There are 0/10 players online"))
            .await;
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "old\nsocket>list\nThere are 0/10 players online\n");
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/mcpe.log");
        let sink = LogSink::open(&path).await.unwrap();
        assert_eq!(sink.path(), path);
        assert!(path.exists());
    }
}
