//! PTY-backed game server process using portable-pty.
//!
//! The server binary runs on the slave side of a pseudo-terminal so it
//! behaves as it would on an interactive console (including echoing input).
//! Reads and writes on the master are blocking and live on dedicated
//! blocking tasks; the async side only sees channels. The writer belongs to
//! its task alone, so a child that stops reading can stall input but never
//! teardown.

use super::{ProcessHandle, Spawn, StopFuture, Stopper};
use mcpe_core::{LineDecoder, McpeError, McpeResult};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Bounded queue between the hub and the PTY writer.
const INPUT_QUEUE: usize = 256;

/// Bounded queue between the PTY reader and the output forwarder.
const OUTPUT_QUEUE: usize = 1024;

/// Spawns `<bin>/<program>` in `data` under a fresh PTY.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    pub bin_dir: PathBuf,
    pub program: String,
    pub data_dir: PathBuf,
    /// How long to wait after the interrupt before killing the child.
    pub grace: Duration,
}

impl PtySpawner {
    pub fn new(bin_dir: PathBuf, program: String, data_dir: PathBuf, grace: Duration) -> Self {
        Self {
            bin_dir,
            program,
            data_dir,
            grace,
        }
    }

    /// The child runs in `data`, so every path handed to it is absolute.
    fn command(&self) -> McpeResult<CommandBuilder> {
        let bin_dir = std::path::absolute(&self.bin_dir)?;
        let data_dir = std::path::absolute(&self.data_dir)?;
        let path = bin_dir.join(&self.program);
        if !path.is_file() {
            return Err(McpeError::Spawn(format!(
                "server binary not found: {}",
                path.display()
            )));
        }
        let mut cmd = CommandBuilder::new(&path);
        cmd.cwd(&data_dir);
        cmd.env("LD_LIBRARY_PATH", &bin_dir);
        Ok(cmd)
    }
}

impl Spawn for PtySpawner {
    fn spawn(&mut self) -> McpeResult<ProcessHandle> {
        let cmd = self.command()?;
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 250,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| McpeError::Spawn(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| McpeError::Spawn(format!("failed to spawn {}: {e}", self.program)))?;
        // Only the child may hold the slave, otherwise the reader never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        info!(pid, program = %self.program, data = %self.data_dir.display(), "server process spawned");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| McpeError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| McpeError::Spawn(format!("failed to take PTY writer: {e}")))?;

        let (in_tx, in_rx) = mpsc::channel::<String>(INPUT_QUEUE);
        let (out_tx, out_rx) = mpsc::channel::<String>(OUTPUT_QUEUE);

        tokio::task::spawn_blocking(move || read_lines(reader, out_tx));
        tokio::task::spawn_blocking(move || write_lines(writer, in_rx));

        let master = pair.master;
        let grace = self.grace;
        let stopper = Stopper::new(move || -> StopFuture {
            Box::pin(async move {
                let reaped = tokio::task::spawn_blocking(move || {
                    interrupt(pid);
                    reap(child, grace);
                });
                if let Err(e) = reaped.await {
                    warn!(error = %e, "reaper task failed");
                }
                // Closing the master last hangs up anything still attached.
                drop(master);
            })
        });

        Ok(ProcessHandle {
            input: in_tx,
            output: out_rx,
            stopper,
        })
    }
}

/// Pump PTY output into `tx` one line at a time until EOF or error.
fn read_lines(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<String>) {
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in decoder.feed(&buf[..n]) {
                    if tx.blocking_send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                // Linux reports EIO once the slave side is gone.
                debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }
    debug!(leftover = decoder.pending(), "PTY reader finished");
}

/// Write each queued command followed by a newline, in order.
fn write_lines(mut writer: Box<dyn Write + Send>, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.blocking_recv() {
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
        if let Err(e) = result {
            warn!(error = %e, "PTY write failed");
            return;
        }
    }
}

/// Send SIGINT to the child itself, whatever its terminal settings.
fn interrupt(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        debug!("no pid to interrupt");
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        debug!(pid, error = %e, "could not deliver interrupt");
    }
}

/// Wait for the child to exit, killing it once `grace` has elapsed.
fn reap(mut child: Box<dyn Child + Send + Sync>, grace: Duration) {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(code = status.exit_code(), "server process exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "try_wait failed");
                break;
            }
        }
    }

    warn!(grace_ms = grace.as_millis() as u64, "server ignored interrupt, killing");
    if let Err(e) = child.kill() {
        warn!(error = %e, "kill failed");
    }
    match child.wait() {
        Ok(status) => info!(code = status.exit_code(), "server process reaped"),
        Err(e) => warn!(error = %e, "wait failed"),
    }
}
