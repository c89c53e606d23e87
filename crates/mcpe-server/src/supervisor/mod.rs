//! Process supervision: spawning the game server and tearing it down.

pub mod prepare;
pub mod pty;

pub use prepare::prepare_data_dir;
pub use pty::PtySpawner;

use mcpe_core::McpeResult;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Future returned by a [`Stopper`]; resolves once the child has been reaped.
pub type StopFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One-shot teardown for a running process.
pub struct Stopper(Box<dyn FnOnce() -> StopFuture + Send>);

impl Stopper {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> StopFuture + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Interrupt the process and wait until it has been reaped.
    pub async fn stop(self) {
        (self.0)().await
    }
}

/// A live child process: its command sink, its output lines and its stopper.
///
/// Exactly one exists per server pass.
pub struct ProcessHandle {
    /// Each string is written to the process followed by a newline.
    pub input: mpsc::Sender<String>,
    /// Output lines in arrival order. Closes when the process exits.
    pub output: mpsc::Receiver<String>,
    pub stopper: Stopper,
}

/// Something that can start the supervised process.
pub trait Spawn: Send {
    /// Spawn a fresh process. Failure here is fatal; callers do not retry.
    fn spawn(&mut self) -> McpeResult<ProcessHandle>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory process used by hub and lifecycle tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// The test's end of a fake process.
    pub struct FakeProcess {
        /// Lines the hub wrote to the process.
        pub stdin: mpsc::Receiver<String>,
        stdout: Arc<Mutex<Option<mpsc::Sender<String>>>>,
        stopped: Arc<AtomicUsize>,
    }

    impl FakeProcess {
        /// Make the process "print" a line. Returns false once it has been stopped.
        pub async fn print(&self, line: &str) -> bool {
            let tx = self.stdout.lock().unwrap().clone();
            match tx {
                Some(tx) => tx.send(line.to_string()).await.is_ok(),
                None => false,
            }
        }

        /// Simulate the process exiting on its own.
        pub fn exit(&self) {
            self.stdout.lock().unwrap().take();
        }

        pub fn stop_count(&self) -> usize {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    pub fn fake_process() -> (ProcessHandle, FakeProcess) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        let stdout = Arc::new(Mutex::new(Some(out_tx)));
        let stopped = Arc::new(AtomicUsize::new(0));
        let (flag, hangup) = (stopped.clone(), stdout.clone());
        let handle = ProcessHandle {
            input: in_tx,
            output: out_rx,
            stopper: Stopper::new(move || {
                Box::pin(async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    hangup.lock().unwrap().take();
                })
            }),
        };
        (
            handle,
            FakeProcess {
                stdin: in_rx,
                stdout,
                stopped,
            },
        )
    }

    /// Hands out fake processes and passes the test's ends through a channel.
    pub struct FakeSpawner {
        pub spawned: mpsc::UnboundedSender<FakeProcess>,
        pub fail: bool,
    }

    impl FakeSpawner {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeProcess>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    spawned: tx,
                    fail: false,
                },
                rx,
            )
        }
    }

    impl Spawn for FakeSpawner {
        fn spawn(&mut self) -> McpeResult<ProcessHandle> {
            if self.fail {
                return Err(mcpe_core::McpeError::Spawn("no such binary".into()));
            }
            let (handle, process) = fake_process();
            let _ = self.spawned.send(process);
            Ok(handle)
        }
    }
}
