//! Restart/quit control loop.
//!
//! ```text
//! Running ──:restart──▶ Restarting ──respawn──▶ Running
//!    │
//!    ├──:quit / signal / owner gone──▶ Quitting ──▶ Stopped
//!    └──process exit──▶ Restarting or Quitting (restart_on_exit)
//! ```
//!
//! Sessions and tickets live in the hub and survive a restart; only the
//! process and its echo bookkeeping are replaced.

use crate::hub::HubHandle;
use crate::supervisor::{Spawn, Stopper};
use mcpe_core::{LogEvent, McpeResult, Source};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long trailing output may take to drain after the process is reaped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Restart,
    Quit,
    /// Output of the pass with this generation reached EOF.
    Exited { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Restarting,
    Quitting,
    Stopped,
}

impl State {
    /// Next state after `transition`. Only `Running` reacts; everything
    /// arriving during teardown is ignored.
    pub fn on(self, transition: Transition, restart_on_exit: bool) -> State {
        match (self, transition) {
            (State::Running, Transition::Restart) => State::Restarting,
            (State::Running, Transition::Quit) => State::Quitting,
            (State::Running, Transition::Exited { .. }) if restart_on_exit => State::Restarting,
            (State::Running, Transition::Exited { .. }) => State::Quitting,
            (state, _) => state,
        }
    }
}

/// One spawned process and the task forwarding its output to the hub.
struct Pass {
    stopper: Stopper,
    forwarder: JoinHandle<()>,
}

pub struct Controller<S> {
    spawner: S,
    hub: HubHandle,
    control: mpsc::UnboundedReceiver<Transition>,
    control_tx: mpsc::UnboundedSender<Transition>,
    restart_on_exit: bool,
    generation: u64,
    restarts: u32,
}

impl<S: Spawn> Controller<S> {
    /// `control_tx` must be the sender the hub reports reserved commands on.
    pub fn new(
        spawner: S,
        hub: HubHandle,
        control: mpsc::UnboundedReceiver<Transition>,
        control_tx: mpsc::UnboundedSender<Transition>,
        restart_on_exit: bool,
    ) -> Self {
        Self {
            spawner,
            hub,
            control,
            control_tx,
            restart_on_exit,
            generation: 0,
            restarts: 0,
        }
    }

    /// Drive the state machine until `Stopped`. Returns the number of
    /// restarts performed. A failed spawn is fatal.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> McpeResult<u32> {
        tokio::pin!(shutdown);
        let mut signalled = false;

        self.hub.publish(LogEvent::info(Source::System, "Starting...")).await;
        let mut pass = Some(self.launch().await?);
        let mut state = State::Running;

        loop {
            state = match state {
                State::Running => {
                    let transition = tokio::select! {
                        t = self.control.recv() => t.unwrap_or(Transition::Quit),
                        _ = &mut shutdown, if !signalled => {
                            signalled = true;
                            info!("received shutdown signal");
                            Transition::Quit
                        }
                    };
                    if let Transition::Exited { generation } = transition {
                        if generation != self.generation {
                            debug!(generation, "ignoring exit of a previous pass");
                            continue;
                        }
                        warn!(restart = self.restart_on_exit, "server process exited");
                    }
                    state.on(transition, self.restart_on_exit)
                }
                State::Restarting => {
                    self.hub
                        .publish(LogEvent::warn(Source::System, "Restarting..."))
                        .await;
                    if let Some(old) = pass.take() {
                        self.teardown(old).await;
                    }
                    pass = Some(self.launch().await?);
                    self.restarts += 1;
                    if let Ok(stats) = self.hub.stats().await {
                        info!(
                            restarts = self.restarts,
                            sessions = stats.sessions,
                            tickets = stats.tickets,
                            "server restarted"
                        );
                    }
                    State::Running
                }
                State::Quitting => {
                    self.hub
                        .publish(LogEvent::info(Source::System, "Stopping..."))
                        .await;
                    if let Some(old) = pass.take() {
                        self.teardown(old).await;
                    }
                    self.hub.shutdown().await;
                    State::Stopped
                }
                State::Stopped => break,
            };
        }

        info!(restarts = self.restarts, "supervisor stopped");
        Ok(self.restarts)
    }

    async fn launch(&mut self) -> McpeResult<Pass> {
        let handle = self.spawner.spawn()?;
        self.generation += 1;
        self.hub.attach(handle.input).await?;

        let hub = self.hub.clone();
        let control = self.control_tx.clone();
        let generation = self.generation;
        let mut output = handle.output;
        let forwarder = tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                if hub.output(line).await.is_err() {
                    break;
                }
            }
            let _ = control.send(Transition::Exited { generation });
        });

        Ok(Pass {
            stopper: handle.stopper,
            forwarder,
        })
    }

    async fn teardown(&mut self, pass: Pass) {
        pass.stopper.stop().await;
        let mut forwarder = pass.forwarder;
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut forwarder).await.is_err() {
            warn!("output still open after stop, dropping the rest");
            forwarder.abort();
        }
        self.hub.detach().await;
    }
}
