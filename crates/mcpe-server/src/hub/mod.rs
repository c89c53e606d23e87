//! Attach hub: the single control loop that owns all shared state.
//!
//! Sessions, the ticket table, the echo filter, the process input sink and
//! the log file all live inside [`Hub`] and are only touched from its loop.
//! Everything else talks to it through a cloneable [`HubHandle`].

pub mod correlation;
pub mod echo;
pub mod log_sink;
pub mod session;

pub use log_sink::LogSink;
pub use session::SessionId;

use crate::lifecycle::Transition;
use correlation::{Correlator, Delivery};
use echo::{Classified, EchoFilter};
use mcpe_core::{Event, LogEvent, McpeError, McpeResult, Source, Ticket};
use session::SessionRegistry;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reserved command that respawns the server process.
pub const RESTART_COMMAND: &str = ":restart";
/// Reserved command that stops the supervisor.
pub const QUIT_COMMAND: &str = ":quit";

const HUB_QUEUE: usize = 1024;
const GC_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue size per session.
    pub queue_capacity: usize,
    /// How long after its echo a ticket may still claim an output line.
    pub result_window: Duration,
    /// How long unclaimed and timed-out tickets are remembered.
    pub result_cache: Duration,
    /// Reported by `ping`.
    pub version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            result_window: Duration::from_secs(5),
            result_cache: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub sessions: usize,
    /// Echo lines still expected from the process.
    pub outstanding_echoes: usize,
    pub tickets: usize,
}

enum HubEvent {
    Register {
        source: Source,
        owner: bool,
        outbound: mpsc::Sender<Event>,
        reply: oneshot::Sender<SessionId>,
    },
    Unregister(SessionId),
    Submit {
        source: Source,
        text: String,
        reply: oneshot::Sender<McpeResult<Ticket>>,
    },
    Watch {
        ticket: Ticket,
        waiter: oneshot::Sender<String>,
    },
    Abandon(Ticket),
    Output(String),
    Publish(LogEvent),
    Attach(mpsc::Sender<String>),
    Detach,
    Ping(oneshot::Sender<String>),
    Stats(oneshot::Sender<HubStats>),
    Shutdown,
}

pub struct Hub {
    rx: mpsc::Receiver<HubEvent>,
    sessions: SessionRegistry,
    tickets: Correlator,
    echo: EchoFilter,
    /// Input of the running process, absent between passes.
    input: Option<mpsc::Sender<String>>,
    sink: Option<LogSink>,
    control: mpsc::UnboundedSender<Transition>,
    version: String,
}

impl Hub {
    /// Start the hub loop. Reserved commands and loss of the owning session
    /// are reported on `control`.
    pub fn spawn(
        config: HubConfig,
        sink: Option<LogSink>,
        control: mpsc::UnboundedSender<Transition>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(HUB_QUEUE);
        let hub = Hub {
            rx,
            sessions: SessionRegistry::new(),
            tickets: Correlator::new(config.result_cache),
            echo: EchoFilter::new(config.result_window),
            input: None,
            sink,
            control,
            version: config.version,
        };
        let task = tokio::spawn(hub.run());
        (
            HubHandle {
                tx,
                queue_capacity: config.queue_capacity,
            },
            task,
        )
    }

    async fn run(mut self) {
        let mut gc = tokio::time::interval(GC_INTERVAL);
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(HubEvent::Shutdown) | None => break,
                        Some(event) => self.handle(event).await,
                    }
                }
                _ = gc.tick() => {
                    self.tickets.gc(Instant::now());
                }
            }
        }
        info!(sessions = self.sessions.len(), "hub stopped");
    }

    async fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register {
                source,
                owner,
                outbound,
                reply,
            } => {
                let id = self.sessions.register(source, owner, outbound);
                let _ = reply.send(id);
            }
            HubEvent::Unregister(id) => {
                if let Some(session) = self.sessions.unregister(id) {
                    if session.owner {
                        self.transition(Transition::Quit);
                    }
                }
            }
            HubEvent::Submit {
                source,
                text,
                reply,
            } => {
                let result = self.submit(source, &text).await;
                if let Err(e) = &result {
                    warn!(%source, error = %e, "submission rejected");
                }
                let _ = reply.send(result);
            }
            HubEvent::Watch { ticket, waiter } => self.tickets.watch(ticket, waiter),
            HubEvent::Abandon(ticket) => self.tickets.abandon(ticket, Instant::now()),
            HubEvent::Output(line) => self.output(line).await,
            HubEvent::Publish(event) => self.publish(event).await,
            HubEvent::Attach(input) => {
                self.echo.reset();
                self.input = Some(input);
                debug!("process input attached");
            }
            HubEvent::Detach => {
                self.echo.reset();
                self.input = None;
                debug!("process input detached");
            }
            HubEvent::Ping(reply) => {
                let _ = reply.send(self.version.clone());
            }
            HubEvent::Stats(reply) => {
                let _ = reply.send(HubStats {
                    sessions: self.sessions.len(),
                    outstanding_echoes: self.echo.outstanding(),
                    tickets: self.tickets.len(),
                });
            }
            HubEvent::Shutdown => {}
        }
    }

    /// Mint a ticket for `text` and hand it to the process, or intercept it
    /// if it is a reserved command.
    async fn submit(&mut self, source: Source, text: &str) -> McpeResult<Ticket> {
        let text = text.trim();
        let now = Instant::now();

        if let Some(transition) = reserved(text) {
            let ticket = self.tickets.mint(now);
            self.publish(LogEvent::info(source, text)).await;
            self.transition(transition);
            return Ok(ticket);
        }

        let Some(input) = self.input.as_ref() else {
            return Err(McpeError::Closed("server is not running".into()));
        };
        let ticket = self.tickets.mint(now);
        // Record before writing: the echo can arrive before try_send returns.
        self.echo.expect_echo(ticket, text);
        if let Err(e) = input.try_send(text.to_string()) {
            self.echo.cancel(ticket);
            self.tickets.abandon(ticket, now);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    McpeError::Transport("server input queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    McpeError::Closed("server is not running".into())
                }
            });
        }
        debug!(%ticket, %source, command = text, "submitted");
        self.publish(LogEvent::info(source, text)).await;
        Ok(ticket)
    }

    async fn output(&mut self, line: String) {
        match self.echo.classify(line, Instant::now()) {
            Classified::Echo { ticket } => debug!(%ticket, "echo suppressed"),
            Classified::EmptyMod => debug!("empty mod command ignored"),
            Classified::ModCommand(command) => {
                if let Err(e) = self.submit(Source::Mod, &command).await {
                    warn!(error = %e, "mod command rejected");
                }
            }
            Classified::Output { line, result_for } => {
                if let Some(ticket) = result_for {
                    if self.tickets.deliver(ticket, line.clone(), Instant::now())
                        == Delivery::Dropped
                    {
                        debug!(%ticket, "result discarded");
                    }
                }
                self.publish(LogEvent::info(Source::Server, line)).await;
            }
        }
    }

    async fn publish(&mut self, event: LogEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink.append(&event).await;
        }
        let dropped = self.sessions.broadcast(&Event::Log(event));
        if dropped.owner_lost {
            self.transition(Transition::Quit);
        }
    }

    fn transition(&self, transition: Transition) {
        if self.control.send(transition).is_err() {
            debug!(?transition, "control loop gone");
        }
    }
}

fn reserved(text: &str) -> Option<Transition> {
    if text.starts_with(RESTART_COMMAND) {
        Some(Transition::Restart)
    } else if text.starts_with(QUIT_COMMAND) {
        Some(Transition::Quit)
    } else {
        None
    }
}

/// Cloneable entry point into the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    queue_capacity: usize,
}

impl HubHandle {
    async fn send(&self, event: HubEvent) -> McpeResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| McpeError::Closed("hub stopped".into()))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubEvent) -> McpeResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| McpeError::Closed("hub stopped".into()))
    }

    /// Attach a session. Events published from now on are queued on the
    /// returned receiver.
    pub async fn register(
        &self,
        source: Source,
        owner: bool,
    ) -> McpeResult<(SessionId, mpsc::Receiver<Event>)> {
        let (outbound, rx) = mpsc::channel(self.queue_capacity);
        let id = self
            .request(|reply| HubEvent::Register {
                source,
                owner,
                outbound,
                reply,
            })
            .await?;
        Ok((id, rx))
    }

    pub async fn unregister(&self, id: SessionId) {
        let _ = self.send(HubEvent::Unregister(id)).await;
    }

    /// Submit a command and return its ticket.
    pub async fn submit(&self, source: Source, text: impl Into<String>) -> McpeResult<Ticket> {
        let text = text.into();
        self.request(|reply| HubEvent::Submit {
            source,
            text,
            reply,
        })
        .await?
    }

    /// Wait for the result of `ticket`.
    ///
    /// On timeout the ticket is abandoned: a result arriving later is
    /// discarded rather than handed to anyone else.
    pub async fn await_result(&self, ticket: Ticket, timeout: Duration) -> McpeResult<String> {
        let (waiter, rx) = oneshot::channel();
        self.send(HubEvent::Watch { ticket, waiter }).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(_)) => Err(McpeError::Closed(format!("ticket {ticket} cannot be awaited"))),
            Err(_) => {
                let _ = self.tx.try_send(HubEvent::Abandon(ticket));
                Err(McpeError::Timeout)
            }
        }
    }

    /// Feed one output line of the running process.
    pub async fn output(&self, line: String) -> McpeResult<()> {
        self.send(HubEvent::Output(line)).await
    }

    /// Broadcast a log event that did not come from the process.
    pub async fn publish(&self, event: LogEvent) {
        let _ = self.send(HubEvent::Publish(event)).await;
    }

    /// Route submissions to a freshly spawned process. Resets echo tracking.
    pub async fn attach(&self, input: mpsc::Sender<String>) -> McpeResult<()> {
        self.send(HubEvent::Attach(input)).await
    }

    pub async fn detach(&self) {
        let _ = self.send(HubEvent::Detach).await;
    }

    pub async fn ping(&self) -> McpeResult<String> {
        self.request(HubEvent::Ping).await
    }

    pub async fn stats(&self) -> McpeResult<HubStats> {
        self.request(HubEvent::Stats).await
    }

    /// Stop the loop. Every session's queue closes with it.
    pub async fn shutdown(&self) {
        let _ = self.send(HubEvent::Shutdown).await;
    }
}
