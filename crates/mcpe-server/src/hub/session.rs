//! Registry of attached sessions.
//!
//! Each session owns a bounded outbound queue. Broadcasting never waits on a
//! session: a queue that is full or closed gets the session detached. The
//! owning session is only detached once its queue is closed; while it is
//! full it misses events instead.

use mcpe_core::{Event, Source};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A single attached session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub source: Source,
    /// Losing the owning session ends the supervisor.
    pub owner: bool,
    outbound: mpsc::Sender<Event>,
}

/// Sessions removed by a broadcast.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dropped {
    pub ids: Vec<SessionId>,
    pub owner_lost: bool,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    // Ordered so delivery order across sessions is stable.
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Source, owner: bool, outbound: mpsc::Sender<Event>) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(
            id,
            Session {
                id,
                source,
                owner,
                outbound,
            },
        );
        info!(session = %id, %source, owner, "session attached");
        id
    }

    /// Remove a session. Returns it if it was still registered.
    pub fn unregister(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        info!(session = %id, source = %session.source, "session detached");
        Some(session)
    }

    /// Queue `event` on every session without blocking.
    pub fn broadcast(&mut self, event: &Event) -> Dropped {
        let mut dropped = Dropped::default();
        for session in self.sessions.values() {
            match session.outbound.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) if session.owner => {
                    warn!(session = %session.id, source = %session.source, "owner queue full, event skipped");
                }
                Err(TrySendError::Full(_)) => {
                    warn!(session = %session.id, source = %session.source, "session queue full, detaching");
                    dropped.ids.push(session.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = %session.id, "session queue closed");
                    dropped.ids.push(session.id);
                }
            }
        }
        for id in &dropped.ids {
            if let Some(session) = self.unregister(*id) {
                dropped.owner_lost |= session.owner;
            }
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }
}
