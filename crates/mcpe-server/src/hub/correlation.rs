//! Ticket table: matches submitted commands to their results.
//!
//! Owned by the hub loop; nothing else touches it. Per ticket:
//!
//! ```text
//! Pending ──deliver──▶ Resolved ──▶ (discarded)
//!    └────abandon────▶ TimedOut ──▶ (discarded)
//! ```
//!
//! A result that arrives before anyone waits for it is parked in a short
//! lived cache so a waiter registering a moment later still gets it.

use mcpe_core::Ticket;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug)]
enum Entry {
    Pending {
        since: Instant,
        waiter: Option<oneshot::Sender<String>>,
    },
    /// Result arrived with nobody waiting yet.
    Unclaimed { text: String, at: Instant },
    TimedOut { at: Instant },
}

/// Outcome of [`Correlator::deliver`].
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the waiting caller.
    Delivered,
    /// Parked until a waiter shows up or the cache expires.
    Cached,
    /// Nobody may receive it (caller gave up, or ticket unknown/finished).
    Dropped,
}

#[derive(Debug)]
pub struct Correlator {
    next: u32,
    entries: HashMap<Ticket, Entry>,
    cache_ttl: Duration,
}

impl Correlator {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            next: 0,
            entries: HashMap::new(),
            cache_ttl,
        }
    }

    /// Allocate a fresh ticket in the `Pending` state.
    pub fn mint(&mut self, now: Instant) -> Ticket {
        self.next = self.next.wrapping_add(1);
        let ticket = Ticket(self.next);
        self.entries.insert(
            ticket,
            Entry::Pending {
                since: now,
                waiter: None,
            },
        );
        ticket
    }

    /// Register the single waiter for `ticket`.
    ///
    /// If the result is already cached it is handed over at once. For
    /// unknown, finished or timed-out tickets the waiter is dropped, which
    /// the caller observes as a closed channel.
    pub fn watch(&mut self, ticket: Ticket, waiter: oneshot::Sender<String>) {
        match self.entries.remove(&ticket) {
            Some(Entry::Unclaimed { text, .. }) => {
                let _ = waiter.send(text);
            }
            Some(Entry::Pending { since, waiter: None }) => {
                self.entries.insert(
                    ticket,
                    Entry::Pending {
                        since,
                        waiter: Some(waiter),
                    },
                );
            }
            Some(other) => {
                debug!(%ticket, "ticket already has a waiter or gave up");
                self.entries.insert(ticket, other);
            }
            None => debug!(%ticket, "watch for unknown ticket"),
        }
    }

    /// Resolve `ticket` with `text`. At most one waiter ever receives it.
    pub fn deliver(&mut self, ticket: Ticket, text: String, now: Instant) -> Delivery {
        match self.entries.remove(&ticket) {
            Some(Entry::Pending {
                waiter: Some(waiter),
                ..
            }) => match waiter.send(text) {
                Ok(()) => Delivery::Delivered,
                Err(_) => {
                    // Caller dropped its receiver: it timed out.
                    self.entries.insert(ticket, Entry::TimedOut { at: now });
                    Delivery::Dropped
                }
            },
            Some(Entry::Pending { waiter: None, .. }) => {
                self.entries
                    .insert(ticket, Entry::Unclaimed { text, at: now });
                Delivery::Cached
            }
            Some(other) => {
                self.entries.insert(ticket, other);
                Delivery::Dropped
            }
            None => Delivery::Dropped,
        }
    }

    /// The caller waiting on `ticket` gave up; later results are discarded.
    pub fn abandon(&mut self, ticket: Ticket, now: Instant) {
        if self.entries.contains_key(&ticket) {
            self.entries.insert(ticket, Entry::TimedOut { at: now });
        }
    }

    /// Forget entries older than the cache lifetime whose waiter (if any)
    /// is gone. Returns how many were removed.
    pub fn gc(&mut self, now: Instant) -> usize {
        let ttl = self.cache_ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry {
            Entry::Pending {
                waiter: Some(w), ..
            } => !w.is_closed(),
            Entry::Pending { since, waiter: None } => now.saturating_duration_since(*since) <= ttl,
            Entry::Unclaimed { at, .. } | Entry::TimedOut { at } => {
                now.saturating_duration_since(*at) <= ttl
            }
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "expired ticket entries");
        }
        removed
    }

    /// Tickets not yet discarded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
