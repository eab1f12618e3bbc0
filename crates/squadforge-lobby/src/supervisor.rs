//! Reconnection grace windows.
//!
//! When a member drops without consent its slot is held for a grace window.
//! The wait runs as a background timer task per member, never on the squad
//! actor, so other members' commands keep flowing. When the timer fires it
//! injects an event into the squad's own command queue; the actor then
//! decides whether the expiry is still current.
//!
//! ```text
//! Leave(consented = false) ──→ start() ──┬── reconnect ──→ cancel()
//!                                        │
//!                                        └── grace elapsed ──→ GraceExpired
//!                                                                  │
//!                                             take_expired() == true ──→ remove member
//! ```
//!
//! Every window carries a generation. An expiry that was already queued when
//! the member reconnected (or started a newer window) fails the generation
//! check and is dropped as stale.

use std::collections::HashMap;
use std::time::Duration;

use squadforge_protocol::MemberId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Payload of a fired grace timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceExpiry {
    pub member: MemberId,
    pub generation: u64,
}

struct PendingWindow {
    generation: u64,
    task: JoinHandle<()>,
}

/// Per-member cancellable grace timers for one squad.
#[derive(Default)]
pub struct ReconnectionSupervisor {
    windows: HashMap<MemberId, PendingWindow>,
    next_generation: u64,
}

impl ReconnectionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a grace window for `member`. After `grace`, `make_event` wraps
    /// the expiry and the result is sent on `queue`.
    ///
    /// A window already open for the member is replaced. Returns the new
    /// window's generation.
    pub fn start<E, F>(
        &mut self,
        member: MemberId,
        grace: Duration,
        queue: mpsc::Sender<E>,
        make_event: F,
    ) -> u64
    where
        E: Send + 'static,
        F: FnOnce(GraceExpiry) -> E + Send + 'static,
    {
        self.cancel(member);

        let generation = self.next_generation;
        self.next_generation += 1;
        let expiry = GraceExpiry { member, generation };

        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // The squad may already be gone; nothing to report then.
            let _ = queue.send(make_event(expiry)).await;
        });

        self.windows.insert(member, PendingWindow { generation, task });
        tracing::debug!(member_id = %member, generation, ?grace, "grace window opened");
        generation
    }

    /// Closes the member's window, if any. Returns `true` if one was open.
    pub fn cancel(&mut self, member: MemberId) -> bool {
        match self.windows.remove(&member) {
            Some(window) => {
                window.task.abort();
                tracing::debug!(member_id = %member, generation = window.generation, "grace window cancelled");
                true
            }
            None => false,
        }
    }

    /// Consumes a fired expiry. Returns `true` only if it belongs to the
    /// member's current window; stale expiries return `false`.
    pub fn take_expired(&mut self, expiry: GraceExpiry) -> bool {
        match self.windows.get(&expiry.member) {
            Some(window) if window.generation == expiry.generation => {
                self.windows.remove(&expiry.member);
                true
            }
            _ => false,
        }
    }

    /// Number of open windows.
    pub fn pending(&self) -> usize {
        self.windows.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, window) in self.windows.drain() {
            window.task.abort();
        }
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
