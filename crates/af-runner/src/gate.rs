//! First-come-first-served limit on simultaneously active runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

const CANCEL_CHECK: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct GateState {
    active: usize,
    next_ticket: u64,
    queue: VecDeque<u64>,
}

#[derive(Debug)]
pub struct ConcurrencyGate {
    limit: usize,
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Place in line, taken at submission time so admission follows submission
/// order even though supervisor threads start in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Held while a run is active; releases its slot on drop.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<ConcurrencyGate>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self) -> Ticket {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        Ticket(ticket)
    }

    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Block until `ticket` is at the head of the queue and a slot is free.
    /// Returns `None` (and leaves the queue) if `cancelled` becomes set.
    pub fn acquire(self: &Arc<Self>, ticket: Ticket, cancelled: &AtomicBool) -> Option<Permit> {
        let mut state = self.lock();
        loop {
            if cancelled.load(Ordering::SeqCst) {
                state.queue.retain(|t| *t != ticket.0);
                drop(state);
                self.changed.notify_all();
                return None;
            }
            if state.queue.front() == Some(&ticket.0) && state.active < self.limit {
                state.queue.pop_front();
                state.active += 1;
                drop(state);
                self.changed.notify_all();
                return Some(Permit {
                    gate: Arc::clone(self),
                });
            }
            state = match self.changed.wait_timeout(state, CANCEL_CHECK) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.gate.changed.notify_all();
    }
}
