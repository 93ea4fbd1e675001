//! Process-wide FIFO lock around the engine.
//!
//! Every engine access, sync or async, goes through [`EngineLock::global`].
//! Waiters are served in arrival order.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// Ticket lock: `acquire` takes a number and waits until it is served.
#[derive(Debug)]
pub(crate) struct EngineLock {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

static GLOBAL: EngineLock = EngineLock::new();

impl EngineLock {
    pub(crate) const fn new() -> Self {
        Self {
            tickets: Mutex::new(Tickets { next: 0, serving: 0 }),
            turn: Condvar::new(),
        }
    }

    /// The lock shared by every session in the process.
    pub(crate) fn global() -> &'static EngineLock {
        &GLOBAL
    }

    /// Block until it is this caller's turn. Not reentrant.
    pub(crate) fn acquire(&self) -> EngineGuard<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        EngineGuard { lock: self }
    }

    /// Whether someone currently holds the lock.
    pub(crate) fn is_held(&self) -> bool {
        let tickets = self.tickets.lock();
        tickets.next != tickets.serving
    }

    /// Callers queued behind the current holder.
    pub(crate) fn waiting(&self) -> u64 {
        let tickets = self.tickets.lock();
        (tickets.next - tickets.serving).saturating_sub(1)
    }
}

/// Held while the engine is in use; the next waiter is served on drop.
#[derive(Debug)]
pub(crate) struct EngineGuard<'a> {
    lock: &'a EngineLock,
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        let mut tickets = self.lock.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.lock.turn.notify_all();
    }
}
