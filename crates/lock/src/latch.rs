//! Latches: plain mutual exclusion for latchable items
//!
//! A latch is independent of lock modes. At most one client is inside a
//! given latch at a time; the owning client may re-enter it.

use crate::ClientId;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LatchState {
    owner: Option<ClientId>,
    depth: u32,
}

/// Re-entrant mutual exclusion keyed by client
#[derive(Debug, Default)]
pub(crate) struct Latch {
    state: Mutex<LatchState>,
    released: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enter the latch, blocking while another client owns it
    pub(crate) fn acquire(&self, client: ClientId) {
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(client);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == client => {
                    state.depth += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut state),
            }
        }
    }

    /// Leave one level of the latch; false if `client` does not own it
    pub(crate) fn release(&self, client: ClientId) -> bool {
        let mut state = self.state.lock();
        if state.owner != Some(client) {
            return false;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.released.notify_one();
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn owner(&self) -> Option<ClientId> {
        self.state.lock().owner
    }
}
