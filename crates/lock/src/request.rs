//! Lock requests: one client's holds on one item
//!
//! A request keeps a [`LockCount`] per recorded duration, their sum, and a
//! per-duration "stack" of the holds acquired since the last statement
//! boundary. The request exists while the client holds anything on the
//! item or is waiting for it.

use crate::count::LockCount;
use crate::duration::{LockDuration, RECORDED_DURATIONS};
use crate::manager::LockTable;
use crate::mode::LockMode;
use crate::pool::Recycle;
use crate::ClientId;
use warden_core::LockName;

/// Wait condition of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestCondition {
    /// Nothing pending
    #[default]
    Granted,
    /// Waiting for a first grant
    Waiting,
    /// Holding something and waiting for a stronger mode
    Converting,
    /// Chosen as a deadlock victim while waiting
    Deadlocked,
}

impl RequestCondition {
    /// True while the owning client is blocked on this request
    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, RequestCondition::Waiting | RequestCondition::Converting)
    }
}

/// Holds of one client on one item
#[derive(Debug, Default)]
pub(crate) struct RequestEntry {
    pub(crate) total: LockCount,
    pub(crate) durations: [LockCount; RECORDED_DURATIONS],
    pub(crate) stack: [LockCount; RECORDED_DURATIONS],
    pub(crate) condition: RequestCondition,
}

impl Recycle for RequestEntry {
    fn recycle(&mut self) {
        self.total.clear();
        self.durations.iter_mut().for_each(LockCount::clear);
        self.stack.iter_mut().for_each(LockCount::clear);
        self.condition = RequestCondition::Granted;
    }
}

impl<T: Recycle> Recycle for Box<T> {
    fn recycle(&mut self) {
        (**self).recycle();
    }
}

impl RequestEntry {
    /// Effective mode this client holds on the item
    #[inline]
    pub(crate) fn granted(&self) -> LockMode {
        self.total.lub()
    }

    /// True if the client holds anything
    #[inline]
    pub(crate) fn is_granted(&self) -> bool {
        self.granted() != LockMode::N
    }

    /// True if the request can be discarded
    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.total.is_empty() && !self.condition.is_pending()
    }

    /// Record one hold of `mode` for `duration`
    pub(crate) fn record(&mut self, mode: LockMode, duration: LockDuration) {
        if let Some(slot) = duration.slot() {
            self.total.up(mode, 1);
            self.durations[slot].up(mode, 1);
            self.stack[slot].up(mode, 1);
        }
    }

    /// Remove up to `n` holds of `mode` recorded for `duration`, returning
    /// how many were removed
    pub(crate) fn unrecord(&mut self, mode: LockMode, duration: LockDuration, n: u32) -> u32 {
        let Some(slot) = duration.slot() else {
            return 0;
        };
        let mut removed = n;
        self.durations[slot].down(mode, &mut removed);
        let mut m = removed;
        self.total.down(mode, &mut m);
        let mut s = removed;
        self.stack[slot].down(mode, &mut s);
        removed
    }
}

// =============================================================================
// Hierarchy checks
// =============================================================================

impl LockTable {
    /// True if `client` holds enough on every ancestor of `name` to be
    /// granted `mode` on it
    pub(crate) fn is_allowable_child(&self, client: ClientId, name: &LockName, mode: LockMode) -> bool {
        let need = mode.required_parent();
        if need == LockMode::N {
            return true;
        }
        let Some(entry) = self.clients.get(&client) else {
            return false;
        };
        name.ancestors().all(|ancestor| {
            entry
                .requests
                .get(&ancestor)
                .map(|r| r.granted())
                .unwrap_or(LockMode::N)
                .covers(need)
        })
    }

    /// True if weakening `client`'s grant on `name` to `mode` still covers
    /// every descendant the client holds
    pub(crate) fn is_allowable_parent(&self, client: ClientId, name: &LockName, mode: LockMode) -> bool {
        let Some(entry) = self.clients.get(&client) else {
            return true;
        };
        entry
            .requests
            .iter()
            .filter(|(other, r)| r.is_granted() && other.is_descendant(name))
            .all(|(_, r)| mode.covers(r.granted().required_parent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    #[test]
    fn test_record_tracks_duration_total_and_stack() {
        let mut req = RequestEntry::default();
        req.record(S, LockDuration::Statement);
        req.record(IX, LockDuration::Middle);
        assert_eq!(req.granted(), SIX);
        assert_eq!(req.durations[1].get(S), 1);
        assert_eq!(req.durations[3].get(IX), 1);
        assert_eq!(req.stack[1].get(S), 1);
        assert_eq!(req.stack[3].get(IX), 1);
    }

    #[test]
    fn test_instant_is_not_recorded() {
        let mut req = RequestEntry::default();
        req.record(X, LockDuration::Instant);
        assert!(!req.is_granted());
        assert!(req.is_idle());
        assert_eq!(req.unrecord(X, LockDuration::Instant, 1), 0);
    }

    #[test]
    fn test_unrecord_clamps_to_duration() {
        let mut req = RequestEntry::default();
        req.record(S, LockDuration::Middle);
        assert_eq!(req.unrecord(S, LockDuration::Statement, 1), 0);
        assert!(req.is_granted());
        assert_eq!(req.unrecord(S, LockDuration::Middle, 3), 1);
        assert!(!req.is_granted());
        assert!(req.stack[3].is_empty());
    }

    #[test]
    fn test_pending_request_is_not_idle() {
        let mut req = RequestEntry::default();
        req.condition = RequestCondition::Waiting;
        assert!(!req.is_idle());
        req.recycle();
        assert!(req.is_idle());
    }
}
