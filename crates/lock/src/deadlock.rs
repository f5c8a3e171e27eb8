//! Deadlock detection over the wait-for graph
//!
//! The graph is implicit. A waiting client W has an edge to client H when H
//! has a request on the item W waits for and H's holds are incompatible
//! with what W wants there. Only waiting clients can be part of a cycle, so
//! edges to running clients are not followed.
//!
//! Detection runs once, under the manager latch, each time a client is
//! about to block. Each run stamps visited clients with a fresh
//! generation number instead of allocating a visited set.

use crate::manager::{LockManager, LockTable};
use crate::ClientId;
use smallvec::SmallVec;
use tracing::debug;

/// Picks which client on a wait-for cycle is aborted
pub trait VictimPolicy: Send + Sync {
    /// Choose a victim from `cycle`
    ///
    /// `cycle[0]` is the client that detected the deadlock; the rest follow
    /// the wait-for edges from it. The returned id must be on the cycle.
    fn select_victim(&self, cycle: &[ClientId]) -> ClientId;
}

/// The client that detects a deadlock aborts itself
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorIsVictim;

impl VictimPolicy for DetectorIsVictim {
    fn select_victim(&self, cycle: &[ClientId]) -> ClientId {
        cycle[0]
    }
}

/// The most recently registered client on the cycle is aborted
#[derive(Debug, Clone, Copy, Default)]
pub struct YoungestIsVictim;

impl VictimPolicy for YoungestIsVictim {
    fn select_victim(&self, cycle: &[ClientId]) -> ClientId {
        cycle.iter().copied().max().unwrap_or(cycle[0])
    }
}

impl LockTable {
    /// Depth-first search for a path of waiting clients from `current`
    /// back to `origin`
    fn find_cycle(&mut self, current: ClientId, origin: ClientId, generation: u64, path: &mut Vec<ClientId>) -> bool {
        let Some(entry) = self.clients.get_mut(&current) else {
            return false;
        };
        entry.mark = generation;
        let Some(target) = entry.waiting.clone() else {
            return false;
        };
        let (own, _) = self.split_counts(current, &target.name);
        let wanted = own.lub(target.mode);

        let holders: SmallVec<[ClientId; 8]> = match self.items.get(&target.name) {
            Some(item) => item
                .queue
                .iter()
                .copied()
                .filter(|other| *other != current)
                .filter(|other| {
                    self.clients
                        .get(other)
                        .and_then(|e| e.requests.get(&target.name))
                        .map_or(false, |r| !r.total.bitmap().is_compatible(wanted))
                })
                .collect(),
            None => return false,
        };

        for holder in holders {
            let Some(entry) = self.clients.get(&holder) else {
                continue;
            };
            if entry.waiting.is_none() {
                continue;
            }
            if holder == origin {
                return true;
            }
            if entry.mark == generation {
                continue;
            }
            path.push(holder);
            if self.find_cycle(holder, origin, generation, path) {
                return true;
            }
            path.pop();
        }
        false
    }
}

impl LockManager {
    /// Look for a wait-for cycle through `origin`, which must already be
    /// marked as waiting
    ///
    /// # Returns
    /// The chosen victim if a cycle exists. A victim other than `origin` has
    /// already been woken with a deadlock.
    pub(crate) fn detect_deadlock(&self, table: &mut LockTable, origin: ClientId) -> Option<ClientId> {
        let generation = table.next_generation();
        let mut path = vec![origin];
        if !table.find_cycle(origin, origin, generation, &mut path) {
            return None;
        }
        table.deadlocks += 1;
        let victim = self.victim_policy().select_victim(&path);
        debug!(
            detector = %origin,
            victim = %victim,
            cycle_len = path.len(),
            "deadlock detected"
        );
        if victim != origin {
            table.mark_deadlocked(victim);
        }
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::duration::{LockDuration, Timeout};
    use crate::mode::LockMode::*;
    use crate::status::LockStatus;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use warden_core::{DatabaseId, LockName};

    const DB: DatabaseId = DatabaseId(9);

    fn wait_until_waiting(manager: &LockManager, n: usize) {
        while manager.stats().waiting_clients < n {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_detector_policy_picks_first() {
        let cycle = [ClientId(4), ClientId(9), ClientId(2)];
        assert_eq!(DetectorIsVictim.select_victim(&cycle), ClientId(4));
        assert_eq!(YoungestIsVictim.select_victim(&cycle), ClientId(9));
    }

    #[test]
    fn test_conversion_deadlock_detected_by_second_upgrader() {
        let manager = Arc::new(LockManager::new(LockConfig::for_testing()));
        let name = LockName::table(DB, 1);
        let a = manager.client();
        let b = manager.client();
        a.hold(&name, S, LockDuration::Middle, Timeout::IMMEDIATE);
        b.hold(&name, S, LockDuration::Middle, Timeout::IMMEDIATE);

        let handle = thread::spawn(move || {
            let status = a.hold(&name, X, LockDuration::Middle, Timeout::After(Duration::from_secs(5)));
            (a, status)
        });
        wait_until_waiting(&manager, 1);

        let name = LockName::table(DB, 1);
        let status = b.hold(&name, X, LockDuration::Middle, Timeout::After(Duration::from_secs(5)));
        assert_eq!(status, LockStatus::Deadlock);
        assert_eq!(b.held_mode(&name), S);
        b.release_all(LockDuration::Middle);

        let (a, status) = handle.join().unwrap();
        assert_eq!(status, LockStatus::Succeeded);
        assert_eq!(a.held_mode(&name), X);
        assert_eq!(manager.stats().deadlocks, 1);
    }

    #[test]
    fn test_youngest_policy_wakes_other_victim() {
        let manager = Arc::new(LockManager::with_victim_policy(
            LockConfig::for_testing(),
            YoungestIsVictim,
        ));
        let first = LockName::table(DB, 1);
        let second = LockName::table(DB, 2);
        let older = manager.client();
        let younger = manager.client();
        assert!(younger.id() > older.id());
        older.hold(&first, X, LockDuration::Middle, Timeout::IMMEDIATE);
        younger.hold(&second, X, LockDuration::Middle, Timeout::IMMEDIATE);

        let handle = {
            let second = second.clone();
            thread::spawn(move || {
                let status = younger.hold(&second, X, LockDuration::Middle, Timeout::IMMEDIATE);
                assert_eq!(status, LockStatus::Succeeded);
                let first = LockName::table(DB, 1);
                let status = younger.hold(&first, X, LockDuration::Middle, Timeout::After(Duration::from_secs(5)));
                // Victims release so the survivor can proceed
                younger.release_all(LockDuration::Middle);
                status
            })
        };
        wait_until_waiting(&manager, 1);

        // The older client closes the cycle but the younger one is aborted
        let status = older.hold(&second, X, LockDuration::Middle, Timeout::After(Duration::from_secs(5)));
        assert_eq!(status, LockStatus::Succeeded);
        assert_eq!(handle.join().unwrap(), LockStatus::Deadlock);
    }

    #[test]
    fn test_no_cycle_without_waiting_holder() {
        let manager = Arc::new(LockManager::new(LockConfig::for_testing()));
        let name = LockName::table(DB, 1);
        let a = manager.client();
        let b = manager.client();
        a.hold(&name, X, LockDuration::Middle, Timeout::IMMEDIATE);
        let status = b.hold(&name, X, LockDuration::Middle, Timeout::After(Duration::from_millis(20)));
        assert_eq!(status, LockStatus::Timeout);
        assert_eq!(manager.stats().deadlocks, 0);
    }
}
