//! Lock durations and wait timeouts

use std::time::Duration;

/// How long a granted lock is kept
///
/// Ordered from shortest to longest. `Instant` locks are checked (and may
/// wait) but are never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockDuration {
    /// Checked, never recorded
    Instant,
    /// Released at the end of the current statement regardless of outcome
    Inside,
    /// Kept until the end of the statement
    Statement,
    /// Released explicitly before transaction end
    Short,
    /// Kept until transaction end
    Middle,
    /// Kept until the session releases it
    Long,
}

/// Number of durations that record holds (everything but `Instant`)
pub(crate) const RECORDED_DURATIONS: usize = 5;

impl LockDuration {
    /// Durations that record holds, shortest first
    pub const RECORDED: [LockDuration; RECORDED_DURATIONS] = [
        LockDuration::Inside,
        LockDuration::Statement,
        LockDuration::Short,
        LockDuration::Middle,
        LockDuration::Long,
    ];

    /// True if a hold of this duration is recorded
    #[inline]
    pub fn is_recorded(self) -> bool {
        self != LockDuration::Instant
    }

    /// Slot in per-duration count arrays, `None` for `Instant`
    #[inline]
    pub(crate) fn slot(self) -> Option<usize> {
        match self {
            LockDuration::Instant => None,
            d => Some(d as usize - 1),
        }
    }
}

/// Bound on a lock wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait until granted or chosen as a deadlock victim
    #[default]
    Unlimited,
    /// Give up after the given time
    After(Duration),
}

impl Timeout {
    /// Do not wait at all
    pub const IMMEDIATE: Timeout = Timeout::After(Duration::ZERO);

    /// Timeout from milliseconds, `None` meaning unlimited
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            None => Timeout::Unlimited,
            Some(ms) => Timeout::After(Duration::from_millis(ms)),
        }
    }
}
