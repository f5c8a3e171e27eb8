//! Per-mode lock counts
//!
//! A [`LockCount`] records how many times each mode is held, together with
//! a [`ModeSet`] of the modes whose count is non-zero. Items keep one for
//! all holders; requests keep one per duration for a single client.

use crate::mode::{LockMode, ModeSet, MODE_COUNT};

/// Multiset of held lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockCount {
    values: [u32; MODE_COUNT],
    bitmap: ModeSet,
}

impl LockCount {
    /// Empty count
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` holds of `mode`, returning the new count for `mode`
    ///
    /// N is never recorded. Counts saturate rather than wrap.
    pub fn up(&mut self, mode: LockMode, n: u32) -> u32 {
        if mode == LockMode::N || n == 0 {
            return self.values[mode.index()];
        }
        let slot = &mut self.values[mode.index()];
        *slot = slot.saturating_add(n);
        self.bitmap |= ModeSet::from(mode);
        *slot
    }

    /// Remove up to `n` holds of `mode`, returning the new count for `mode`
    ///
    /// `n` is updated in place to the amount actually removed.
    pub fn down(&mut self, mode: LockMode, n: &mut u32) -> u32 {
        let slot = &mut self.values[mode.index()];
        *n = (*n).min(*slot);
        *slot -= *n;
        if *slot == 0 {
            self.bitmap.remove(ModeSet::from(mode));
        }
        *slot
    }

    /// Count recorded for `mode`
    #[inline]
    pub fn get(&self, mode: LockMode) -> u32 {
        self.values[mode.index()]
    }

    /// Modes with a non-zero count
    #[inline]
    pub fn bitmap(&self) -> ModeSet {
        self.bitmap
    }

    /// Effective mode of everything recorded
    #[inline]
    pub fn lub(&self) -> LockMode {
        self.bitmap.lub()
    }

    /// True if nothing is recorded
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Zero the count for one mode
    pub fn clear_mode(&mut self, mode: LockMode) {
        self.values[mode.index()] = 0;
        self.bitmap.remove(ModeSet::from(mode));
    }

    /// Zero every count
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add every hold in `other`
    pub fn add(&mut self, other: &LockCount) {
        for mode in other.bitmap.modes() {
            self.up(mode, other.get(mode));
        }
    }

    /// Remove every hold in `other`, clamping at zero
    pub fn subtract(&mut self, other: &LockCount) {
        for mode in other.bitmap.modes() {
            let mut n = other.get(mode);
            self.down(mode, &mut n);
        }
    }

    /// Counts held by everyone except `own`
    pub fn without(&self, own: &LockCount) -> LockCount {
        let mut rest = *self;
        rest.subtract(own);
        rest
    }

    /// Iterate over `(mode, count)` pairs with a non-zero count
    pub fn iter(&self) -> impl Iterator<Item = (LockMode, u32)> + '_ {
        self.bitmap.modes().map(move |m| (m, self.get(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use LockMode::*;

    #[test]
    fn test_up_sets_bitmap() {
        let mut count = LockCount::new();
        assert_eq!(count.up(S, 1), 1);
        assert_eq!(count.up(S, 2), 3);
        assert!(count.bitmap().contains(ModeSet::S));
        assert_eq!(count.lub(), S);
    }

    #[test]
    fn test_up_ignores_n() {
        let mut count = LockCount::new();
        count.up(N, 5);
        assert!(count.is_empty());
        assert_eq!(count.lub(), N);
    }

    #[test]
    fn test_down_clamps_and_reports() {
        let mut count = LockCount::new();
        count.up(X, 2);
        let mut n = 5;
        assert_eq!(count.down(X, &mut n), 0);
        assert_eq!(n, 2);
        assert!(count.is_empty());

        let mut n = 1;
        count.down(IS, &mut n);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_lub_over_modes() {
        let mut count = LockCount::new();
        count.up(IS, 1);
        count.up(IX, 1);
        assert_eq!(count.lub(), IX);
        count.up(S, 1);
        assert_eq!(count.lub(), SIX);
        let mut n = 1;
        count.down(IX, &mut n);
        assert_eq!(count.lub(), S);
    }

    #[test]
    fn test_clear_mode_and_clear() {
        let mut count = LockCount::new();
        count.up(S, 3);
        count.up(IX, 1);
        count.clear_mode(S);
        assert_eq!(count.get(S), 0);
        assert_eq!(count.lub(), IX);
        count.clear();
        assert!(count.is_empty());
    }

    #[test]
    fn test_without_removes_own_holds() {
        let mut total = LockCount::new();
        total.up(S, 2);
        total.up(IX, 1);
        let mut own = LockCount::new();
        own.up(S, 1);
        own.up(IX, 1);
        let others = total.without(&own);
        assert_eq!(others.get(S), 1);
        assert_eq!(others.get(IX), 0);
        assert_eq!(others.bitmap(), ModeSet::S);
    }

    #[test]
    fn test_add_merges() {
        let mut a = LockCount::new();
        a.up(S, 1);
        let mut b = LockCount::new();
        b.up(S, 2);
        b.up(X, 1);
        a.add(&b);
        assert_eq!(a.get(S), 3);
        assert_eq!(a.get(X), 1);
        assert_eq!(a.iter().count(), 2);
    }

    fn any_mode() -> impl Strategy<Value = LockMode> {
        (1..MODE_COUNT).prop_map(|i| LockMode::ALL[i])
    }

    proptest! {
        #[test]
        fn prop_up_down_restores(
            mode in any_mode(),
            base in 0u32..4,
            n in 1u32..100,
        ) {
            let mut count = LockCount::new();
            count.up(mode, base);
            let before = count;
            count.up(mode, n);
            let mut removed = n;
            count.down(mode, &mut removed);
            prop_assert_eq!(removed, n);
            prop_assert_eq!(count, before);
            prop_assert_eq!(count.bitmap().contains(ModeSet::from(mode)), count.get(mode) != 0);
        }
    }
}
