//! Lock modes and the multi-granularity lock lattice
//!
//! Sixteen modes, ordered from weakest to strongest:
//!
//! | mode  | meaning                                          |
//! |-------|--------------------------------------------------|
//! | N     | no lock                                          |
//! | VIS   | intent to read versions below                    |
//! | VS    | read versions                                    |
//! | IS    | intent shared                                    |
//! | VSIS  | VS + IS                                          |
//! | IX    | intent exclusive                                 |
//! | S     | shared                                           |
//! | VSIX  | VS + IX                                          |
//! | VIX   | intent to write versions below                   |
//! | VSVIX | VS + VIX                                         |
//! | SIX   | S + IX                                           |
//! | U     | update (S now, X later)                          |
//! | SVIX  | S + VIX                                          |
//! | X     | exclusive                                        |
//! | VIXX  | X + VIX                                          |
//! | VX    | exclusive over versions too                      |
//!
//! Version readers (VIS, VS) coexist with X; only the version-writing modes
//! (VIX family, VX) exclude them.
//!
//! Both [`LockMode::lub`] and [`ModeSet::is_compatible`] are table lookups.

use bitflags::bitflags;
use once_cell::sync::Lazy;
use std::fmt;

/// Number of lock modes, including N
pub const MODE_COUNT: usize = 16;

/// A lock mode
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum LockMode {
    /// No lock
    #[default]
    N = 0,
    /// Version intent shared
    VIS = 1,
    /// Version shared
    VS = 2,
    /// Intent shared
    IS = 3,
    /// Version shared + intent shared
    VSIS = 4,
    /// Intent exclusive
    IX = 5,
    /// Shared
    S = 6,
    /// Version shared + intent exclusive
    VSIX = 7,
    /// Version intent exclusive
    VIX = 8,
    /// Version shared + version intent exclusive
    VSVIX = 9,
    /// Shared + intent exclusive
    SIX = 10,
    /// Update
    U = 11,
    /// Shared + version intent exclusive
    SVIX = 12,
    /// Exclusive
    X = 13,
    /// Version intent exclusive + exclusive
    VIXX = 14,
    /// Version exclusive
    VX = 15,
}

use LockMode::*;

impl LockMode {
    /// Every mode, in index order
    pub const ALL: [LockMode; MODE_COUNT] = [
        N, VIS, VS, IS, VSIS, IX, S, VSIX, VIX, VSVIX, SIX, U, SVIX, X, VIXX, VX,
    ];

    /// Index of this mode in the lattice tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Mode for a table index
    pub fn from_index(index: usize) -> Option<LockMode> {
        Self::ALL.get(index).copied()
    }

    /// Weakest mode that subsumes both `self` and `other`
    #[inline]
    pub fn lub(self, other: LockMode) -> LockMode {
        LUB[self.index()][other.index()]
    }

    /// True if a holder of `self` and a holder of `other` can coexist
    #[inline]
    pub fn is_compatible(self, other: LockMode) -> bool {
        COMPATIBLE[self.index()] & (1 << other.index()) != 0
    }

    /// Set of modes compatible with `self`
    #[inline]
    pub fn compatible_set(self) -> ModeSet {
        ModeSet::from_bits_truncate(COMPATIBLE[self.index()])
    }

    /// Minimum mode an ancestor must be granted before `self` may be
    /// granted on a descendant
    pub fn required_parent(self) -> LockMode {
        match self {
            N => N,
            VIS | VS => VIS,
            IS | VSIS | S => IS,
            IX | VSIX | SIX | U | X => IX,
            VIX | VSVIX | SVIX | VIXX | VX => VIX,
        }
    }

    /// True if an ancestor granted `self` permits `child` on a descendant
    pub fn permits_child(self, child: LockMode) -> bool {
        self.lub(child.required_parent()) == self
    }

    /// True if `self` is at least as strong as `other`
    #[inline]
    pub fn covers(self, other: LockMode) -> bool {
        self.lub(other) == self
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Lattice tables
// =============================================================================

/// Least upper bound, `LUB[a][b]`
static LUB: [[LockMode; MODE_COUNT]; MODE_COUNT] = [
    [N, VIS, VS, IS, VSIS, IX, S, VSIX, VIX, VSVIX, SIX, U, SVIX, X, VIXX, VX],
    [VIS, VIS, VS, IS, VSIS, IX, S, VSIX, VIX, VSVIX, SIX, U, SVIX, X, VIXX, VX],
    [VS, VS, VS, VSIS, VSIS, VSIX, S, VSIX, VSVIX, VSVIX, SIX, U, SVIX, X, VIXX, VX],
    [IS, IS, VSIS, IS, VSIS, IX, S, VSIX, VIX, VSVIX, SIX, U, SVIX, X, VIXX, VX],
    [VSIS, VSIS, VSIS, VSIS, VSIS, VSIX, S, VSIX, VSVIX, VSVIX, SIX, U, SVIX, X, VIXX, VX],
    [IX, IX, VSIX, IX, VSIX, IX, SIX, VSIX, VIX, VSVIX, SIX, X, SVIX, X, VIXX, VX],
    [S, S, S, S, S, SIX, S, SIX, SVIX, SVIX, SIX, U, SVIX, X, VIXX, VX],
    [VSIX, VSIX, VSIX, VSIX, VSIX, VSIX, SIX, VSIX, VSVIX, VSVIX, SIX, X, SVIX, X, VIXX, VX],
    [VIX, VIX, VSVIX, VIX, VSVIX, VIX, SVIX, VSVIX, VIX, VSVIX, SVIX, VIXX, SVIX, VIXX, VIXX, VX],
    [VSVIX, VSVIX, VSVIX, VSVIX, VSVIX, VSVIX, SVIX, VSVIX, VSVIX, VSVIX, SVIX, VIXX, SVIX, VIXX, VIXX, VX],
    [SIX, SIX, SIX, SIX, SIX, SIX, SIX, SIX, SVIX, SVIX, SIX, X, SVIX, X, VIXX, VX],
    [U, U, U, U, U, X, U, X, VIXX, VIXX, X, U, VIXX, X, VIXX, VX],
    [SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, SVIX, VIXX, SVIX, VIXX, VIXX, VX],
    [X, X, X, X, X, X, X, X, VIXX, VIXX, X, X, VIXX, X, VIXX, VX],
    [VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VIXX, VX],
    [VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX, VX],
];

/// Compatibility bitmaps; bit `i` of `COMPATIBLE[m]` is set iff mode `i`
/// may be held alongside `m`
static COMPATIBLE: [u16; MODE_COUNT] = [
    0xffff, // N
    0x7fff, // VIS: all but VX
    0x2cff, // VS: N VIS VS IS VSIS IX S VSIX SIX U X
    0x1fff, // IS: all but X VIXX VX
    0x0cff, // VSIS: N VIS VS IS VSIS IX S VSIX SIX U
    0x03bf, // IX: N VIS VS IS VSIS IX VSIX VIX VSVIX
    0x085f, // S: N VIS VS IS VSIS S U
    0x00bf, // VSIX: N VIS VS IS VSIS IX VSIX
    0x012b, // VIX: N VIS IS IX VIX
    0x002b, // VSVIX: N VIS IS IX
    0x001f, // SIX: N VIS VS IS VSIS
    0x005f, // U: N VIS VS IS VSIS S
    0x000b, // SVIX: N VIS IS
    0x0007, // X: N VIS VS
    0x0003, // VIXX: N VIS
    0x0001, // VX: N
];

bitflags! {
    /// A set of lock modes, one bit per mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeSet: u16 {
        /// N
        const N = 1 << 0;
        /// VIS
        const VIS = 1 << 1;
        /// VS
        const VS = 1 << 2;
        /// IS
        const IS = 1 << 3;
        /// VSIS
        const VSIS = 1 << 4;
        /// IX
        const IX = 1 << 5;
        /// S
        const S = 1 << 6;
        /// VSIX
        const VSIX = 1 << 7;
        /// VIX
        const VIX = 1 << 8;
        /// VSVIX
        const VSVIX = 1 << 9;
        /// SIX
        const SIX = 1 << 10;
        /// U
        const U = 1 << 11;
        /// SVIX
        const SVIX = 1 << 12;
        /// X
        const X = 1 << 13;
        /// VIXX
        const VIXX = 1 << 14;
        /// VX
        const VX = 1 << 15;
    }
}

/// Least upper bound of every subset of modes, indexed by bitmap
static SET_LUB: Lazy<Vec<LockMode>> = Lazy::new(|| {
    let mut table = vec![N; 1 << MODE_COUNT];
    for bits in 1usize..(1 << MODE_COUNT) {
        let lowest = bits.trailing_zeros() as usize;
        table[bits] = table[bits & (bits - 1)].lub(LockMode::ALL[lowest]);
    }
    table
});

impl ModeSet {
    /// Least upper bound of every mode in the set (N when empty)
    #[inline]
    pub fn lub(self) -> LockMode {
        SET_LUB[self.bits() as usize]
    }

    /// True iff every mode in the set is compatible with `requested`
    #[inline]
    pub fn is_compatible(self, requested: LockMode) -> bool {
        self.bits() & !COMPATIBLE[requested.index()] == 0
    }

    /// Iterate over the modes in the set, weakest first
    pub fn modes(self) -> impl Iterator<Item = LockMode> {
        LockMode::ALL
            .into_iter()
            .filter(move |m| self.contains(ModeSet::from(*m)))
    }
}

impl From<LockMode> for ModeSet {
    fn from(mode: LockMode) -> Self {
        ModeSet::from_bits_truncate(1 << mode.index())
    }
}

impl FromIterator<LockMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = LockMode>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ModeSet::empty(), |set, m| set | ModeSet::from(m))
    }
}
