//! Pre-check option bits.

use std::fmt;
use std::ops::BitOr;

/// Which precondition checks an operation performs, as a bit set.
///
/// Internal callers (auto-creation, clone pre-removal) drop individual bits;
/// the session façade passes [`CheckOptions::ALL`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions(u8);

impl CheckOptions {
    /// No checks.
    pub const NONE: Self = Self(0);
    /// Consult the access oracle.
    pub const ACCESS: Self = Self(1);
    /// Consult the lock oracle.
    pub const LOCK: Self = Self(1 << 1);
    /// Require affected nodes to be checked out.
    pub const VERSIONING: Self = Self(1 << 2);
    /// Enforce node-type constraints (protected items, applicable defs).
    pub const CONSTRAINTS: Self = Self(1 << 3);
    /// Enforce referential integrity on removal.
    pub const REFERENCES: Self = Self(1 << 4);
    /// Detect name and same-name-sibling collisions.
    pub const COLLISION: Self = Self(1 << 5);
    /// Everything.
    pub const ALL: Self = Self(0b11_1111);

    /// `true` iff every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` with the bits of `other` cleared.
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for CheckOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for CheckOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (bit, label) in [
            (Self::ACCESS, "ACCESS"),
            (Self::LOCK, "LOCK"),
            (Self::VERSIONING, "VERSIONING"),
            (Self::CONSTRAINTS, "CONSTRAINTS"),
            (Self::REFERENCES, "REFERENCES"),
            (Self::COLLISION, "COLLISION"),
        ] {
            if self.contains(bit) {
                set.entry(&label);
            }
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_algebra() {
        let opts = CheckOptions::ACCESS | CheckOptions::LOCK;
        assert!(opts.contains(CheckOptions::ACCESS));
        assert!(opts.contains(CheckOptions::LOCK));
        assert!(!opts.contains(CheckOptions::REFERENCES));
        assert!(CheckOptions::ALL.contains(opts));
        assert!(!CheckOptions::NONE.contains(CheckOptions::ACCESS));

        let narrowed = CheckOptions::ALL.without(CheckOptions::REFERENCES);
        assert!(!narrowed.contains(CheckOptions::REFERENCES));
        assert!(narrowed.contains(CheckOptions::CONSTRAINTS));
    }
}
