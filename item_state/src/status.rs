//! The transient state machine.

use std::fmt;

/// The lifecycle status of an item state held in memory.
///
/// ```text
/// NEW ──────────commit──────────► (disposed, re-read as EXISTING)
/// EXISTING ─────modify──────────► EXISTING_MODIFIED ──commit──► EXISTING
/// EXISTING ─────remove──────────► EXISTING_REMOVED ───commit──► (disposed)
/// EXISTING[_MODIFIED] ──external change──► STALE_MODIFIED | STALE_DESTROYED
/// STALE_* terminal until revert()
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Exists only in the session overlay; nothing is persisted yet.
    New,
    /// An unmodified copy of the persisted state.
    Existing,
    /// A modified copy of the persisted state.
    ExistingModified,
    /// Marked for removal; the removal happens at save.
    ExistingRemoved,
    /// The persisted state changed underneath the session copy.
    StaleModified,
    /// The persisted state vanished underneath the session copy.
    StaleDestroyed,
    /// The state is unusable (disposed or mid-transition).
    Undefined,
}

impl ItemStatus {
    /// `true` for the two stale statuses.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleModified | Self::StaleDestroyed)
    }

    /// `true` iff this status represents an uncommitted session change.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::New | Self::ExistingModified | Self::ExistingRemoved
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Existing => "EXISTING",
            Self::ExistingModified => "EXISTING_MODIFIED",
            Self::ExistingRemoved => "EXISTING_REMOVED",
            Self::StaleModified => "STALE_MODIFIED",
            Self::StaleDestroyed => "STALE_DESTROYED",
            Self::Undefined => "UNDEFINED",
        };
        write!(f, "{s}")
    }
}
