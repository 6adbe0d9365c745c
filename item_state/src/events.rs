//! Observation events emitted at commit.

use data_types::{ItemId, Path};

/// What happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The item was created.
    Added,
    /// The item's state was overwritten.
    Modified,
    /// The item was removed.
    Removed,
}

/// One committed state change, emitted in commit order.
#[derive(Debug, Clone)]
pub struct RepositoryEvent {
    /// The item the change applies to.
    pub id: ItemId,
    /// The kind of change.
    pub kind: EventKind,
    /// For removed items, the path the item had before removal, resolved
    /// before the state was disposed. Absent for other kinds.
    pub path: Option<Path>,
}

/// A registered observation callback.
///
/// Callbacks run on the committing thread while the workspace manager holds
/// its lock; they must be quick and must not call back into the manager.
pub trait EventListener: Send + Sync {
    /// Called once per committed state change, in commit order.
    fn on_event(&self, event: &RepositoryEvent);
}
