//! State-layer errors.

use data_types::{ItemId, NodeId};
use item_store::interface::StoreError;
use thiserror::Error;

/// Errors emitted by the state managers.
#[derive(Debug, Error)]
pub enum StateError {
    /// The state layer cannot produce the requested state.
    #[error("no such item state: {id}")]
    NoSuchItemState {
        /// The missing item.
        id: ItemId,
    },

    /// A new item's identity collides with one already present.
    #[error("item state already exists: {id}")]
    ItemExists {
        /// The colliding item.
        id: ItemId,
    },

    /// The session's view of the item has diverged from the persisted one.
    #[error("stale item state: {id}")]
    StaleItemState {
        /// The diverged item.
        id: ItemId,
    },

    /// A change set depends on an item outside the save scope; the caller
    /// must save a wider subtree.
    #[error("change set is not self-contained, it also affects {missing}")]
    NotSelfContained {
        /// The dependent outside the scope.
        missing: ItemId,
    },

    /// A NEW node cannot root a save; its parent linkage lives outside it.
    #[error("cannot save new item {id} independently of its parent")]
    OrphanedNew {
        /// The offending new item.
        id: ItemId,
    },

    /// Committing the change would leave a dangling reference or remove a
    /// node that is still referenced.
    #[error("referential integrity violated for node {id}: {reason}")]
    ReferentialIntegrity {
        /// The reference target.
        id: NodeId,
        /// What is violated.
        reason: String,
    },

    /// The store failed beneath the state layer.
    #[error(transparent)]
    Store(#[from] StoreError),
}
