//! Operation-layer errors.

use data_types::{ItemId, NodeId, Path, ValueFormatError};
use item_state::StateError;
use node_schema::RegistryError;
use thiserror::Error;

/// Errors emitted by the batched item operations.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A new item's identity or path collides with one already present.
    #[error("item already exists: {0}")]
    ItemExists(String),

    /// The addressed item does not exist.
    #[error("item not found: {id}")]
    ItemNotFound {
        /// The missing item.
        id: ItemId,
    },

    /// A path did not resolve.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The unresolvable path.
        path: Path,
    },

    /// A path argument is unusable for this operation (relative where
    /// absolute is needed, explicit index on a destination name, root as a
    /// removal target).
    #[error("invalid path argument: {0}")]
    BadPath(String),

    /// A node-type rule was violated: mandatory item missing, protected item
    /// touched, cardinality or same-name-sibling policy breached, value
    /// constraint failed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Removing a referenced node, or referencing a non-referenceable one.
    #[error("referential integrity: node {id}: {reason}")]
    ReferentialIntegrity {
        /// The reference target.
        id: NodeId,
        /// What is violated.
        reason: String,
    },

    /// The access oracle refused the operation.
    #[error("access denied: {id}")]
    AccessDenied {
        /// The protected item.
        id: ItemId,
    },

    /// A lock held by another session covers the item.
    #[error("node {id} is locked by another session")]
    Locked {
        /// The locked node.
        id: NodeId,
    },

    /// The node (or an ancestor) is not checked out.
    #[error("node {id} is not checked out")]
    NotCheckedOut {
        /// The checked-in node.
        id: NodeId,
    },

    /// A value could not be converted to the required type.
    #[error(transparent)]
    ValueFormat(#[from] ValueFormatError),

    /// The node-type registry refused the request.
    #[error(transparent)]
    NodeType(#[from] RegistryError),

    /// The state layer failed beneath the operation.
    #[error(transparent)]
    State(#[from] StateError),
}
