//! Traits for the persistent store and the blob substore.

use std::fmt::Debug;
use std::io::Read;
use std::sync::Arc;

use data_types::{BlobId, ItemId, NodeId, NodeReferences, NodeState, PropertyId, PropertyState};
use thiserror::Error;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("no such item in store: {id}")]
    NotFound {
        /// The missing item.
        id: ItemId,
    },

    /// The requested references record does not exist.
    #[error("no references record for node: {id}")]
    ReferencesNotFound {
        /// The would-be target node.
        id: NodeId,
    },

    /// The requested blob does not exist.
    #[error("no such blob: {id}")]
    BlobNotFound {
        /// The missing blob.
        id: BlobId,
    },

    /// `begin` was called while a transaction was open, or a commit/rollback
    /// arrived without one.
    #[error("transaction state error: {0}")]
    Transaction(&'static str),

    /// An I/O failure at the byte layer.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("store failure: {0}")]
    Internal(String),
}

/// A specialized `Result` for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// The byte-level persistence boundary.
///
/// The store is the transaction unit of the repository: a change log is
/// applied between `begin` and `commit`, and a failed application is followed
/// by `rollback`, after which the store must present its pre-`begin` content.
///
/// Implementations serve whole records; they never interpret tree structure.
pub trait Store: Debug + Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> Result<()>;

    /// Atomically publish everything stored/destroyed since `begin`.
    fn commit(&self) -> Result<()>;

    /// Discard everything stored/destroyed since `begin`.
    fn rollback(&self) -> Result<()>;

    /// Load a node body.
    fn load_node(&self, id: &NodeId) -> Result<NodeState>;

    /// Load a property body.
    fn load_property(&self, id: &PropertyId) -> Result<PropertyState>;

    /// Load the references record of a node.
    fn load_references(&self, id: &NodeId) -> Result<NodeReferences>;

    /// Write a node body (insert or overwrite).
    fn store_node(&self, state: &NodeState) -> Result<()>;

    /// Write a property body (insert or overwrite).
    fn store_property(&self, state: &PropertyState) -> Result<()>;

    /// Write a references record (insert or overwrite).
    fn store_references(&self, refs: &NodeReferences) -> Result<()>;

    /// Delete a node body. Deleting a missing record is not an error.
    fn destroy_node(&self, id: &NodeId) -> Result<()>;

    /// Delete a property body. Deleting a missing record is not an error.
    fn destroy_property(&self, id: &PropertyId) -> Result<()>;

    /// Delete a references record. Deleting a missing record is not an error.
    fn destroy_references(&self, id: &NodeId) -> Result<()>;

    /// Existence check without materializing the body.
    fn exists(&self, id: &ItemId) -> Result<bool>;

    /// Existence check for a references record.
    fn exists_references(&self, id: &NodeId) -> Result<bool>;

    /// The blob substore for out-of-line binary payloads.
    fn blobs(&self) -> Arc<dyn BlobStore>;
}

/// The opaque blob substore.
///
/// Blob writes take effect immediately; they are not scoped to the record
/// transaction. Orphaned blobs are reclaimed by release calls from the
/// operation layer.
pub trait BlobStore: Debug + Send + Sync {
    /// Store `len` bytes read from `data` under `id`.
    fn put(&self, id: BlobId, data: &mut dyn Read, len: u64) -> Result<()>;

    /// Open the payload stored under `id`.
    fn get(&self, id: &BlobId) -> Result<Box<dyn Read + Send>>;

    /// Delete the payload stored under `id`. Deleting a missing blob is not
    /// an error.
    fn remove(&self, id: &BlobId) -> Result<()>;
}
