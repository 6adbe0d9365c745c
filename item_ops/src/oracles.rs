//! The access, lock and version oracles.
//!
//! The core does not implement access control, locking or versioning; it
//! only honors their verdicts at well-defined precondition points. Each
//! oracle has a permissive default for deployments without that subsystem.

use std::fmt::Debug;

use data_types::{ItemId, NodeId};

/// What an operation wants to do to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Read the item.
    Read,
    /// Create or modify the item or its children.
    Write,
    /// Remove the item.
    Remove,
}

/// Answers yes/no access questions.
pub trait AccessOracle: Debug + Send + Sync {
    /// `true` iff the session may apply `permission` to `id`.
    fn is_granted(&self, id: &ItemId, permission: Permission) -> bool;
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl AccessOracle for OpenAccess {
    fn is_granted(&self, _id: &ItemId, _permission: Permission) -> bool {
        true
    }
}

/// Answers whether a lock held by another session covers a node.
pub trait LockOracle: Debug + Send + Sync {
    /// `true` iff `session_id` may write under `node`.
    fn is_lock_free(&self, node: &NodeId, session_id: u64) -> bool;
}

/// No locking subsystem: nothing is ever locked.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocks;

impl LockOracle for NoLocks {
    fn is_lock_free(&self, _node: &NodeId, _session_id: u64) -> bool {
        true
    }
}

/// Answers checked-out questions for versionable nodes.
pub trait VersionOracle: Debug + Send + Sync {
    /// `true` iff `node` (or its nearest versionable ancestor) is checked
    /// out.
    fn is_checked_out(&self, node: &NodeId) -> bool;
}

/// No versioning subsystem: everything is checked out.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysCheckedOut;

impl VersionOracle for AlwaysCheckedOut {
    fn is_checked_out(&self, _node: &NodeId) -> bool {
        true
    }
}
