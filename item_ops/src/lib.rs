//! The batched item operations: every tree mutation of the repository goes
//! through this crate.
//!
//! [`BatchedItemOperations`] validates each mutation against the node-type
//! registry and the access/lock/version oracles, stages transient states in
//! the session state manager, and records a pending [`Operation`] per
//! mutation:
//!
//! ```text
//!   Session façade
//!        │ add_node / set_property / remove / move / copy …
//!        ▼
//!   ┌─────────────────────┐   applicable defs   ┌──────────────────┐
//!   │ BatchedItemOps      │ ──────────────────► │ NodeTypeRegistry │
//!   │  precondition checks│                     └──────────────────┘
//!   │  state staging      │   oracles: access / lock / version
//!   └─────────┬───────────┘
//!             ▼
//!   ┌─────────────────────┐
//!   │ SessionItemState    │  transient overlay + pending operations
//!   │ Manager             │
//!   └─────────────────────┘
//! ```
//!
//! The [`HierarchyResolver`] maps paths to item ids and back, and the
//! [`Validator`] runs the pre-save constraint sweep (mandatory items, value
//! types, same-name-sibling policy, reference targets).
//!
//! [`Operation`]: item_state::Operation

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    unused_crate_dependencies
)]

// Workaround for "unused crate" lint false positives.
#[cfg(test)]
use test_helpers as _;
use workspace_hack as _;

mod error;
mod hierarchy;
mod ops;
mod options;
mod oracles;
mod validator;

pub use error::OpsError;
pub use hierarchy::HierarchyResolver;
pub use ops::{BatchedItemOperations, CopyMode};
pub use options::CheckOptions;
pub use oracles::{
    AccessOracle, AlwaysCheckedOut, LockOracle, NoLocks, OpenAccess, Permission, VersionOracle,
};
pub use validator::Validator;

/// A specialized `Result` for operation-layer calls.
pub type Result<T, E = OpsError> = std::result::Result<T, E>;
