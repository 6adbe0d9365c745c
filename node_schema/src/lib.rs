//! The node-type schema engine.
//!
//! The [`NodeTypeRegistry`] is the source of truth for the repository schema
//! and the constraint oracle for every write. It keeps two definition
//! sources - an immutable built-in catalog parsed from an embedded resource,
//! and editable custom definitions persisted through a [`DefinitionStore`] -
//! and resolves inheritance and aggregation into cached
//! [`EffectiveNodeType`]s:
//!
//! ```text
//!    register(def)            effective_node_type(names)
//!          │                              │
//!          ▼                              ▼
//!    ┌───────────┐  provisional    ┌─────────────┐ miss ┌────────────┐
//!    │ validator │ ──────────────► │ weighted    │ ───► │ aggregate  │
//!    └───────────┘     map         │ ENT cache   │      │ + memoize  │
//!          │                       └─────────────┘      └────────────┘
//!          ▼
//!    ┌───────────┐
//!    │ def store │  (custom definitions only)
//!    └───────────┘
//! ```
//!
//! Validation runs against a *provisional* map so that a batch of definitions
//! may cross-reference within itself before any of them is visible.

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

mod builtin;
mod cache;
mod effective;
mod error;
mod registry;
mod store;
mod validate;

pub use effective::EffectiveNodeType;
pub use error::{InvalidNodeTypeDef, NodeTypeConflict, RegistryError};
pub use registry::{
    ContentClearance, NodeTypeRegistry, PermissiveContentCheck, UnsupportedContentCheck,
};
pub use store::{DefinitionStore, DefinitionStoreError, MemDefinitionStore};

/// A specialized `Result` for registry operations.
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
