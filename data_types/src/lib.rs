//! Shared data types for the canopy content repository.
//!
//! This crate defines the vocabulary every other layer speaks: item
//! identifiers, qualified names and namespaces, paths, typed values, node-type
//! definitions, and the persisted state records for nodes, properties and the
//! references index. It holds no behaviour beyond what the data itself owns -
//! the state managers and the operation layer live in their own crates.

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

mod ids;
mod names;
mod nodetype;
mod path;
mod references;
mod states;
mod value;

pub use ids::{ItemId, NodeId, PropertyId, ROOT_NODE_ID};
pub use names::{
    well_known, Name, NamespaceError, NamespaceRegistry, NS_DEFAULT_URI, NS_MIX_PREFIX, NS_MIX_URI,
    NS_SYS_PREFIX, NS_SYS_URI,
};
pub use nodetype::{
    ChildNodeDef, NodeDefId, NodeTypeDef, OnParentVersion, PropDefId, PropertyDef,
};
pub use path::{Path, PathElement, PathParseError};
pub use references::NodeReferences;
pub use states::{ChildNodeEntry, ItemData, NodeState, PropertyState};
pub use value::{BinaryValue, BlobId, PropertyType, Value, ValueFormatError};
