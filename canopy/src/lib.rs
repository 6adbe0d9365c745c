//! canopy: a hierarchical content repository engine.
//!
//! A typed, versioned tree of named nodes and properties persisted on top of
//! a pluggable key-value store, with session-scoped transactional mutation
//! and a node-type schema governing every tree change.
//!
//! ```text
//!             ┌────────────┐  open_session()  ┌─────────────┐
//!             │ Repository │ ───────────────► │   Session   │
//!             └─────┬──────┘                  └──────┬──────┘
//!                   │ owns                           │ stages, saves
//!      ┌────────────┼──────────────┐                 ▼
//!      ▼            ▼              ▼          ┌──────────────┐
//! ┌─────────┐ ┌───────────┐ ┌────────────┐   │ item_ops +   │
//! │ shared  │ │ node-type │ │ namespace  │   │ item_state   │
//! │ states  │ │ registry  │ │ registry   │   │ (per session)│
//! └────┬────┘ └───────────┘ └────────────┘   └──────────────┘
//!      ▼
//! ┌─────────┐
//! │  store  │
//! └─────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use canopy::{Repository, Value};
//! use item_store::mem::MemStore;
//!
//! let repository = Repository::new(Arc::new(MemStore::new())).unwrap();
//! let session = repository.open_session();
//!
//! session.add_node("/notes", None).unwrap();
//! session
//!     .set_property("/notes", "title", Value::String("hello".into()))
//!     .unwrap();
//! session.save().unwrap();
//!
//! let other = repository.open_session();
//! let title = other.property("/notes/title").unwrap();
//! assert_eq!(title.values(), &[Value::String("hello".into())]);
//! ```

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
use parking_lot as _;
#[cfg(test)]
use pretty_assertions as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use test_helpers as _;
use workspace_hack as _;

mod error;
mod repository;
mod session;

pub use error::Error;
pub use repository::{Repository, RepositoryBuilder};
pub use session::Session;

// the vocabulary a repository consumer speaks
pub use data_types::{
    well_known, BinaryValue, BlobId, ChildNodeDef, ChildNodeEntry, ItemId, Name,
    NamespaceRegistry, NodeId, NodeReferences, NodeState, NodeTypeDef, Path, PropertyDef,
    PropertyId, PropertyState, PropertyType, Value, ROOT_NODE_ID,
};
pub use item_ops::CopyMode;
pub use item_state::{EventKind, EventListener, RepositoryEvent};

/// A specialized `Result` for repository operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
