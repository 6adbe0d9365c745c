//! Item-state management: the two-level state machine of the repository.
//!
//! ```text
//!   Session A                 Session B
//!   ┌──────────────────┐      ┌──────────────────┐
//!   │ SessionItemState │      │ SessionItemState │   transient overlays
//!   │ Manager          │      │ Manager          │   (NEW / MODIFIED /
//!   └────────┬─────────┘      └────────┬─────────┘    REMOVED / STALE)
//!            │  save(change log)       │
//!            ▼                         ▼
//!   ┌─────────────────────────────────────────────┐
//!   │ SharedItemStateManager                      │  weak-value cache,
//!   │   execute(change log) ── events ── staleness│  references index
//!   └──────────────────────┬──────────────────────┘
//!                          ▼
//!                 ┌─────────────────┐
//!                 │ item_store      │  transactional byte store
//!                 └─────────────────┘
//! ```
//!
//! The [`SharedItemStateManager`] is the authoritative, process-wide view of
//! persistent items. Each session owns a [`SessionItemStateManager`]: a
//! transient overlay of working copies that is committed as a whole change
//! log, or reverted.

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

mod change_log;
mod error;
mod events;
mod session;
mod shared;
mod status;

pub use change_log::{ChangeLog, DeletedEntry, ModifiedEntry, Operation};
pub use error::StateError;
pub use events::{EventKind, EventListener, RepositoryEvent};
pub use session::SessionItemStateManager;
pub use shared::SharedItemStateManager;
pub use status::ItemStatus;

/// A specialized `Result` for state-layer operations.
pub type Result<T, E = StateError> = std::result::Result<T, E>;
