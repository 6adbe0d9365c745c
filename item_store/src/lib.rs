//! The persistent store boundary.
//!
//! Everything below the workspace state manager is hidden behind the
//! [`interface::Store`] trait: a byte-level, transactional key-value codec for
//! node bodies, property bodies and reference records, with an opaque blob
//! substore for large binary payloads. The in-memory implementation in
//! [`mem`] is the reference used throughout the test suites.

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

pub mod interface;
pub mod mem;
