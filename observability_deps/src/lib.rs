//! This crate exists to coordinate versions of `tracing` and related crates
//! so that we can manage their updates in a single crate.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

pub use tracing;
