//! The repository-level error type.

use data_types::{NamespaceError, PathParseError};
use item_ops::OpsError;
use item_state::StateError;
use item_store::interface::StoreError;
use node_schema::RegistryError;
use thiserror::Error;

/// Any failure a repository caller can observe.
///
/// The inner kinds stay visible: callers match on the layer that produced
/// the failure (`Ops` for tree-operation preconditions, `State` for commit
/// and staleness, `NodeTypes` for schema problems).
#[derive(Debug, Error)]
pub enum Error {
    /// A tree operation refused its preconditions.
    #[error(transparent)]
    Ops(#[from] OpsError),

    /// The state layer failed (missing, stale, non-self-contained, commit).
    #[error(transparent)]
    State(#[from] StateError),

    /// The node-type registry refused the request.
    #[error(transparent)]
    NodeTypes(#[from] RegistryError),

    /// The store failed directly.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A name or prefix did not resolve.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// A path string did not parse.
    #[error(transparent)]
    PathParse(#[from] PathParseError),

    /// An argument is unusable regardless of repository state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
