//! Registry error types.

use data_types::Name;
use thiserror::Error;

/// Errors emitted by the node-type registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested node type is not registered.
    #[error("no such node type: {0}")]
    NoSuchNodeType(Name),

    /// An effective type was requested for an empty name set.
    #[error("an effective type needs at least one member type")]
    EmptyAggregate,

    /// A definition with this name is already registered.
    #[error("node type already registered: {0}")]
    AlreadyRegistered(Name),

    /// A submitted definition failed validation.
    #[error(transparent)]
    InvalidDefinition(#[from] InvalidNodeTypeDef),

    /// Two definitions could not be aggregated.
    #[error(transparent)]
    Conflict(#[from] NodeTypeConflict),

    /// Built-in types cannot be unregistered or reregistered.
    #[error("cannot modify built-in node type: {0}")]
    BuiltIn(Name),

    /// Other registered types still depend on the target.
    #[error("node type {name} is still referenced by {dependents:?}")]
    HasDependents {
        /// The type being unregistered.
        name: Name,
        /// The types whose dependency sets contain it.
        dependents: Vec<Name>,
    },

    /// The operation needs a capability that is not implemented, e.g. the
    /// content-clearance scan.
    #[error("not implemented: {0}")]
    Unsupported(&'static str),

    /// The custom-definition store failed.
    #[error(transparent)]
    DefinitionStore(#[from] crate::store::DefinitionStoreError),
}

/// A submitted node-type definition is invalid.
#[derive(Debug, Error)]
pub enum InvalidNodeTypeDef {
    /// The definition's own name is unusable.
    #[error("node type name {name} is invalid: {reason}")]
    BadName {
        /// The offending name.
        name: Name,
        /// Why it is rejected.
        reason: String,
    },

    /// A name's namespace is not registered.
    #[error("node type {name}: namespace {uri:?} is not registered")]
    UnregisteredNamespace {
        /// The defining type.
        name: Name,
        /// The unknown namespace URI.
        uri: String,
    },

    /// A declared supertype is not in the (provisional) registry.
    #[error("node type {name}: unknown supertype {supertype}")]
    UnknownSupertype {
        /// The defining type.
        name: Name,
        /// The missing supertype.
        supertype: Name,
    },

    /// A type listed itself as a supertype.
    #[error("node type {name} lists itself as a supertype")]
    SelfSupertype {
        /// The defining type.
        name: Name,
    },

    /// The supertype graph contains a cycle.
    #[error("inheritance cycle: {}", format_cycle(cycle))]
    InheritanceCycle {
        /// The names along the cycle, first repeated at the end.
        cycle: Vec<Name>,
    },

    /// The auto-created-child default-type closure contains a cycle.
    #[error("auto-creation cycle: {}", format_cycle(cycle))]
    AutoCreationCycle {
        /// The names along the cycle, first repeated at the end.
        cycle: Vec<Name>,
    },

    /// A non-mixin type whose effective type does not include the base type.
    #[error("node type {name}: a non-mixin type must have {base} in its effective type")]
    MissingBaseType {
        /// The defining type.
        name: Name,
        /// The required base type name.
        base: Name,
    },

    /// A property definition is malformed.
    #[error("node type {name}: property definition {prop}: {reason}")]
    BadPropertyDef {
        /// The defining type.
        name: Name,
        /// The property definition's name.
        prop: Name,
        /// Why it is rejected.
        reason: String,
    },

    /// A child-node definition is malformed.
    #[error("node type {name}: child node definition {child}: {reason}")]
    BadChildNodeDef {
        /// The defining type.
        name: Name,
        /// The child definition's name.
        child: Name,
        /// Why it is rejected.
        reason: String,
    },

    /// Merging the definition with its supertypes failed.
    #[error(transparent)]
    Conflict(#[from] NodeTypeConflict),
}

fn format_cycle(cycle: &[Name]) -> String {
    cycle
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Two definitions with the same name impose incompatible constraints and
/// cannot live in one effective type.
#[derive(Debug, Error)]
#[error("node type aggregation conflict on {name}: {reason}")]
pub struct NodeTypeConflict {
    /// The contested definition name.
    pub name: Name,
    /// What is incompatible.
    pub reason: String,
}
