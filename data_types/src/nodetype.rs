//! Node-type definitions.
//!
//! These are the raw, declared definitions as submitted to (and persisted by)
//! the node-type registry. Inheritance resolution and aggregation live in the
//! `node_schema` crate; this module only owns the data and the per-definition
//! dependency set.

use std::collections::BTreeSet;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::names::Name;
use crate::value::{PropertyType, Value};

/// Behaviour of an item when its parent is versioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnParentVersion {
    /// The item is copied into the version.
    #[default]
    Copy,
    /// The item is versioned with the parent.
    Version,
    /// The item is re-initialized from its defaults.
    Initialize,
    /// The item's value is computed anew.
    Compute,
    /// The item is left out of the version.
    Ignore,
    /// Versioning the parent fails.
    Abort,
}

/// The identity of a property definition: declaring type plus definition name
/// (which may be residual).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropDefId {
    /// The node type declaring the definition.
    pub declaring_type: Name,
    /// The definition's name, `*` for residual definitions.
    pub name: Name,
}

/// The identity of a child-node definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeDefId {
    /// The node type declaring the definition.
    pub declaring_type: Name,
    /// The definition's name, `*` for residual definitions.
    pub name: Name,
}

/// A declared property definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// The node type declaring this definition.
    pub declaring_type: Name,
    /// The property name this definition covers; `*` matches any name not
    /// covered by a named definition.
    pub name: Name,
    /// The required value type; `UNDEFINED` admits any type.
    #[serde(default = "undefined_type")]
    pub required_type: PropertyType,
    /// Materialized automatically when the parent is created.
    #[serde(default)]
    pub auto_created: bool,
    /// Must exist on every node of the declaring type.
    #[serde(default)]
    pub mandatory: bool,
    /// Only the implementation may write it.
    #[serde(default)]
    pub protected: bool,
    /// Multi-valued.
    #[serde(default)]
    pub multiple: bool,
    /// Behaviour under parent versioning.
    #[serde(default)]
    pub on_parent_version: OnParentVersion,
    /// Value constraints; for REFERENCE properties each names a node type the
    /// target must satisfy.
    #[serde(default)]
    pub value_constraints: Vec<String>,
    /// Default values installed on auto-creation (unless computed).
    #[serde(default)]
    pub default_values: Vec<Value>,
}

impl PropertyDef {
    /// This definition's identity.
    pub fn id(&self) -> PropDefId {
        PropDefId {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
        }
    }

    /// `true` iff this is a residual (`*`) definition.
    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }
}

fn undefined_type() -> PropertyType {
    PropertyType::Undefined
}

/// A declared child-node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildNodeDef {
    /// The node type declaring this definition.
    pub declaring_type: Name,
    /// The child name this definition covers; `*` matches any name not
    /// covered by a named definition.
    pub name: Name,
    /// Node types every matching child must satisfy; empty means
    /// unconstrained.
    #[serde(default)]
    pub required_primary_types: Vec<Name>,
    /// The primary type assumed when a child is added without one.
    #[serde(default)]
    pub default_primary_type: Option<Name>,
    /// Materialized automatically when the parent is created.
    #[serde(default)]
    pub auto_created: bool,
    /// Must exist on every node of the declaring type.
    #[serde(default)]
    pub mandatory: bool,
    /// Only the implementation may write it.
    #[serde(default)]
    pub protected: bool,
    /// Behaviour under parent versioning.
    #[serde(default)]
    pub on_parent_version: OnParentVersion,
    /// Whether several children of this name may coexist.
    #[serde(default)]
    pub allows_same_name_siblings: bool,
}

impl ChildNodeDef {
    /// This definition's identity.
    pub fn id(&self) -> NodeDefId {
        NodeDefId {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
        }
    }

    /// `true` iff this is a residual (`*`) definition.
    pub fn is_residual(&self) -> bool {
        self.name.is_residual()
    }
}

/// A declared node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeDef {
    /// The type's qualified name.
    pub name: Name,
    /// Declared supertypes.
    #[serde(default)]
    pub supertypes: Vec<Name>,
    /// Mixin types contribute definitions without forming the primary
    /// hierarchy.
    #[serde(default)]
    pub mixin: bool,
    /// Whether child-node order is significant and client-controllable.
    #[serde(default)]
    pub orderable_child_nodes: bool,
    /// Name of the primary item, if the type declares one.
    #[serde(default)]
    pub primary_item: Option<Name>,
    /// Declared property definitions.
    #[serde(default)]
    pub property_defs: Vec<PropertyDef>,
    /// Declared child-node definitions.
    #[serde(default)]
    pub child_node_defs: Vec<ChildNodeDef>,

    #[serde(skip)]
    dependencies: OnceCell<BTreeSet<Name>>,
}

impl NodeTypeDef {
    /// A minimal definition with the given name and supertypes.
    pub fn new(name: Name, supertypes: Vec<Name>) -> Self {
        Self {
            name,
            supertypes,
            mixin: false,
            orderable_child_nodes: false,
            primary_item: None,
            property_defs: Vec::new(),
            child_node_defs: Vec::new(),
            dependencies: OnceCell::new(),
        }
    }

    /// Every other node-type name this definition refers to: supertypes,
    /// required and default child primary types, and REFERENCE value
    /// constraints. The defining type itself is excluded.
    ///
    /// Computed once on first use.
    pub fn dependencies(&self) -> &BTreeSet<Name> {
        self.dependencies.get_or_init(|| {
            let mut deps = BTreeSet::new();
            deps.extend(self.supertypes.iter().cloned());
            for child in &self.child_node_defs {
                deps.extend(child.required_primary_types.iter().cloned());
                deps.extend(child.default_primary_type.iter().cloned());
            }
            for prop in &self.property_defs {
                if prop.required_type == PropertyType::Reference {
                    for constraint in &prop.value_constraints {
                        if let Ok(name) = Name::from_expanded(constraint) {
                            deps.insert(name);
                        }
                    }
                }
            }
            deps.remove(&self.name);
            deps
        })
    }
}

// The lazily computed dependency cache is excluded from equality.
impl PartialEq for NodeTypeDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.supertypes == other.supertypes
            && self.mixin == other.mixin
            && self.orderable_child_nodes == other.orderable_child_nodes
            && self.primary_item == other.primary_item
            && self.property_defs == other.property_defs
            && self.child_node_defs == other.child_node_defs
    }
}
