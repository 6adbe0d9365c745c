//! Item identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::names::Name;

/// The identity of a node. Never changes after creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(Uuid);

/// The fixed identity of the repository root node.
pub const ROOT_NODE_ID: NodeId = NodeId(Uuid::from_u128(1));

impl NodeId {
    /// Wrap an existing UUID.
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Allocate a fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The wrapped UUID.
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// Parse the canonical hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The identity of a property: its parent node plus its qualified name.
///
/// Properties carry no UUID of their own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyId {
    parent: NodeId,
    name: Name,
}

impl PropertyId {
    /// Address the property `name` on the node `parent`.
    pub fn new(parent: NodeId, name: Name) -> Self {
        Self { parent, name }
    }

    /// The owning node.
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// The property name.
    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}

/// Either kind of item identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemId {
    /// A node.
    Node(NodeId),
    /// A property.
    Property(PropertyId),
}

impl ItemId {
    /// `true` for node identities.
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    /// The node identity, if this is one.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Property(_) => None,
        }
    }

    /// The property identity, if this is one.
    pub fn as_property(&self) -> Option<&PropertyId> {
        match self {
            Self::Node(_) => None,
            Self::Property(id) => Some(id),
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        Self::Property(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => id.fmt(f),
            Self::Property(id) => id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::Name;

    #[test]
    fn node_id_display_round_trips() {
        let id = NodeId::random();
        assert_eq!(NodeId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn root_id_is_stable() {
        assert_eq!(
            ROOT_NODE_ID.to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn item_id_accessors() {
        let node = NodeId::random();
        let prop = PropertyId::new(node, Name::unqualified("title"));

        let id = ItemId::from(node);
        assert!(id.is_node());
        assert_eq!(id.as_node(), Some(node));
        assert_eq!(id.as_property(), None);

        let id = ItemId::from(prop.clone());
        assert!(!id.is_node());
        assert_eq!(id.as_property(), Some(&prop));
    }
}
