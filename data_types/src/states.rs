//! Persisted state records for nodes and properties.
//!
//! These records are what the store persists and what the state managers
//! layer. Parent/child linkage is expressed as identifier pairs, never as
//! pointers, so the records themselves are plain data (spillable, clonable,
//! comparable).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, NodeId, PropertyId};
use crate::names::Name;
use crate::nodetype::{NodeDefId, PropDefId};
use crate::value::{PropertyType, Value};

/// One entry of a node's ordered child list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildNodeEntry {
    /// The child's name under this parent.
    pub name: Name,
    /// The child's identity.
    pub id: NodeId,
}

/// The persisted body of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    id: NodeId,
    primary_type: Name,
    mixins: BTreeSet<Name>,
    definition: Option<NodeDefId>,
    /// All parents; the first entry is the primary parent. Empty only for the
    /// root node.
    parents: Vec<NodeId>,
    children: Vec<ChildNodeEntry>,
    property_names: BTreeSet<Name>,
    mod_count: u64,
}

impl NodeState {
    /// A fresh node body with no children or properties.
    pub fn new(id: NodeId, primary_type: Name, parent: Option<NodeId>) -> Self {
        Self {
            id,
            primary_type,
            mixins: BTreeSet::new(),
            definition: None,
            parents: parent.into_iter().collect(),
            children: Vec::new(),
            property_names: BTreeSet::new(),
            mod_count: 0,
        }
    }

    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// This node's identity as an [`ItemId`].
    pub fn item_id(&self) -> ItemId {
        ItemId::Node(self.id)
    }

    /// The primary node type.
    pub fn primary_type(&self) -> &Name {
        &self.primary_type
    }

    /// Replace the primary node type.
    pub fn set_primary_type(&mut self, primary_type: Name) {
        self.primary_type = primary_type;
    }

    /// The mixin type names.
    pub fn mixins(&self) -> &BTreeSet<Name> {
        &self.mixins
    }

    /// Add a mixin; returns `false` if already present.
    pub fn add_mixin(&mut self, mixin: Name) -> bool {
        self.mixins.insert(mixin)
    }

    /// Remove a mixin; returns `false` if absent.
    pub fn remove_mixin(&mut self, mixin: &Name) -> bool {
        self.mixins.remove(mixin)
    }

    /// Primary type plus mixins: the name set whose effective type governs
    /// this node.
    pub fn type_names(&self) -> Vec<Name> {
        std::iter::once(self.primary_type.clone())
            .chain(self.mixins.iter().cloned())
            .collect()
    }

    /// The applicable child-node definition this node was created under.
    pub fn definition(&self) -> Option<&NodeDefId> {
        self.definition.as_ref()
    }

    /// Record the applicable child-node definition.
    pub fn set_definition(&mut self, definition: Option<NodeDefId>) {
        self.definition = definition;
    }

    /// The primary parent, `None` for the root.
    pub fn primary_parent(&self) -> Option<NodeId> {
        self.parents.first().copied()
    }

    /// All parents, primary first.
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// `true` iff the node is linked into more than one parent.
    pub fn is_shared(&self) -> bool {
        self.parents.len() > 1
    }

    /// Link an additional (shared) parent. The first linked parent is the
    /// primary one.
    pub fn add_parent(&mut self, parent: NodeId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    /// Unlink `parent`; returns `false` if it was not linked.
    pub fn remove_parent(&mut self, parent: &NodeId) -> bool {
        match self.parents.iter().position(|p| p == parent) {
            Some(idx) => {
                self.parents.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Make `parent` the primary parent, linking it if necessary.
    pub fn set_primary_parent(&mut self, parent: NodeId) {
        self.remove_parent(&parent);
        self.parents.insert(0, parent);
    }

    /// The ordered child entries.
    pub fn child_entries(&self) -> &[ChildNodeEntry] {
        &self.children
    }

    /// Append a child entry, returning its 1-based same-name-sibling index.
    pub fn add_child_entry(&mut self, name: Name, id: NodeId) -> u32 {
        let index = self.same_name_sibling_count(&name) as u32 + 1;
        self.children.push(ChildNodeEntry { name, id });
        index
    }

    /// Remove the entry for `id`, returning it if present.
    pub fn remove_child_entry(&mut self, id: &NodeId) -> Option<ChildNodeEntry> {
        let idx = self.children.iter().position(|e| &e.id == id)?;
        Some(self.children.remove(idx))
    }

    /// Rename the entry for `id`; returns `false` if absent.
    pub fn rename_child_entry(&mut self, id: &NodeId, name: Name) -> bool {
        match self.children.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                entry.name = name;
                true
            }
            None => false,
        }
    }

    /// Move the entry for `id` immediately before the entry for `before`, or
    /// to the end when `before` is `None`. Returns `false` if either entry is
    /// missing.
    pub fn reorder_child_entry(&mut self, id: &NodeId, before: Option<&NodeId>) -> bool {
        let Some(from) = self.children.iter().position(|e| &e.id == id) else {
            return false;
        };
        let entry = self.children.remove(from);
        match before {
            Some(before) => match self.children.iter().position(|e| &e.id == before) {
                Some(to) => {
                    self.children.insert(to, entry);
                    true
                }
                None => {
                    // restore; the anchor does not exist
                    self.children.insert(from, entry);
                    false
                }
            },
            None => {
                self.children.push(entry);
                true
            }
        }
    }

    /// The child with the given name and 1-based index.
    pub fn child_id(&self, name: &Name, index: u32) -> Option<NodeId> {
        self.children
            .iter()
            .filter(|e| &e.name == name)
            .nth(index.checked_sub(1)? as usize)
            .map(|e| e.id)
    }

    /// The name and 1-based index of the child `id`.
    pub fn child_position(&self, id: &NodeId) -> Option<(Name, u32)> {
        let entry = self.children.iter().find(|e| &e.id == id)?;
        let index = self
            .children
            .iter()
            .take_while(|e| &e.id != id)
            .filter(|e| e.name == entry.name)
            .count() as u32
            + 1;
        Some((entry.name.clone(), index))
    }

    /// How many children currently carry `name`.
    pub fn same_name_sibling_count(&self, name: &Name) -> usize {
        self.children.iter().filter(|e| &e.name == name).count()
    }

    /// `true` iff a child entry with `name` exists.
    pub fn has_child_with_name(&self, name: &Name) -> bool {
        self.children.iter().any(|e| &e.name == name)
    }

    /// The names of the properties present on this node.
    pub fn property_names(&self) -> &BTreeSet<Name> {
        &self.property_names
    }

    /// `true` iff a property with `name` exists.
    pub fn has_property(&self, name: &Name) -> bool {
        self.property_names.contains(name)
    }

    /// Record a property; returns `false` if already present.
    pub fn add_property_name(&mut self, name: Name) -> bool {
        self.property_names.insert(name)
    }

    /// Forget a property; returns `false` if absent.
    pub fn remove_property_name(&mut self, name: &Name) -> bool {
        self.property_names.remove(name)
    }

    /// The monotonic modification counter, bumped on every committed change.
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    /// Bump the modification counter. Called by the workspace layer at commit.
    pub fn touch(&mut self) {
        self.mod_count = self.mod_count.wrapping_add(1);
    }

    /// Overwrite the modification counter. Reserved to the workspace layer,
    /// which keeps the counter monotonic across overwrites.
    pub fn set_mod_count(&mut self, mod_count: u64) {
        self.mod_count = mod_count;
    }
}

/// The persisted body of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    parent: NodeId,
    name: Name,
    ty: PropertyType,
    multi_valued: bool,
    values: Vec<Value>,
    definition: Option<PropDefId>,
    mod_count: u64,
}

impl PropertyState {
    /// A fresh property body with no values.
    pub fn new(parent: NodeId, name: Name, ty: PropertyType, multi_valued: bool) -> Self {
        Self {
            parent,
            name,
            ty,
            multi_valued,
            values: Vec::new(),
            definition: None,
            mod_count: 0,
        }
    }

    /// This property's identity.
    pub fn id(&self) -> PropertyId {
        PropertyId::new(self.parent, self.name.clone())
    }

    /// This property's identity as an [`ItemId`].
    pub fn item_id(&self) -> ItemId {
        ItemId::Property(self.id())
    }

    /// The owning node.
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Re-home the property; used when the owning subtree is copied.
    pub fn set_parent(&mut self, parent: NodeId) {
        self.parent = parent;
    }

    /// The property name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The runtime type of the stored values.
    pub fn ty(&self) -> PropertyType {
        self.ty
    }

    /// Whether the property is multi-valued.
    pub fn is_multi_valued(&self) -> bool {
        self.multi_valued
    }

    /// The stored values, in order. A single-valued property has exactly one.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Install new values and their runtime type.
    pub fn set_values(&mut self, ty: PropertyType, values: Vec<Value>) {
        debug_assert!(values.iter().all(|v| v.ty() == ty));
        self.ty = ty;
        self.values = values;
    }

    /// The applicable property definition this property was created under.
    pub fn definition(&self) -> Option<&PropDefId> {
        self.definition.as_ref()
    }

    /// Record the applicable property definition.
    pub fn set_definition(&mut self, definition: Option<PropDefId>) {
        self.definition = definition;
    }

    /// The monotonic modification counter, bumped on every committed change.
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    /// Bump the modification counter. Called by the workspace layer at commit.
    pub fn touch(&mut self) {
        self.mod_count = self.mod_count.wrapping_add(1);
    }

    /// Overwrite the modification counter. Reserved to the workspace layer,
    /// which keeps the counter monotonic across overwrites.
    pub fn set_mod_count(&mut self, mod_count: u64) {
        self.mod_count = mod_count;
    }
}

/// Either kind of item body. The unit the change log and the store deal in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemData {
    /// A node body.
    Node(NodeState),
    /// A property body.
    Property(PropertyState),
}

impl ItemData {
    /// The item's identity.
    pub fn id(&self) -> ItemId {
        match self {
            Self::Node(n) => n.item_id(),
            Self::Property(p) => p.item_id(),
        }
    }

    /// The modification counter of the wrapped body.
    pub fn mod_count(&self) -> u64 {
        match self {
            Self::Node(n) => n.mod_count(),
            Self::Property(p) => p.mod_count(),
        }
    }

    /// Bump the wrapped body's modification counter.
    pub fn touch(&mut self) {
        match self {
            Self::Node(n) => n.touch(),
            Self::Property(p) => p.touch(),
        }
    }

    /// Overwrite the wrapped body's modification counter.
    pub fn set_mod_count(&mut self, mod_count: u64) {
        match self {
            Self::Node(n) => n.set_mod_count(mod_count),
            Self::Property(p) => p.set_mod_count(mod_count),
        }
    }

    /// The node body, if this is one.
    pub fn as_node(&self) -> Option<&NodeState> {
        match self {
            Self::Node(n) => Some(n),
            Self::Property(_) => None,
        }
    }

    /// The property body, if this is one.
    pub fn as_property(&self) -> Option<&PropertyState> {
        match self {
            Self::Node(_) => None,
            Self::Property(p) => Some(p),
        }
    }
}

impl From<NodeState> for ItemData {
    fn from(n: NodeState) -> Self {
        Self::Node(n)
    }
}

impl From<PropertyState> for ItemData {
    fn from(p: PropertyState) -> Self {
        Self::Property(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeState {
        NodeState::new(
            NodeId::random(),
            Name::new(crate::names::NS_SYS_URI, "unstructured"),
            Some(NodeId::random()),
        )
    }

    #[test]
    fn child_entries_index_same_name_siblings() {
        let mut n = node();
        let (a, b, c) = (NodeId::random(), NodeId::random(), NodeId::random());
        assert_eq!(n.add_child_entry(Name::unqualified("x"), a), 1);
        assert_eq!(n.add_child_entry(Name::unqualified("y"), b), 1);
        assert_eq!(n.add_child_entry(Name::unqualified("x"), c), 2);

        assert_eq!(n.child_id(&Name::unqualified("x"), 1), Some(a));
        assert_eq!(n.child_id(&Name::unqualified("x"), 2), Some(c));
        assert_eq!(n.child_id(&Name::unqualified("x"), 3), None);
        assert_eq!(n.child_position(&c), Some((Name::unqualified("x"), 2)));
        assert_eq!(n.same_name_sibling_count(&Name::unqualified("x")), 2);

        // removing the first sibling shifts the second one down
        n.remove_child_entry(&a).unwrap();
        assert_eq!(n.child_id(&Name::unqualified("x"), 1), Some(c));
        assert_eq!(n.child_position(&c), Some((Name::unqualified("x"), 1)));
    }

    #[test]
    fn reorder_child_entry_moves_before_anchor() {
        let mut n = node();
        let (a, b, c) = (NodeId::random(), NodeId::random(), NodeId::random());
        n.add_child_entry(Name::unqualified("a"), a);
        n.add_child_entry(Name::unqualified("b"), b);
        n.add_child_entry(Name::unqualified("c"), c);

        assert!(n.reorder_child_entry(&c, Some(&a)));
        let order: Vec<_> = n.child_entries().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![c, a, b]);

        assert!(n.reorder_child_entry(&c, None));
        let order: Vec<_> = n.child_entries().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![a, b, c]);

        // a missing anchor leaves the order untouched
        assert!(!n.reorder_child_entry(&a, Some(&NodeId::random())));
        let order: Vec<_> = n.child_entries().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn primary_parent_is_first() {
        let mut n = node();
        let first = n.primary_parent().unwrap();
        let other = NodeId::random();
        n.add_parent(other);
        assert!(n.is_shared());
        assert_eq!(n.primary_parent(), Some(first));

        n.set_primary_parent(other);
        assert_eq!(n.primary_parent(), Some(other));
        assert_eq!(n.parents().len(), 2);

        assert!(n.remove_parent(&first));
        assert!(!n.is_shared());
        assert_eq!(n.primary_parent(), Some(other));
    }
}
