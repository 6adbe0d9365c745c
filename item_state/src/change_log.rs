//! The change log: the unit of commit.

use data_types::{ItemData, ItemId, Name, NodeId, PropertyId};

/// A pending tree operation recorded by the operation layer.
///
/// Operations ride along in the session until a save that covers their
/// affected items commits them, or a revert that covers them disposes them.
#[derive(Debug, Clone)]
pub enum Operation {
    /// A node was added under `parent`.
    AddNode {
        /// The parent the entry was appended to.
        parent: NodeId,
        /// The new node.
        node: NodeId,
        /// The child name.
        name: Name,
    },
    /// A property was added.
    AddProperty {
        /// The new property.
        id: PropertyId,
    },
    /// A property's values were replaced.
    SetProperty {
        /// The property.
        id: PropertyId,
    },
    /// An item (and, for nodes, its subtree) was removed.
    RemoveItem {
        /// The removed item.
        id: ItemId,
        /// Everything removed with it, the item included.
        removed: Vec<ItemId>,
    },
    /// A node was moved or renamed.
    Move {
        /// The moved node.
        node: NodeId,
        /// The parent it was unlinked from.
        source_parent: NodeId,
        /// The parent it was linked into.
        destination_parent: NodeId,
    },
    /// A subtree was copied or cloned.
    Copy {
        /// The parent the copy was linked into.
        destination_parent: NodeId,
        /// The root of the new subtree.
        destination_root: NodeId,
        /// Every state the copy created.
        created: Vec<ItemId>,
    },
    /// A child entry was reordered.
    ReorderChildren {
        /// The parent whose order changed.
        parent: NodeId,
    },
    /// A node's mixin set changed.
    SetMixins {
        /// The node.
        node: NodeId,
    },
}

impl Operation {
    /// Every item this operation touches.
    pub fn affected(&self) -> Vec<ItemId> {
        match self {
            Self::AddNode { parent, node, .. } => {
                vec![ItemId::Node(*parent), ItemId::Node(*node)]
            }
            Self::AddProperty { id } | Self::SetProperty { id } => {
                vec![ItemId::Node(id.parent()), ItemId::Property(id.clone())]
            }
            Self::RemoveItem { id, removed } => {
                let mut out = removed.clone();
                if !out.contains(id) {
                    out.push(id.clone());
                }
                out
            }
            Self::Move {
                node,
                source_parent,
                destination_parent,
            } => vec![
                ItemId::Node(*node),
                ItemId::Node(*source_parent),
                ItemId::Node(*destination_parent),
            ],
            Self::Copy {
                destination_parent,
                destination_root,
                created,
            } => {
                let mut out = created.clone();
                out.push(ItemId::Node(*destination_parent));
                if !out.contains(&ItemId::Node(*destination_root)) {
                    out.push(ItemId::Node(*destination_root));
                }
                out
            }
            Self::ReorderChildren { parent } => vec![ItemId::Node(*parent)],
            Self::SetMixins { node } => vec![ItemId::Node(*node)],
        }
    }

    /// `true` iff this operation touches any of `ids`.
    pub fn touches_any(&self, ids: &std::collections::HashSet<ItemId>) -> bool {
        self.affected().iter().any(|id| ids.contains(id))
    }

    /// `true` iff this operation touches nothing outside `ids`.
    pub fn touches_only(&self, ids: &std::collections::HashSet<ItemId>) -> bool {
        self.affected().iter().all(|id| ids.contains(id))
    }
}

/// A record scheduled for overwrite.
#[derive(Debug, Clone)]
pub struct ModifiedEntry {
    /// The new body.
    pub data: ItemData,
    /// The modification count the session last saw; divergence means the
    /// session state is stale.
    pub base_mod_count: u64,
}

/// A record scheduled for deletion.
#[derive(Debug, Clone)]
pub struct DeletedEntry {
    /// The item to delete.
    pub id: ItemId,
    /// The modification count the session last saw; divergence means the
    /// session state is stale.
    pub base_mod_count: u64,
}

/// The unit of commit: the partitioned state sets plus the ordered operation
/// list that produced them.
///
/// At most one entry exists per item id; the partition is derived from the
/// session statuses, so repeated modifications of one item collapse into a
/// single entry naturally.
#[derive(Debug, Default)]
pub struct ChangeLog {
    added: Vec<ItemData>,
    modified: Vec<ModifiedEntry>,
    deleted: Vec<DeletedEntry>,
    operations: Vec<Operation>,
}

impl ChangeLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a brand-new record.
    pub fn added(&mut self, data: ItemData) {
        debug_assert!(!self.contains(&data.id()));
        self.added.push(data);
    }

    /// Schedule an overwrite of a record whose stored modification count is
    /// expected to be `base_mod_count`.
    pub fn modified(&mut self, data: ItemData, base_mod_count: u64) {
        debug_assert!(!self.contains(&data.id()));
        self.modified.push(ModifiedEntry {
            data,
            base_mod_count,
        });
    }

    /// Schedule a deletion.
    pub fn deleted(&mut self, id: ItemId, base_mod_count: u64) {
        debug_assert!(!self.contains(&id));
        self.deleted.push(DeletedEntry { id, base_mod_count });
    }

    /// Attach an operation.
    pub fn push_operation(&mut self, op: Operation) {
        self.operations.push(op);
    }

    /// The new records, in schedule order.
    pub fn added_states(&self) -> &[ItemData] {
        &self.added
    }

    /// The overwrites, in schedule order.
    pub fn modified_entries(&self) -> &[ModifiedEntry] {
        &self.modified
    }

    /// The deletions, in schedule order.
    pub fn deleted_entries(&self) -> &[DeletedEntry] {
        &self.deleted
    }

    /// The operations included in this commit.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// `true` iff no state change is scheduled.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Every item id scheduled in this log.
    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.added
            .iter()
            .map(|d| d.id())
            .chain(self.modified.iter().map(|m| m.data.id()))
            .chain(self.deleted.iter().map(|d| d.id.clone()))
    }

    fn contains(&self, id: &ItemId) -> bool {
        self.added.iter().any(|d| &d.id() == id)
            || self.modified.iter().any(|m| &m.data.id() == id)
            || self.deleted.iter().any(|d| &d.id == id)
    }
}
