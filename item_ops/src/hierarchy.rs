//! Path ↔ item-id resolution.

use std::sync::Arc;

use data_types::{ItemId, NodeId, Path, PathElement, PropertyId, ROOT_NODE_ID};
use item_state::{SessionItemStateManager, StateError};

use crate::error::OpsError;
use crate::Result;

/// A stateless view over the session state manager that walks child-node
/// entries and property names.
///
/// Indices are 1-based; a step without an index addresses index 1.
#[derive(Debug)]
pub struct HierarchyResolver {
    state: Arc<SessionItemStateManager>,
}

impl HierarchyResolver {
    /// A resolver over `state`.
    pub fn new(state: Arc<SessionItemStateManager>) -> Self {
        Self { state }
    }

    /// Resolve an absolute path to an item id.
    ///
    /// A final step that matches no child-node entry falls back to the
    /// property of that name.
    pub fn resolve(&self, path: &Path) -> Result<ItemId> {
        let mut current = ROOT_NODE_ID;
        let elements = path.elements();
        for (pos, element) in elements.iter().enumerate() {
            let node = self.node_or_not_found(&current, path)?;
            match node.child_id(element.name(), element.index()) {
                Some(child) => current = child,
                None => {
                    let is_last = pos == elements.len() - 1;
                    if is_last && element.index() == 1 && node.has_property(element.name()) {
                        return Ok(ItemId::Property(PropertyId::new(
                            current,
                            element.name().clone(),
                        )));
                    }
                    return Err(OpsError::PathNotFound { path: path.clone() });
                }
            }
        }
        Ok(ItemId::Node(current))
    }

    /// Resolve an absolute path that must address a node.
    pub fn resolve_node(&self, path: &Path) -> Result<NodeId> {
        match self.resolve(path)? {
            ItemId::Node(id) => Ok(id),
            ItemId::Property(_) => Err(OpsError::PathNotFound { path: path.clone() }),
        }
    }

    /// The path of an item, climbed over primary parents back to the root.
    pub fn path_of(&self, id: &ItemId) -> Result<Path> {
        let (mut current, mut elements) = match id {
            ItemId::Node(n) => (*n, Vec::new()),
            ItemId::Property(p) => (p.parent(), vec![PathElement::new(p.name().clone())]),
        };
        while current != ROOT_NODE_ID {
            let node = self
                .state
                .get_node(&current)
                .map_err(|e| item_gone(e, ItemId::Node(current)))?;
            let Some(parent_id) = node.primary_parent() else {
                // a detached root that is not the repository root
                return Err(OpsError::ItemNotFound {
                    id: ItemId::Node(current),
                });
            };
            let parent = self
                .state
                .get_node(&parent_id)
                .map_err(|e| item_gone(e, ItemId::Node(parent_id)))?;
            let (name, index) =
                parent
                    .child_position(&current)
                    .ok_or(OpsError::ItemNotFound {
                        id: ItemId::Node(current),
                    })?;
            elements.push(PathElement::with_index(name, index));
            current = parent_id;
        }
        elements.reverse();
        let mut path = Path::root();
        for element in elements {
            path = path.child(element);
        }
        Ok(path)
    }

    fn node_or_not_found(&self, id: &NodeId, path: &Path) -> Result<data_types::NodeState> {
        self.state.get_node(id).map_err(|e| match e {
            StateError::NoSuchItemState { .. } => OpsError::PathNotFound { path: path.clone() },
            e => e.into(),
        })
    }
}

fn item_gone(e: StateError, id: ItemId) -> OpsError {
    match e {
        StateError::NoSuchItemState { .. } => OpsError::ItemNotFound { id },
        e => e.into(),
    }
}
