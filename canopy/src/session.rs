//! The session: the path-addressed convenience layer.

use std::sync::Arc;

use data_types::{
    ItemId, Name, NamespaceRegistry, NodeId, NodeState, Path, PathElement, PropertyId,
    PropertyState, Value, ROOT_NODE_ID,
};
use item_ops::{BatchedItemOperations, CheckOptions, CopyMode, OpsError, Validator};
use item_state::SessionItemStateManager;
use observability_deps::tracing::debug;

use crate::error::Error;
use crate::Result;

/// A single-threaded unit of work against the repository.
///
/// Mutations stage transient state; nothing is persisted until [`save`]
/// commits the change log, and [`revert`] throws uncommitted work away.
/// Every mutation runs the full precondition check set.
///
/// [`save`]: Session::save
/// [`revert`]: Session::revert
#[derive(Debug)]
pub struct Session {
    manager: Arc<SessionItemStateManager>,
    ops: BatchedItemOperations,
    validator: Validator,
    namespaces: Arc<NamespaceRegistry>,
}

impl Session {
    pub(crate) fn new(
        manager: Arc<SessionItemStateManager>,
        ops: BatchedItemOperations,
        validator: Validator,
        namespaces: Arc<NamespaceRegistry>,
    ) -> Self {
        Self {
            manager,
            ops,
            validator,
            namespaces,
        }
    }

    /// The node at `path`, as this session sees it.
    pub fn node(&self, path: &str) -> Result<NodeState> {
        let id = self.resolve_node(path)?;
        Ok(self.manager.get_node(&id)?)
    }

    /// The property at `path` (its final step names the property).
    pub fn property(&self, path: &str) -> Result<PropertyState> {
        let parsed = self.parse_path(path)?;
        match self.ops.hierarchy().resolve(&parsed)? {
            ItemId::Property(id) => Ok(self.manager.get_property(&id)?),
            ItemId::Node(_) => Err(OpsError::PathNotFound { path: parsed }.into()),
        }
    }

    /// `true` iff an item exists at `path` in this session's view.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let parsed = self.parse_path(path)?;
        match self.ops.hierarchy().resolve(&parsed) {
            Ok(id) => Ok(self.manager.has_item(&id)?),
            Err(OpsError::PathNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// The path of a node id, e.g. for event correlation.
    pub fn path_of(&self, id: &ItemId) -> Result<String> {
        let path = self.ops.hierarchy().path_of(id)?;
        Ok(path.format(&self.namespaces)?)
    }

    /// Add a node at `path`; its final step is the new child's name. With no
    /// `primary_type`, the applicable definition's default applies.
    pub fn add_node(&self, path: &str, primary_type: Option<&str>) -> Result<NodeId> {
        let (parent_id, name) = self.split_for_creation(path)?;
        let primary_type = primary_type
            .map(|t| Name::parse(t, &self.namespaces))
            .transpose()?;
        Ok(self.ops.add_node(
            &parent_id,
            &name,
            primary_type.as_ref(),
            None,
            CheckOptions::ALL,
        )?)
    }

    /// Add a node with a predefined identity.
    pub fn add_node_with_uuid(
        &self,
        path: &str,
        primary_type: Option<&str>,
        uuid: NodeId,
    ) -> Result<NodeId> {
        let (parent_id, name) = self.split_for_creation(path)?;
        let primary_type = primary_type
            .map(|t| Name::parse(t, &self.namespaces))
            .transpose()?;
        Ok(self.ops.add_node(
            &parent_id,
            &name,
            primary_type.as_ref(),
            Some(uuid),
            CheckOptions::ALL,
        )?)
    }

    /// Store a single-valued property on the node at `node_path`, creating
    /// or overwriting it.
    pub fn set_property(&self, node_path: &str, name: &str, value: Value) -> Result<()> {
        self.set_property_values(node_path, name, vec![value], false)
    }

    /// Store a multi-valued property on the node at `node_path`.
    pub fn set_multi_property(
        &self,
        node_path: &str,
        name: &str,
        values: Vec<Value>,
    ) -> Result<()> {
        self.set_property_values(node_path, name, values, true)
    }

    fn set_property_values(
        &self,
        node_path: &str,
        name: &str,
        values: Vec<Value>,
        multiple: bool,
    ) -> Result<()> {
        let node_id = self.resolve_node(node_path)?;
        let name = Name::parse(name, &self.namespaces)?;
        let node = self.manager.get_node(&node_id)?;
        if node.has_property(&name) {
            let id = PropertyId::new(node_id, name);
            self.ops
                .set_property(&id, Some(values), CheckOptions::ALL)?;
        } else {
            self.ops
                .add_property(&node_id, &name, values, multiple, CheckOptions::ALL)?;
        }
        Ok(())
    }

    /// Remove the property `name` from the node at `node_path`. Storing a
    /// null has the same effect.
    pub fn remove_property(&self, node_path: &str, name: &str) -> Result<()> {
        let node_id = self.resolve_node(node_path)?;
        let name = Name::parse(name, &self.namespaces)?;
        let id = PropertyId::new(node_id, name);
        self.ops.set_property(&id, None, CheckOptions::ALL)?;
        Ok(())
    }

    /// Remove the item at `path` (a node takes its subtree with it).
    pub fn remove(&self, path: &str) -> Result<()> {
        let parsed = self.parse_path(path)?;
        let id = self.ops.hierarchy().resolve(&parsed)?;
        self.ops.remove_item(&id, CheckOptions::ALL)?;
        Ok(())
    }

    /// Move the node at `src` to `dst`. The destination name must not carry
    /// an explicit same-name-sibling index.
    pub fn move_item(&self, src: &str, dst: &str) -> Result<()> {
        if dst.ends_with(']') {
            return Err(Error::InvalidArgument(format!(
                "destination name must not carry an index: {dst}"
            )));
        }
        let src = self.parse_path(src)?;
        let dst = self.parse_path(dst)?;
        self.ops.move_item(&src, &dst, CheckOptions::ALL)?;
        Ok(())
    }

    /// Copy the subtree at `src` to `dst`; every copied node gets a fresh
    /// identity and copied references are rewritten onto the copies.
    pub fn copy(&self, src: &str, dst: &str) -> Result<NodeId> {
        self.copy_with_mode(src, dst, CopyMode::Copy)
    }

    /// Clone the subtree at `src` to `dst`, keeping the identities of
    /// referenceable nodes. With `remove_existing`, colliding nodes are
    /// removed first; without it a collision fails.
    pub fn clone_item(&self, src: &str, dst: &str, remove_existing: bool) -> Result<NodeId> {
        let mode = if remove_existing {
            CopyMode::CloneRemoveExisting
        } else {
            CopyMode::Clone
        };
        self.copy_with_mode(src, dst, mode)
    }

    fn copy_with_mode(&self, src: &str, dst: &str, mode: CopyMode) -> Result<NodeId> {
        if dst.ends_with(']') {
            return Err(Error::InvalidArgument(format!(
                "destination name must not carry an index: {dst}"
            )));
        }
        let src = self.parse_path(src)?;
        let dst = self.parse_path(dst)?;
        Ok(self.ops.copy(&src, &dst, mode, CheckOptions::ALL)?)
    }

    /// Reorder the child `child` of the node at `parent_path` to sit before
    /// `before`, or last when `before` is `None`. Steps are `name` or
    /// `name[index]`.
    pub fn reorder(&self, parent_path: &str, child: &str, before: Option<&str>) -> Result<()> {
        let parent_id = self.resolve_node(parent_path)?;
        let child = self.parse_element(child)?;
        let before = before.map(|b| self.parse_element(b)).transpose()?;
        self.ops
            .reorder_child(&parent_id, &child, before.as_ref(), CheckOptions::ALL)?;
        Ok(())
    }

    /// Add a mixin to the node at `path`.
    pub fn add_mixin(&self, path: &str, mixin: &str) -> Result<()> {
        let id = self.resolve_node(path)?;
        let mixin = Name::parse(mixin, &self.namespaces)?;
        self.ops.add_mixin(&id, &mixin, CheckOptions::ALL)?;
        Ok(())
    }

    /// Remove a mixin from the node at `path`.
    pub fn remove_mixin(&self, path: &str, mixin: &str) -> Result<()> {
        let id = self.resolve_node(path)?;
        let mixin = Name::parse(mixin, &self.namespaces)?;
        self.ops.remove_mixin(&id, &mixin, CheckOptions::ALL)?;
        Ok(())
    }

    /// Commit everything this session has staged.
    ///
    /// Validation runs first; a failure of either phase leaves the transient
    /// state untouched.
    pub fn save(&self) -> Result<()> {
        self.save_item(&ItemId::Node(ROOT_NODE_ID))
    }

    /// Commit the subtree at `path` only. The change set below that subtree
    /// must be self-contained.
    pub fn save_path(&self, path: &str) -> Result<()> {
        let parsed = self.parse_path(path)?;
        let id = self.ops.hierarchy().resolve(&parsed)?;
        self.save_item(&id)
    }

    fn save_item(&self, id: &ItemId) -> Result<()> {
        self.validator.validate_subtree(id)?;
        self.manager.save(id)?;
        debug!(root = %id, "session saved");
        Ok(())
    }

    /// Throw away everything this session has staged.
    pub fn revert(&self) -> Result<()> {
        self.manager.revert_all();
        Ok(())
    }

    /// Throw away the staged changes below `path` only.
    pub fn revert_path(&self, path: &str) -> Result<()> {
        let parsed = self.parse_path(path)?;
        let id = self.ops.hierarchy().resolve(&parsed)?;
        self.manager.revert(&id)?;
        Ok(())
    }

    /// `true` iff this session holds uncommitted changes.
    pub fn has_pending_changes(&self) -> bool {
        self.manager.has_pending_changes()
    }

    /// The underlying state manager, for state-level introspection.
    pub fn state_manager(&self) -> &Arc<SessionItemStateManager> {
        &self.manager
    }

    /// The underlying operations, for callers that need explicit
    /// [`CheckOptions`].
    pub fn operations(&self) -> &BatchedItemOperations {
        &self.ops
    }

    fn parse_path(&self, path: &str) -> Result<Path> {
        Ok(Path::parse(path, &self.namespaces)?)
    }

    fn resolve_node(&self, path: &str) -> Result<NodeId> {
        let parsed = self.parse_path(path)?;
        Ok(self.ops.hierarchy().resolve_node(&parsed)?)
    }

    /// Split a creation path into (existing parent id, new item name); the
    /// final step must carry no explicit index.
    fn split_for_creation(&self, path: &str) -> Result<(NodeId, Name)> {
        if path.ends_with(']') {
            return Err(Error::InvalidArgument(format!(
                "a new item's name must not carry an index: {path}"
            )));
        }
        let parsed = self.parse_path(path)?;
        let Some(element) = parsed.last() else {
            return Err(Error::InvalidArgument(
                "the root cannot be created".to_string(),
            ));
        };
        let name = element.name().clone();
        let parent = parsed.parent().expect("non-root path has a parent");
        let parent_id = self.ops.hierarchy().resolve_node(&parent)?;
        Ok((parent_id, name))
    }

    fn parse_element(&self, step: &str) -> Result<PathElement> {
        let path = Path::parse(&format!("/{step}"), &self.namespaces)?;
        let element = path
            .last()
            .ok_or_else(|| Error::InvalidArgument(format!("empty path step: {step:?}")))?;
        Ok(element.clone())
    }
}
