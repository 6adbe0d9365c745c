//! The batched tree operations.

use std::collections::HashMap;
use std::sync::Arc;

use data_types::{
    well_known, BinaryValue, BlobId, ChildNodeDef, ItemData, ItemId, Name, NodeDefId, NodeId,
    NodeState, Path, PathElement, PropDefId, PropertyDef, PropertyId, PropertyState, PropertyType,
    Value,
};
use item_state::{Operation, SessionItemStateManager};
use item_store::interface::{BlobStore as _, Store as _};
use node_schema::{EffectiveNodeType, NodeTypeRegistry};
use observability_deps::tracing::{debug, warn};
use repo_time::TimeProvider;

use crate::error::OpsError;
use crate::hierarchy::HierarchyResolver;
use crate::options::CheckOptions;
use crate::oracles::{AccessOracle, LockOracle, Permission, VersionOracle};
use crate::Result;

/// BINARY values above this size leave the record body and live in the blob
/// substore instead.
const BLOB_INLINE_MAX: usize = 4096;

/// UUID policy of a subtree copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Every new node gets a fresh UUID; references inside the copied
    /// subtree are rewritten onto the copies.
    Copy,
    /// Referenceable nodes keep their UUID; a collision fails.
    Clone,
    /// Referenceable nodes keep their UUID; a colliding existing node is
    /// removed first.
    CloneRemoveExisting,
}

/// Executes every tree mutation: consults the registry, checks the oracles,
/// stages transient state, and records pending operations.
#[derive(Debug)]
pub struct BatchedItemOperations {
    state: Arc<SessionItemStateManager>,
    registry: Arc<NodeTypeRegistry>,
    hierarchy: HierarchyResolver,
    access: Arc<dyn AccessOracle>,
    locks: Arc<dyn LockOracle>,
    versions: Arc<dyn VersionOracle>,
    time: Arc<dyn TimeProvider>,
}

impl BatchedItemOperations {
    /// Wire the operations over a session state manager and its
    /// collaborators.
    pub fn new(
        state: Arc<SessionItemStateManager>,
        registry: Arc<NodeTypeRegistry>,
        access: Arc<dyn AccessOracle>,
        locks: Arc<dyn LockOracle>,
        versions: Arc<dyn VersionOracle>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let hierarchy = HierarchyResolver::new(Arc::clone(&state));
        Self {
            state,
            registry,
            hierarchy,
            access,
            locks,
            versions,
            time,
        }
    }

    /// The session state manager the operations stage into.
    pub fn state(&self) -> &Arc<SessionItemStateManager> {
        &self.state
    }

    /// The registry the operations validate against.
    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    /// The path resolver over the same session view.
    pub fn hierarchy(&self) -> &HierarchyResolver {
        &self.hierarchy
    }

    /// Add a child node under `parent_id`.
    ///
    /// With no `primary_type`, the applicable child-node definition's default
    /// primary type is used. A supplied `uuid` that already exists anywhere
    /// fails with `ItemExists`. Auto-created properties and children of the
    /// new node are materialized depth-first.
    pub fn add_node(
        &self,
        parent_id: &NodeId,
        name: &Name,
        primary_type: Option<&Name>,
        uuid: Option<NodeId>,
        options: CheckOptions,
    ) -> Result<NodeId> {
        let parent = self.existing_node(parent_id)?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;
        if options.contains(CheckOptions::CONSTRAINTS) {
            self.check_not_protected(&parent)?;
        }

        let parent_ent = self.effective_type_of(&parent)?;
        let child_ent = primary_type
            .map(|t| self.registry.effective_node_type(t))
            .transpose()?;
        let def = parent_ent
            .applicable_child_node_def(name, child_ent.as_deref())
            .ok_or_else(|| {
                OpsError::ConstraintViolation(format!(
                    "no child-node definition of {} applies to {name}",
                    parent.primary_type()
                ))
            })?
            .clone();
        if options.contains(CheckOptions::CONSTRAINTS) && def.protected {
            return Err(OpsError::ConstraintViolation(format!(
                "child {name} is protected on {}",
                parent.primary_type()
            )));
        }
        let resolved_type = match primary_type.or(def.default_primary_type.as_ref()) {
            Some(t) => t.clone(),
            None => {
                return Err(OpsError::ConstraintViolation(format!(
                    "no primary type given for {name} and its definition has no default"
                )))
            }
        };

        if options.contains(CheckOptions::COLLISION) {
            if parent.has_property(name) {
                return Err(OpsError::ItemExists(format!(
                    "a property named {name} exists on the parent"
                )));
            }
            if parent.has_child_with_name(name) && !def.allows_same_name_siblings {
                return Err(OpsError::ItemExists(format!(
                    "a child named {name} exists and same-name siblings are not allowed"
                )));
            }
        }
        if let Some(id) = uuid {
            if self.state.has_item(&ItemId::Node(id))? {
                return Err(OpsError::ItemExists(format!(
                    "a node with uuid {id} already exists"
                )));
            }
        }

        let node_id = uuid.unwrap_or_else(NodeId::random);
        let mut created = Vec::new();
        self.build_new_node(&mut created, node_id, &resolved_type, &def, *parent_id)?;
        let installed = self.install(created)?;
        if let Err(e) = self.state.modify_node(parent_id, |p| {
            p.add_child_entry(name.clone(), node_id);
        }) {
            self.unwind(&installed);
            return Err(e.into());
        }
        self.state.add_operation(Operation::AddNode {
            parent: *parent_id,
            node: node_id,
            name: name.clone(),
        });
        debug!(parent = %parent_id, node = %node_id, %name, ty = %resolved_type, "added node");
        Ok(node_id)
    }

    /// Add a property on `parent_id` holding `values`.
    pub fn add_property(
        &self,
        parent_id: &NodeId,
        name: &Name,
        values: Vec<Value>,
        multiple: bool,
        options: CheckOptions,
    ) -> Result<PropertyId> {
        let parent = self.existing_node(parent_id)?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;

        if options.contains(CheckOptions::COLLISION) {
            if parent.has_child_with_name(name) {
                return Err(OpsError::ItemExists(format!(
                    "a child node named {name} exists on the parent"
                )));
            }
            if parent.has_property(name) {
                return Err(OpsError::ItemExists(format!(
                    "a property named {name} already exists"
                )));
            }
        }
        if !multiple && values.len() != 1 {
            return Err(OpsError::ConstraintViolation(format!(
                "single-valued property {name} takes exactly one value, got {}",
                values.len()
            )));
        }

        let value_type = values.first().map(Value::ty).unwrap_or(PropertyType::String);
        if values.iter().any(|v| v.ty() != value_type) {
            return Err(OpsError::ConstraintViolation(format!(
                "values of {name} have mixed types"
            )));
        }

        let parent_ent = self.effective_type_of(&parent)?;
        let def = parent_ent
            .applicable_property_def(name, value_type, multiple)
            .ok_or_else(|| {
                OpsError::ConstraintViolation(format!(
                    "no property definition of {} applies to {name}",
                    parent.primary_type()
                ))
            })?
            .clone();
        if options.contains(CheckOptions::CONSTRAINTS) && def.protected {
            return Err(OpsError::ConstraintViolation(format!(
                "property {name} is protected on {}",
                parent.primary_type()
            )));
        }

        let (ty, values) = coerce_values(values, def.required_type, value_type)?;
        let values = self.externalize_binaries(values)?;

        let id = PropertyId::new(*parent_id, name.clone());
        let mut prop = PropertyState::new(*parent_id, name.clone(), ty, multiple);
        prop.set_values(ty, values);
        prop.set_definition(Some(def.id()));
        self.state.create_property(prop)?;
        if let Err(e) = self.state.modify_node(parent_id, |p| {
            p.add_property_name(name.clone());
        }) {
            self.unwind(&[ItemId::Property(id.clone())]);
            return Err(e.into());
        }
        self.state
            .add_operation(Operation::AddProperty { id: id.clone() });
        debug!(parent = %parent_id, %name, %ty, "added property");
        Ok(id)
    }

    /// Replace the values of an existing property. Passing `None` removes
    /// the property, which is what storing a null means.
    pub fn set_property(
        &self,
        id: &PropertyId,
        values: Option<Vec<Value>>,
        options: CheckOptions,
    ) -> Result<()> {
        let Some(values) = values else {
            return self.remove_item(&ItemId::Property(id.clone()), options);
        };

        if !self.state.has_item(&ItemId::Property(id.clone()))? {
            return Err(OpsError::ItemNotFound {
                id: ItemId::Property(id.clone()),
            });
        }
        let parent = self.existing_node(&id.parent())?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;

        let prop = self.state.get_property(id)?;
        let def = prop.definition().and_then(|d| self.find_prop_def(d));
        if options.contains(CheckOptions::CONSTRAINTS) {
            if let Some(def) = &def {
                if def.protected {
                    return Err(OpsError::ConstraintViolation(format!(
                        "property {} is protected",
                        id.name()
                    )));
                }
                if !def.multiple && values.len() != 1 {
                    return Err(OpsError::ConstraintViolation(format!(
                        "single-valued property {} takes exactly one value, got {}",
                        id.name(),
                        values.len()
                    )));
                }
            }
        }

        let value_type = values.first().map(Value::ty).unwrap_or(prop.ty());
        if values.iter().any(|v| v.ty() != value_type) {
            return Err(OpsError::ConstraintViolation(format!(
                "values of {} have mixed types",
                id.name()
            )));
        }
        let required = def.map(|d| d.required_type).unwrap_or(PropertyType::Undefined);
        let (ty, values) = coerce_values(values, required, value_type)?;
        let values = self.externalize_binaries(values)?;

        self.state.modify_property(id, |p| {
            p.set_values(ty, values);
        })?;

        // outgoing externally stored binaries are released once the new
        // values are installed
        for value in prop.values() {
            if let Value::Binary(BinaryValue::External { id: blob_id, .. }) = value {
                if let Err(e) = self.state.shared().store().blobs().remove(blob_id) {
                    warn!(blob_id = %blob_id, error = %e, "failed to release blob");
                }
            }
        }
        self.state
            .add_operation(Operation::SetProperty { id: id.clone() });
        debug!(property = %id, %ty, "set property");
        Ok(())
    }

    /// Remove an item. For nodes the whole subtree is marked removed
    /// depth-first post-order; a node shared by several parents is merely
    /// unlinked from its primary parent as long as other parents remain.
    pub fn remove_item(&self, id: &ItemId, options: CheckOptions) -> Result<()> {
        if !self.state.has_item(id)? {
            return Err(OpsError::ItemNotFound { id: id.clone() });
        }
        if options.contains(CheckOptions::ACCESS)
            && !self.access.is_granted(id, Permission::Remove)
        {
            return Err(OpsError::AccessDenied { id: id.clone() });
        }

        match id {
            ItemId::Property(prop_id) => self.remove_property(prop_id, options),
            ItemId::Node(node_id) => self.remove_node(node_id, options),
        }
    }

    fn remove_property(&self, id: &PropertyId, options: CheckOptions) -> Result<()> {
        let parent = self.existing_node(&id.parent())?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;

        let prop = self.state.get_property(id)?;
        if options.contains(CheckOptions::CONSTRAINTS) {
            if let Some(def) = prop.definition().and_then(|d| self.find_prop_def(d)) {
                if def.protected {
                    return Err(OpsError::ConstraintViolation(format!(
                        "property {} is protected",
                        id.name()
                    )));
                }
                if def.mandatory {
                    return Err(OpsError::ConstraintViolation(format!(
                        "property {} is mandatory",
                        id.name()
                    )));
                }
            }
        }

        self.state.modify_node(&id.parent(), |p| {
            p.remove_property_name(id.name());
        })?;
        self.state.mark_removed(&ItemId::Property(id.clone()))?;
        self.state.add_operation(Operation::RemoveItem {
            id: ItemId::Property(id.clone()),
            removed: vec![ItemId::Property(id.clone())],
        });
        Ok(())
    }

    fn remove_node(&self, id: &NodeId, options: CheckOptions) -> Result<()> {
        let node = self.existing_node(id)?;
        let Some(parent_id) = node.primary_parent() else {
            return Err(OpsError::BadPath("the root node cannot be removed".into()));
        };
        let parent = self.existing_node(&parent_id)?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;
        self.check_write_preconditions(&node, options, Permission::Remove)?;

        if options.contains(CheckOptions::CONSTRAINTS) {
            if let Some(def) = node.definition().and_then(|d| self.find_child_def(d)) {
                if def.protected {
                    return Err(OpsError::ConstraintViolation(format!(
                        "node {id} is protected"
                    )));
                }
                if def.mandatory {
                    return Err(OpsError::ConstraintViolation(format!(
                        "node {id} is mandatory"
                    )));
                }
            }
        }
        if options.contains(CheckOptions::REFERENCES) {
            self.check_subtree_unreferenced(id)?;
        }

        let mut removed = Vec::new();
        if node.is_shared() {
            // unlink from the primary parent; the next parent takes over
            self.state.modify_node(id, |n| {
                n.remove_parent(&parent_id);
            })?;
            removed.push(ItemId::Node(*id));
        } else {
            self.remove_subtree(id, &mut removed)?;
        }
        self.state.modify_node(&parent_id, |p| {
            p.remove_child_entry(id);
        })?;
        self.state.add_operation(Operation::RemoveItem {
            id: ItemId::Node(*id),
            removed,
        });
        debug!(node = %id, parent = %parent_id, "removed node");
        Ok(())
    }

    /// Depth-first post-order removal of a whole subtree.
    fn remove_subtree(&self, id: &NodeId, removed: &mut Vec<ItemId>) -> Result<()> {
        let node = self.state.get_node(id)?;
        for entry in node.child_entries() {
            let child = self.state.get_node(&entry.id)?;
            if child.is_shared() {
                // the subtree loses its link; the child lives on elsewhere
                let gone = *id;
                self.state.modify_node(&entry.id, |n| {
                    n.remove_parent(&gone);
                })?;
            } else {
                self.remove_subtree(&entry.id, removed)?;
            }
        }
        for name in node.property_names().iter().cloned().collect::<Vec<_>>() {
            let prop_id = ItemId::Property(PropertyId::new(*id, name));
            self.state.mark_removed(&prop_id)?;
            removed.push(prop_id);
        }
        self.state.mark_removed(&ItemId::Node(*id))?;
        removed.push(ItemId::Node(*id));
        Ok(())
    }

    /// Move the node at `src` to `dst`.
    ///
    /// The destination must not lie inside the moved subtree and its final
    /// step must carry no explicit same-name-sibling index.
    pub fn move_item(&self, src: &Path, dst: &Path, options: CheckOptions) -> Result<()> {
        if src.contains(dst) {
            return Err(OpsError::BadPath(format!(
                "cannot move {src} into its own subtree at {dst}"
            )));
        }
        let Some(dst_parent_path) = dst.parent() else {
            return Err(OpsError::BadPath("cannot move onto the root".into()));
        };
        let dst_element = dst.last().expect("non-root path has a last element");
        if dst_element.index() != 1 {
            return Err(OpsError::BadPath(format!(
                "destination name must not carry an index: {dst}"
            )));
        }
        let name = dst_element.name().clone();

        let node_id = self.hierarchy.resolve_node(src)?;
        let node = self.existing_node(&node_id)?;
        let src_parent_id = node.primary_parent().ok_or_else(|| {
            OpsError::BadPath("the root node cannot be moved".into())
        })?;
        let dst_parent_id = self.hierarchy.resolve_node(&dst_parent_path)?;

        let src_parent = self.existing_node(&src_parent_id)?;
        let dst_parent = self.existing_node(&dst_parent_id)?;
        self.check_write_preconditions(&src_parent, options, Permission::Write)?;
        self.check_write_preconditions(&dst_parent, options, Permission::Write)?;
        self.check_write_preconditions(&node, options, Permission::Remove)?;
        if options.contains(CheckOptions::CONSTRAINTS) {
            self.check_not_protected(&dst_parent)?;
            if let Some(def) = node.definition().and_then(|d| self.find_child_def(d)) {
                if def.protected {
                    return Err(OpsError::ConstraintViolation(format!(
                        "node {node_id} is protected"
                    )));
                }
            }
        }

        let node_ent = self.effective_type_of(&node)?;
        let dst_ent = self.effective_type_of(&dst_parent)?;
        let def = dst_ent
            .applicable_child_node_def(&name, Some(node_ent.as_ref()))
            .ok_or_else(|| {
                OpsError::ConstraintViolation(format!(
                    "no child-node definition of {} applies to {name}",
                    dst_parent.primary_type()
                ))
            })?
            .clone();
        if options.contains(CheckOptions::COLLISION) {
            if dst_parent.has_property(&name) {
                return Err(OpsError::ItemExists(format!(
                    "a property named {name} exists at the destination"
                )));
            }
            let colliding = dst_parent
                .child_entries()
                .iter()
                .any(|e| e.name == name && e.id != node_id);
            if colliding && !def.allows_same_name_siblings {
                return Err(OpsError::ItemExists(format!(
                    "a child named {name} exists at the destination and same-name \
                     siblings are not allowed"
                )));
            }
        }

        if src_parent_id == dst_parent_id {
            // a rename keeps the entry in place
            self.state.modify_node(&src_parent_id, |p| {
                p.rename_child_entry(&node_id, name.clone());
            })?;
        } else {
            self.state.modify_node(&dst_parent_id, |p| {
                p.add_child_entry(name.clone(), node_id);
            })?;
            self.state.modify_node(&node_id, |n| {
                n.remove_parent(&src_parent_id);
                n.set_primary_parent(dst_parent_id);
            })?;
            self.state.modify_node(&src_parent_id, |p| {
                p.remove_child_entry(&node_id);
            })?;
        }
        self.state.modify_node(&node_id, |n| {
            n.set_definition(Some(def.id()));
        })?;
        self.state.add_operation(Operation::Move {
            node: node_id,
            source_parent: src_parent_id,
            destination_parent: dst_parent_id,
        });
        debug!(node = %node_id, %src, %dst, "moved node");
        Ok(())
    }

    /// Copy (or clone) the subtree at `src` to `dst`.
    ///
    /// The whole destination subtree is built before anything is installed,
    /// so a failure part-way leaves no partial copy behind.
    pub fn copy(
        &self,
        src: &Path,
        dst: &Path,
        mode: CopyMode,
        options: CheckOptions,
    ) -> Result<NodeId> {
        let Some(dst_parent_path) = dst.parent() else {
            return Err(OpsError::BadPath("cannot copy onto the root".into()));
        };
        let dst_element = dst.last().expect("non-root path has a last element");
        if dst_element.index() != 1 {
            return Err(OpsError::BadPath(format!(
                "destination name must not carry an index: {dst}"
            )));
        }
        if src.contains(dst) {
            return Err(OpsError::BadPath(format!(
                "cannot copy {src} into its own subtree at {dst}"
            )));
        }
        let name = dst_element.name().clone();

        let src_id = self.hierarchy.resolve_node(src)?;
        let src_node = self.existing_node(&src_id)?;
        let dst_parent_id = self.hierarchy.resolve_node(&dst_parent_path)?;
        let dst_parent = self.existing_node(&dst_parent_id)?;

        self.check_write_preconditions(&dst_parent, options, Permission::Write)?;
        if options.contains(CheckOptions::CONSTRAINTS) {
            self.check_not_protected(&dst_parent)?;
        }
        let src_ent = self.effective_type_of(&src_node)?;
        let dst_ent = self.effective_type_of(&dst_parent)?;
        let def = dst_ent
            .applicable_child_node_def(&name, Some(src_ent.as_ref()))
            .ok_or_else(|| {
                OpsError::ConstraintViolation(format!(
                    "no child-node definition of {} applies to {name}",
                    dst_parent.primary_type()
                ))
            })?
            .clone();
        if options.contains(CheckOptions::COLLISION) {
            if dst_parent.has_property(&name) {
                return Err(OpsError::ItemExists(format!(
                    "a property named {name} exists at the destination"
                )));
            }
            if dst_parent.has_child_with_name(&name) && !def.allows_same_name_siblings {
                return Err(OpsError::ItemExists(format!(
                    "a child named {name} exists at the destination and same-name \
                     siblings are not allowed"
                )));
            }
        }

        // pre-remove colliding referenceable nodes when so instructed
        if matches!(mode, CopyMode::Clone | CopyMode::CloneRemoveExisting) {
            let keepers = self.collect_kept_uuids(&src_id)?;
            for uuid in keepers {
                if !self.state.has_item(&ItemId::Node(uuid))? {
                    continue;
                }
                match mode {
                    CopyMode::Clone => {
                        return Err(OpsError::ItemExists(format!(
                            "a node with uuid {uuid} already exists"
                        )));
                    }
                    CopyMode::CloneRemoveExisting => {
                        if uuid == dst_parent_id
                            || self.is_ancestor(&uuid, &dst_parent_id)?
                        {
                            return Err(OpsError::ConstraintViolation(format!(
                                "cannot remove node {uuid}: it is the destination parent \
                                 or one of its ancestors"
                            )));
                        }
                        self.remove_item(
                            &ItemId::Node(uuid),
                            options.without(CheckOptions::REFERENCES),
                        )?;
                    }
                    CopyMode::Copy => unreachable!("guarded by the enclosing match"),
                }
            }
        }

        // build the whole destination subtree in memory
        let mut built: Vec<ItemData> = Vec::new();
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        let mut tracked: Vec<usize> = Vec::new();
        let copy_root =
            self.copy_subtree(&src_id, dst_parent_id, mode, &mut built, &mut mapping, &mut tracked)?;

        // rewrite copied references through the original-to-copy mapping
        if mode == CopyMode::Copy {
            for idx in tracked {
                let ItemData::Property(prop) = &mut built[idx] else {
                    unreachable!("tracked indexes point at properties");
                };
                let ty = prop.ty();
                let rewritten: Vec<Value> = prop
                    .values()
                    .iter()
                    .map(|v| match v {
                        Value::Reference(target) => {
                            Value::Reference(mapping.get(target).copied().unwrap_or(*target))
                        }
                        other => other.clone(),
                    })
                    .collect();
                prop.set_values(ty, rewritten);
            }
        }

        // the copy root is redefined against the destination parent
        for data in &mut built {
            if let ItemData::Node(n) = data {
                if n.id() == copy_root {
                    n.set_definition(Some(def.id()));
                }
            }
        }

        let created: Vec<ItemId> = built.iter().map(|d| d.id()).collect();
        let installed = self.install(built)?;
        if let Err(e) = self.state.modify_node(&dst_parent_id, |p| {
            p.add_child_entry(name.clone(), copy_root);
        }) {
            self.unwind(&installed);
            return Err(e.into());
        }
        self.state.add_operation(Operation::Copy {
            destination_parent: dst_parent_id,
            destination_root: copy_root,
            created,
        });
        debug!(%src, %dst, ?mode, root = %copy_root, "copied subtree");
        Ok(copy_root)
    }

    /// Recursively build the copy of `src_id` under `new_parent`.
    fn copy_subtree(
        &self,
        src_id: &NodeId,
        new_parent: NodeId,
        mode: CopyMode,
        built: &mut Vec<ItemData>,
        mapping: &mut HashMap<NodeId, NodeId>,
        tracked: &mut Vec<usize>,
    ) -> Result<NodeId> {
        let src = self.state.get_node(src_id)?;
        let referenceable = src.mixins().contains(&well_known::MIX_REFERENCEABLE);

        let new_id = match mode {
            CopyMode::Copy => {
                let id = NodeId::random();
                if referenceable {
                    mapping.insert(*src_id, id);
                }
                id
            }
            CopyMode::Clone | CopyMode::CloneRemoveExisting => {
                if referenceable {
                    *src_id
                } else {
                    NodeId::random()
                }
            }
        };

        let mut copy = NodeState::new(new_id, src.primary_type().clone(), Some(new_parent));
        for mixin in src.mixins() {
            copy.add_mixin(mixin.clone());
        }
        copy.set_definition(src.definition().cloned());

        for prop_name in src.property_names() {
            let src_prop = self
                .state
                .get_property(&PropertyId::new(*src_id, prop_name.clone()))?;
            let values = if *prop_name == *well_known::UUID && new_id != *src_id {
                // the identity property follows the copy's own uuid
                vec![Value::String(new_id.to_string())]
            } else {
                let mut values = Vec::with_capacity(src_prop.values().len());
                for value in src_prop.values() {
                    values.push(self.copy_value(value)?);
                }
                values
            };
            let mut prop = PropertyState::new(
                new_id,
                prop_name.clone(),
                src_prop.ty(),
                src_prop.is_multi_valued(),
            );
            prop.set_values(src_prop.ty(), values);
            prop.set_definition(src_prop.definition().cloned());
            copy.add_property_name(prop_name.clone());
            if src_prop.values().iter().any(|v| matches!(v, Value::Reference(_))) {
                tracked.push(built.len());
            }
            built.push(ItemData::Property(prop));
        }

        let mut children = Vec::new();
        for entry in src.child_entries() {
            children.push((entry.name.clone(), entry.id));
        }
        for (child_name, child_id) in children {
            let new_child =
                self.copy_subtree(&child_id, new_id, mode, built, mapping, tracked)?;
            copy.add_child_entry(child_name, new_child);
        }

        built.push(ItemData::Node(copy));
        Ok(new_id)
    }

    /// Move oversized inline binaries out to the blob substore.
    fn externalize_binaries(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        values
            .into_iter()
            .map(|value| match value {
                Value::Binary(BinaryValue::Inline(bytes)) if bytes.len() > BLOB_INLINE_MAX => {
                    let blobs = self.state.shared().store().blobs();
                    let id = BlobId::random();
                    let size = bytes.len() as u64;
                    blobs
                        .put(id, &mut std::io::Cursor::new(bytes), size)
                        .map_err(item_state::StateError::from)?;
                    Ok(Value::Binary(BinaryValue::External { id, size }))
                }
                other => Ok(other),
            })
            .collect()
    }

    /// Copied values are detached from the source: external binaries get
    /// their own blob so releasing one copy cannot orphan the other.
    fn copy_value(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Binary(BinaryValue::External { id, size }) => {
                let blobs = self.state.shared().store().blobs();
                let mut reader = blobs.get(id).map_err(item_state::StateError::from)?;
                let new_id = BlobId::random();
                blobs
                    .put(new_id, &mut reader, *size)
                    .map_err(item_state::StateError::from)?;
                Value::Binary(BinaryValue::External {
                    id: new_id,
                    size: *size,
                })
            }
            other => other.clone(),
        })
    }

    /// Every referenceable node of the subtree at `src_id`: the UUIDs a
    /// clone keeps.
    fn collect_kept_uuids(&self, src_id: &NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![*src_id];
        while let Some(id) = stack.pop() {
            let node = self.state.get_node(&id)?;
            if node.mixins().contains(&well_known::MIX_REFERENCEABLE) {
                out.push(id);
            }
            stack.extend(node.child_entries().iter().map(|e| e.id));
        }
        Ok(out)
    }

    fn is_ancestor(&self, candidate: &NodeId, of: &NodeId) -> Result<bool> {
        let mut current = *of;
        loop {
            let node = self.state.get_node(&current)?;
            match node.primary_parent() {
                Some(parent) if parent == *candidate => return Ok(true),
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    /// Reorder the child addressed by `child` to sit before `before` (or
    /// last). Only parents whose primary type declares orderable children
    /// support this.
    pub fn reorder_child(
        &self,
        parent_id: &NodeId,
        child: &PathElement,
        before: Option<&PathElement>,
        options: CheckOptions,
    ) -> Result<()> {
        let parent = self.existing_node(parent_id)?;
        self.check_write_preconditions(&parent, options, Permission::Write)?;
        if options.contains(CheckOptions::CONSTRAINTS) {
            self.check_not_protected(&parent)?;
            let primary_def = self.registry.get(parent.primary_type())?;
            if !primary_def.orderable_child_nodes {
                return Err(OpsError::ConstraintViolation(format!(
                    "children of {} are not orderable",
                    parent.primary_type()
                )));
            }
        }

        let child_id = parent
            .child_id(child.name(), child.index())
            .ok_or_else(|| OpsError::ItemNotFound {
                id: ItemId::Node(*parent_id),
            })?;
        let before_id = match before {
            Some(b) => Some(parent.child_id(b.name(), b.index()).ok_or_else(|| {
                OpsError::ItemNotFound {
                    id: ItemId::Node(*parent_id),
                }
            })?),
            None => None,
        };

        self.state.modify_node(parent_id, |p| {
            p.reorder_child_entry(&child_id, before_id.as_ref());
        })?;
        self.state
            .add_operation(Operation::ReorderChildren { parent: *parent_id });
        Ok(())
    }

    /// Add a mixin to a node, materializing the mixin's auto-created items.
    pub fn add_mixin(&self, node_id: &NodeId, mixin: &Name, options: CheckOptions) -> Result<()> {
        let node = self.existing_node(node_id)?;
        self.check_write_preconditions(&node, options, Permission::Write)?;

        let mixin_def = self.registry.get(mixin)?;
        if !mixin_def.mixin {
            return Err(OpsError::ConstraintViolation(format!(
                "{mixin} is not a mixin type"
            )));
        }
        if node.mixins().contains(mixin) {
            return Ok(());
        }
        // the widened aggregate must merge cleanly
        let mut names = node.type_names();
        names.push(mixin.clone());
        self.registry.effective_node_type_of(&names)?;

        self.state.modify_node(node_id, |n| {
            n.add_mixin(mixin.clone());
        })?;

        // materialize what the mixin auto-creates
        let node = self.state.get_node(node_id)?;
        let mixin_ent = self.registry.effective_node_type(mixin)?;
        let mut created = Vec::new();
        for pd in mixin_ent.auto_created_property_defs() {
            if node.has_property(&pd.name) {
                continue;
            }
            let values = self.auto_created_values(&node, pd)?;
            if values.is_empty() && !pd.multiple {
                continue;
            }
            let ty = values.first().map(Value::ty).unwrap_or(pd.required_type);
            let mut prop = PropertyState::new(*node_id, pd.name.clone(), ty, pd.multiple);
            prop.set_values(ty, values);
            prop.set_definition(Some(pd.id()));
            created.push(ItemData::Property(prop));
        }
        let prop_names: Vec<Name> = created
            .iter()
            .filter_map(|d| d.as_property().map(|p| p.name().clone()))
            .collect();
        let installed = self.install(created)?;
        if let Err(e) = self.state.modify_node(node_id, |n| {
            for name in prop_names {
                n.add_property_name(name);
            }
        }) {
            self.unwind(&installed);
            return Err(e.into());
        }
        self.state
            .add_operation(Operation::SetMixins { node: *node_id });
        debug!(node = %node_id, %mixin, "added mixin");
        Ok(())
    }

    /// Remove a mixin and the properties only it declared.
    pub fn remove_mixin(
        &self,
        node_id: &NodeId,
        mixin: &Name,
        options: CheckOptions,
    ) -> Result<()> {
        let node = self.existing_node(node_id)?;
        self.check_write_preconditions(&node, options, Permission::Write)?;
        if !node.mixins().contains(mixin) {
            return Err(OpsError::ConstraintViolation(format!(
                "{mixin} is not a mixin of this node"
            )));
        }
        if mixin == &*well_known::MIX_REFERENCEABLE
            && options.contains(CheckOptions::REFERENCES)
            && self.state.shared().has_references(node_id)?
        {
            return Err(OpsError::ReferentialIntegrity {
                id: *node_id,
                reason: "cannot retract referenceable from a node that is still referenced"
                    .into(),
            });
        }

        let mut names = node.type_names();
        names.retain(|n| n != mixin);
        let narrowed_ent = self.registry.effective_node_type_of(&names)?;

        // drop properties whose declaring type left the aggregate
        for prop_name in node.property_names().iter().cloned().collect::<Vec<_>>() {
            let prop = self
                .state
                .get_property(&PropertyId::new(*node_id, prop_name.clone()))?;
            let Some(def_id) = prop.definition() else {
                continue;
            };
            if !narrowed_ent.all_types().contains(&def_id.declaring_type) {
                self.state.modify_node(node_id, |n| {
                    n.remove_property_name(&prop_name);
                })?;
                self.state
                    .mark_removed(&ItemId::Property(PropertyId::new(*node_id, prop_name)))?;
            }
        }

        self.state.modify_node(node_id, |n| {
            n.remove_mixin(mixin);
        })?;
        self.state
            .add_operation(Operation::SetMixins { node: *node_id });
        debug!(node = %node_id, %mixin, "removed mixin");
        Ok(())
    }

    // === helpers =========================================================

    /// The node, as the session sees it, required to exist.
    fn existing_node(&self, id: &NodeId) -> Result<NodeState> {
        if !self.state.has_item(&ItemId::Node(*id))? {
            return Err(OpsError::ItemNotFound {
                id: ItemId::Node(*id),
            });
        }
        Ok(self.state.get_node(id)?)
    }

    fn effective_type_of(&self, node: &NodeState) -> Result<Arc<EffectiveNodeType>> {
        Ok(self.registry.effective_node_type_of(&node.type_names())?)
    }

    fn check_write_preconditions(
        &self,
        node: &NodeState,
        options: CheckOptions,
        permission: Permission,
    ) -> Result<()> {
        let id = ItemId::Node(node.id());
        if options.contains(CheckOptions::ACCESS) && !self.access.is_granted(&id, permission) {
            return Err(OpsError::AccessDenied { id });
        }
        if options.contains(CheckOptions::LOCK)
            && !self.locks.is_lock_free(&node.id(), self.state.session_id())
        {
            return Err(OpsError::Locked { id: node.id() });
        }
        if options.contains(CheckOptions::VERSIONING) && !self.versions.is_checked_out(&node.id())
        {
            return Err(OpsError::NotCheckedOut { id: node.id() });
        }
        Ok(())
    }

    /// Fails when the node itself sits under a protected definition.
    fn check_not_protected(&self, node: &NodeState) -> Result<()> {
        if let Some(def) = node.definition().and_then(|d| self.find_child_def(d)) {
            if def.protected {
                return Err(OpsError::ConstraintViolation(format!(
                    "node {} is protected",
                    node.id()
                )));
            }
        }
        Ok(())
    }

    fn find_child_def(&self, id: &NodeDefId) -> Option<ChildNodeDef> {
        let def = self.registry.get(&id.declaring_type).ok()?;
        def.child_node_defs
            .iter()
            .find(|c| c.name == id.name)
            .cloned()
    }

    fn find_prop_def(&self, id: &PropDefId) -> Option<PropertyDef> {
        let def = self.registry.get(&id.declaring_type).ok()?;
        def.property_defs
            .iter()
            .find(|p| p.name == id.name)
            .cloned()
    }

    /// Build the NEW states of a node and everything it auto-creates,
    /// depth-first, without installing anything.
    fn build_new_node(
        &self,
        out: &mut Vec<ItemData>,
        id: NodeId,
        primary_type: &Name,
        def: &ChildNodeDef,
        parent: NodeId,
    ) -> Result<()> {
        let mut node = NodeState::new(id, primary_type.clone(), Some(parent));
        node.set_definition(Some(def.id()));

        let ent = self.registry.effective_node_type(primary_type)?;
        for pd in ent.auto_created_property_defs() {
            let values = self.auto_created_values(&node, pd)?;
            if values.is_empty() && !pd.multiple {
                continue;
            }
            let ty = values.first().map(Value::ty).unwrap_or(pd.required_type);
            let mut prop = PropertyState::new(id, pd.name.clone(), ty, pd.multiple);
            prop.set_values(ty, values);
            prop.set_definition(Some(pd.id()));
            node.add_property_name(pd.name.clone());
            out.push(ItemData::Property(prop));
        }
        for cd in ent.auto_created_child_node_defs() {
            let child_type = cd.default_primary_type.as_ref().ok_or_else(|| {
                OpsError::ConstraintViolation(format!(
                    "auto-created child {} has no default primary type",
                    cd.name
                ))
            })?;
            let child_type = child_type.clone();
            let child_id = NodeId::random();
            node.add_child_entry(cd.name.clone(), child_id);
            self.build_new_node(out, child_id, &child_type, cd, id)?;
        }
        out.push(ItemData::Node(node));
        Ok(())
    }

    /// The values of an auto-created property: system-computed for the
    /// well-known protected ones, declared defaults otherwise.
    fn auto_created_values(&self, node: &NodeState, pd: &PropertyDef) -> Result<Vec<Value>> {
        let declaring = &pd.declaring_type;
        if *declaring == *well_known::MIX_REFERENCEABLE && pd.name == *well_known::UUID {
            return Ok(vec![Value::String(node.id().to_string())]);
        }
        if *declaring == *well_known::NT_BASE && pd.name == *well_known::PRIMARY_TYPE {
            return Ok(vec![Value::Name(node.primary_type().clone())]);
        }
        if *declaring == *well_known::NT_BASE && pd.name == *well_known::MIXIN_TYPES {
            return Ok(node.mixins().iter().cloned().map(Value::Name).collect());
        }
        if (pd.name == *well_known::CREATED || pd.name == *well_known::LAST_MODIFIED)
            && pd.required_type == PropertyType::Date
        {
            return Ok(vec![Value::Date(self.time.now())]);
        }
        Ok(pd.default_values.clone())
    }

    /// Install freshly built states; a failure part-way unwinds what was
    /// installed.
    fn install(&self, states: Vec<ItemData>) -> Result<Vec<ItemId>> {
        let mut installed = Vec::with_capacity(states.len());
        for data in states {
            let id = data.id();
            let result = match data {
                ItemData::Node(n) => self.state.create_node(n),
                ItemData::Property(p) => self.state.create_property(p),
            };
            if let Err(e) = result {
                self.unwind(&installed);
                return Err(e.into());
            }
            installed.push(id);
        }
        Ok(installed)
    }

    /// Drop freshly installed NEW states again.
    fn unwind(&self, installed: &[ItemId]) {
        for id in installed {
            if let Err(e) = self.state.mark_removed(id) {
                warn!(%id, error = %e, "failed to unwind staged state");
            }
        }
    }

    /// Fails when the subtree at `id` contains a referenceable node that is
    /// referenced from outside the subtree. References between members of
    /// the subtree disappear with it and do not block the removal.
    fn check_subtree_unreferenced(&self, id: &NodeId) -> Result<()> {
        let mut subtree_nodes = std::collections::HashSet::new();
        let mut stack = vec![*id];
        while let Some(current) = stack.pop() {
            if !subtree_nodes.insert(current) {
                continue;
            }
            let node = self.state.get_node(&current)?;
            stack.extend(node.child_entries().iter().map(|e| e.id));
        }
        for uuid in self.collect_kept_uuids(id)? {
            let refs = self.state.shared().references(&uuid)?;
            let external = refs
                .referrers()
                .iter()
                .any(|referrer| !subtree_nodes.contains(&referrer.parent()));
            if external {
                return Err(OpsError::ReferentialIntegrity {
                    id: uuid,
                    reason: "node (or a descendant) is still referenced".into(),
                });
            }
        }
        Ok(())
    }
}

/// Coerce `values` to the definition's required type, keeping their own type
/// where the definition admits any.
fn coerce_values(
    values: Vec<Value>,
    required: PropertyType,
    value_type: PropertyType,
) -> Result<(PropertyType, Vec<Value>)> {
    if required == PropertyType::Undefined || required == value_type {
        return Ok((value_type, values));
    }
    let coerced: Vec<Value> = values
        .iter()
        .map(|v| v.coerce(required))
        .collect::<std::result::Result<_, _>>()?;
    Ok((required, coerced))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use data_types::{NamespaceRegistry, NodeTypeDef, ROOT_NODE_ID};
    use item_state::SharedItemStateManager;
    use item_store::interface::Store;
    use item_store::mem::MemStore;
    use node_schema::{MemDefinitionStore, PermissiveContentCheck};
    use repo_time::{MockProvider, Time};

    use crate::oracles::{AlwaysCheckedOut, NoLocks, OpenAccess};
    use crate::validator::Validator;

    use super::*;

    struct Ctx {
        ops: BatchedItemOperations,
        session: Arc<SessionItemStateManager>,
        registry: Arc<NodeTypeRegistry>,
    }

    fn setup() -> Ctx {
        let store = Arc::new(MemStore::new());

        // bootstrap the root node the way the repository does
        let mut root = NodeState::new(
            ROOT_NODE_ID,
            well_known::NT_UNSTRUCTURED.clone(),
            None,
        );
        root.add_property_name(well_known::PRIMARY_TYPE.clone());
        let mut primary = PropertyState::new(
            ROOT_NODE_ID,
            well_known::PRIMARY_TYPE.clone(),
            PropertyType::Name,
            false,
        );
        primary.set_values(
            PropertyType::Name,
            vec![Value::Name(well_known::NT_UNSTRUCTURED.clone())],
        );
        primary.set_definition(Some(PropDefId {
            declaring_type: well_known::NT_BASE.clone(),
            name: well_known::PRIMARY_TYPE.clone(),
        }));
        store.store_node(&root).unwrap();
        store.store_property(&primary).unwrap();

        let shared = Arc::new(SharedItemStateManager::new(
            Arc::clone(&store) as Arc<dyn Store>
        ));
        let session = SessionItemStateManager::new(shared);
        let registry = Arc::new(
            NodeTypeRegistry::new(
                Arc::new(NamespaceRegistry::new()),
                Arc::new(MemDefinitionStore::new()),
                Arc::new(PermissiveContentCheck),
            )
            .unwrap(),
        );
        let ops = BatchedItemOperations::new(
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::new(OpenAccess),
            Arc::new(NoLocks),
            Arc::new(AlwaysCheckedOut),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        );
        Ctx {
            ops,
            session,
            registry,
        }
    }

    fn name(s: &str) -> Name {
        Name::unqualified(s)
    }

    #[test]
    fn add_node_defaults_and_auto_creation() {
        let ctx = setup();
        // no explicit type: the residual definition's default applies
        let id = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();

        let node = ctx.session.get_node(&id).unwrap();
        assert_eq!(node.primary_type(), &*well_known::NT_UNSTRUCTURED);
        assert!(node.has_property(&well_known::PRIMARY_TYPE));

        // the computed primary-type value names the node's own type
        let prop = ctx
            .session
            .get_property(&PropertyId::new(id, well_known::PRIMARY_TYPE.clone()))
            .unwrap();
        assert_eq!(
            prop.values(),
            &[Value::Name(well_known::NT_UNSTRUCTURED.clone())]
        );

        // the parent holds the entry
        let root = ctx.session.get_node(&ROOT_NODE_ID).unwrap();
        assert_eq!(root.child_id(&name("a"), 1), Some(id));
    }

    #[test]
    fn add_node_same_name_siblings_where_allowed() {
        let ctx = setup();
        let first = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("x"), None, None, CheckOptions::ALL)
            .unwrap();
        let second = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("x"), None, None, CheckOptions::ALL)
            .unwrap();
        let root = ctx.session.get_node(&ROOT_NODE_ID).unwrap();
        assert_eq!(root.child_id(&name("x"), 1), Some(first));
        assert_eq!(root.child_id(&name("x"), 2), Some(second));

        // folders do not allow same-name siblings
        let folder = ctx
            .ops
            .add_node(
                &ROOT_NODE_ID,
                &name("docs"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            )
            .unwrap();
        ctx.ops
            .add_node(
                &folder,
                &name("sub"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_matches!(
            ctx.ops.add_node(
                &folder,
                &name("sub"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            ),
            Err(OpsError::ItemExists(_))
        );
    }

    #[test]
    fn add_node_honors_required_primary_types() {
        let ctx = setup();
        let folder = ctx
            .ops
            .add_node(
                &ROOT_NODE_ID,
                &name("docs"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            )
            .unwrap();
        // folders take hierarchy nodes only
        assert_matches!(
            ctx.ops.add_node(
                &folder,
                &name("free"),
                Some(&well_known::NT_UNSTRUCTURED),
                None,
                CheckOptions::ALL,
            ),
            Err(OpsError::ConstraintViolation(_))
        );
    }

    #[test]
    fn add_node_with_predefined_uuid_collides() {
        let ctx = setup();
        let id = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();
        assert_matches!(
            ctx.ops
                .add_node(&ROOT_NODE_ID, &name("b"), None, Some(id), CheckOptions::ALL),
            Err(OpsError::ItemExists(_))
        );
    }

    #[test]
    fn property_lifecycle_with_coercion() {
        let ctx = setup();
        let node = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("n"), None, None, CheckOptions::ALL)
            .unwrap();

        let pid = ctx
            .ops
            .add_property(
                &node,
                &name("count"),
                vec![Value::Long(7)],
                false,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_eq!(
            ctx.session.get_property(&pid).unwrap().values(),
            &[Value::Long(7)]
        );

        ctx.ops
            .set_property(&pid, Some(vec![Value::Long(8)]), CheckOptions::ALL)
            .unwrap();
        assert_eq!(
            ctx.session.get_property(&pid).unwrap().values(),
            &[Value::Long(8)]
        );

        // null values remove the property
        ctx.ops.set_property(&pid, None, CheckOptions::ALL).unwrap();
        assert!(!ctx
            .session
            .has_item(&ItemId::Property(pid.clone()))
            .unwrap());
        let node_state = ctx.session.get_node(&node).unwrap();
        assert!(!node_state.has_property(&name("count")));

        // a property name may not shadow a child node
        ctx.ops
            .add_node(&node, &name("kid"), None, None, CheckOptions::ALL)
            .unwrap();
        assert_matches!(
            ctx.ops.add_property(
                &node,
                &name("kid"),
                vec![Value::Boolean(true)],
                false,
                CheckOptions::ALL,
            ),
            Err(OpsError::ItemExists(_))
        );
    }

    #[test]
    fn protected_properties_are_untouchable() {
        let ctx = setup();
        let node = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("n"), None, None, CheckOptions::ALL)
            .unwrap();
        let pid = PropertyId::new(node, well_known::PRIMARY_TYPE.clone());
        assert_matches!(
            ctx.ops.set_property(
                &pid,
                Some(vec![Value::Name(well_known::NT_FOLDER.clone())]),
                CheckOptions::ALL,
            ),
            Err(OpsError::ConstraintViolation(_))
        );
        assert_matches!(
            ctx.ops
                .remove_item(&ItemId::Property(pid), CheckOptions::ALL),
            Err(OpsError::ConstraintViolation(_))
        );
    }

    #[test]
    fn remove_node_takes_the_subtree() {
        let ctx = setup();
        let a = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();
        let b = ctx
            .ops
            .add_node(&a, &name("b"), None, None, CheckOptions::ALL)
            .unwrap();
        let pid = ctx
            .ops
            .add_property(
                &b,
                &name("p"),
                vec![Value::String("v".into())],
                false,
                CheckOptions::ALL,
            )
            .unwrap();

        ctx.ops
            .remove_item(&ItemId::Node(a), CheckOptions::ALL)
            .unwrap();
        assert!(!ctx.session.has_item(&ItemId::Node(a)).unwrap());
        assert!(!ctx.session.has_item(&ItemId::Node(b)).unwrap());
        assert!(!ctx.session.has_item(&ItemId::Property(pid)).unwrap());
        let root = ctx.session.get_node(&ROOT_NODE_ID).unwrap();
        assert!(!root.has_child_with_name(&name("a")));
    }

    #[test]
    fn root_cannot_be_removed() {
        let ctx = setup();
        assert_matches!(
            ctx.ops
                .remove_item(&ItemId::Node(ROOT_NODE_ID), CheckOptions::ALL),
            Err(OpsError::BadPath(_))
        );
    }

    #[test]
    fn move_and_rename() {
        let ctx = setup();
        let ns = NamespaceRegistry::new();
        ctx.ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();
        ctx.ops
            .add_node(&ROOT_NODE_ID, &name("b"), None, None, CheckOptions::ALL)
            .unwrap();
        let a_path = Path::parse("/a", &ns).unwrap();
        let x = ctx
            .ops
            .add_node(
                &ctx.ops.hierarchy().resolve_node(&a_path).unwrap(),
                &name("x"),
                None,
                None,
                CheckOptions::ALL,
            )
            .unwrap();

        // rename in place
        ctx.ops
            .move_item(
                &Path::parse("/a/x", &ns).unwrap(),
                &Path::parse("/a/y", &ns).unwrap(),
                CheckOptions::ALL,
            )
            .unwrap();
        assert_eq!(
            ctx.ops.hierarchy().resolve_node(&Path::parse("/a/y", &ns).unwrap()).unwrap(),
            x
        );

        // move across parents
        ctx.ops
            .move_item(
                &Path::parse("/a/y", &ns).unwrap(),
                &Path::parse("/b/y", &ns).unwrap(),
                CheckOptions::ALL,
            )
            .unwrap();
        let moved = ctx.session.get_node(&x).unwrap();
        assert_eq!(
            moved.primary_parent(),
            Some(ctx.ops.hierarchy().resolve_node(&Path::parse("/b", &ns).unwrap()).unwrap())
        );

        // a node cannot move into its own subtree
        assert_matches!(
            ctx.ops.move_item(
                &Path::parse("/b", &ns).unwrap(),
                &Path::parse("/b/y/z", &ns).unwrap(),
                CheckOptions::ALL,
            ),
            Err(OpsError::BadPath(_))
        );
        // destination names carry no explicit index
        assert_matches!(
            ctx.ops.move_item(
                &Path::parse("/b/y", &ns).unwrap(),
                &Path::parse("/a/y[2]", &ns).unwrap(),
                CheckOptions::ALL,
            ),
            Err(OpsError::BadPath(_))
        );
    }

    #[test]
    fn copy_rewrites_references_within_the_subtree() {
        let ctx = setup();
        let ns = NamespaceRegistry::new();
        let src = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("src"), None, None, CheckOptions::ALL)
            .unwrap();
        ctx.ops
            .add_mixin(&src, &well_known::MIX_REFERENCEABLE, CheckOptions::ALL)
            .unwrap();
        let holder = ctx
            .ops
            .add_node(&src, &name("ref"), None, None, CheckOptions::ALL)
            .unwrap();
        ctx.ops
            .add_property(
                &holder,
                &name("target"),
                vec![Value::Reference(src)],
                false,
                CheckOptions::ALL,
            )
            .unwrap();

        let copy_root = ctx
            .ops
            .copy(
                &Path::parse("/src", &ns).unwrap(),
                &Path::parse("/dst", &ns).unwrap(),
                CopyMode::Copy,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_ne!(copy_root, src);

        // the copied reference points at the copy, not the original
        let copied_holder = ctx
            .session
            .get_node(&copy_root)
            .unwrap()
            .child_id(&name("ref"), 1)
            .unwrap();
        let copied_ref = ctx
            .session
            .get_property(&PropertyId::new(copied_holder, name("target")))
            .unwrap();
        assert_eq!(copied_ref.values(), &[Value::Reference(copy_root)]);

        // the copy's uuid property carries its own identity
        let uuid_prop = ctx
            .session
            .get_property(&PropertyId::new(copy_root, well_known::UUID.clone()))
            .unwrap();
        assert_eq!(
            uuid_prop.values(),
            &[Value::String(copy_root.to_string())]
        );
    }

    #[test]
    fn clone_keeps_uuids_and_detects_collisions() {
        let ctx = setup();
        let ns = NamespaceRegistry::new();
        let container = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("other"), None, None, CheckOptions::ALL)
            .unwrap();
        let _ = container;
        let src = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("src"), None, None, CheckOptions::ALL)
            .unwrap();
        ctx.ops
            .add_mixin(&src, &well_known::MIX_REFERENCEABLE, CheckOptions::ALL)
            .unwrap();

        // a straight clone of a referenceable node collides with the source
        // subtree itself
        assert_matches!(
            ctx.ops.copy(
                &Path::parse("/src", &ns).unwrap(),
                &Path::parse("/other/src", &ns).unwrap(),
                CopyMode::Clone,
                CheckOptions::ALL,
            ),
            Err(OpsError::ItemExists(_))
        );

        // removing the existing holder of the uuid first succeeds
        let cloned = ctx
            .ops
            .copy(
                &Path::parse("/src", &ns).unwrap(),
                &Path::parse("/other/src", &ns).unwrap(),
                CopyMode::CloneRemoveExisting,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_eq!(cloned, src);
        // exactly one node with that uuid remains, under /other
        let parent = ctx.session.get_node(&cloned).unwrap().primary_parent();
        assert_eq!(
            parent,
            Some(
                ctx.ops
                    .hierarchy()
                    .resolve_node(&Path::parse("/other", &ns).unwrap())
                    .unwrap()
            )
        );
        let root = ctx.session.get_node(&ROOT_NODE_ID).unwrap();
        assert!(!root.has_child_with_name(&name("src")));
    }

    #[test]
    fn reorder_requires_orderable_children() {
        let ctx = setup();
        let a = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();
        let b = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("b"), None, None, CheckOptions::ALL)
            .unwrap();

        ctx.ops
            .reorder_child(
                &ROOT_NODE_ID,
                &PathElement::new(name("b")),
                Some(&PathElement::new(name("a"))),
                CheckOptions::ALL,
            )
            .unwrap();
        let root = ctx.session.get_node(&ROOT_NODE_ID).unwrap();
        let order: Vec<NodeId> = root.child_entries().iter().map(|e| e.id).collect();
        assert_eq!(order, vec![b, a]);

        // folders are not orderable
        let folder = ctx
            .ops
            .add_node(
                &ROOT_NODE_ID,
                &name("docs"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            )
            .unwrap();
        ctx.ops
            .add_node(
                &folder,
                &name("one"),
                Some(&well_known::NT_FOLDER),
                None,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_matches!(
            ctx.ops.reorder_child(
                &folder,
                &PathElement::new(name("one")),
                None,
                CheckOptions::ALL,
            ),
            Err(OpsError::ConstraintViolation(_))
        );
    }

    #[test]
    fn mixins_materialize_and_retract() {
        let ctx = setup();
        let node = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("n"), None, None, CheckOptions::ALL)
            .unwrap();

        ctx.ops
            .add_mixin(&node, &well_known::MIX_REFERENCEABLE, CheckOptions::ALL)
            .unwrap();
        let state = ctx.session.get_node(&node).unwrap();
        assert!(state.mixins().contains(&well_known::MIX_REFERENCEABLE));
        let uuid_prop = ctx
            .session
            .get_property(&PropertyId::new(node, well_known::UUID.clone()))
            .unwrap();
        assert_eq!(uuid_prop.values(), &[Value::String(node.to_string())]);

        // a non-mixin type is refused
        assert_matches!(
            ctx.ops
                .add_mixin(&node, &well_known::NT_FOLDER, CheckOptions::ALL),
            Err(OpsError::ConstraintViolation(_))
        );

        ctx.ops
            .remove_mixin(&node, &well_known::MIX_REFERENCEABLE, CheckOptions::ALL)
            .unwrap();
        let state = ctx.session.get_node(&node).unwrap();
        assert!(!state.mixins().contains(&well_known::MIX_REFERENCEABLE));
        assert!(!state.has_property(&well_known::UUID));
    }

    #[test]
    fn validator_reports_missing_mandatory_items() {
        let ctx = setup();
        // a page type with a mandatory title
        let page = name("page");
        let mut def = NodeTypeDef::new(page.clone(), vec![well_known::NT_BASE.clone()]);
        def.property_defs.push(PropertyDef {
            declaring_type: page.clone(),
            name: name("title"),
            required_type: PropertyType::String,
            auto_created: false,
            mandatory: true,
            protected: false,
            multiple: false,
            on_parent_version: Default::default(),
            value_constraints: vec![],
            default_values: vec![],
        });
        ctx.registry.register(def).unwrap();

        let node = ctx
            .ops
            .add_node(
                &ROOT_NODE_ID,
                &name("p"),
                Some(&page),
                None,
                CheckOptions::ALL,
            )
            .unwrap();

        let validator = Validator::new(Arc::clone(&ctx.session), Arc::clone(&ctx.registry));
        let err = validator
            .validate_subtree(&ItemId::Node(ROOT_NODE_ID))
            .unwrap_err();
        assert_matches!(&err, OpsError::ConstraintViolation(msg) if msg.contains("title"));

        // supplying the title satisfies the sweep
        ctx.ops
            .add_property(
                &node,
                &name("title"),
                vec![Value::String("hi".into())],
                false,
                CheckOptions::ALL,
            )
            .unwrap();
        validator
            .validate_subtree(&ItemId::Node(ROOT_NODE_ID))
            .unwrap();
    }

    #[test]
    fn oversized_binaries_spill_to_the_blob_store() {
        use std::io::Read;

        let ctx = setup();
        let node = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("n"), None, None, CheckOptions::ALL)
            .unwrap();

        let small = bytes::Bytes::from(vec![7u8; 16]);
        let big = bytes::Bytes::from(vec![7u8; BLOB_INLINE_MAX + 1]);

        let small_pid = ctx
            .ops
            .add_property(
                &node,
                &name("small"),
                vec![Value::Binary(BinaryValue::Inline(small.clone()))],
                false,
                CheckOptions::ALL,
            )
            .unwrap();
        assert_matches!(
            &ctx.session.get_property(&small_pid).unwrap().values()[0],
            Value::Binary(BinaryValue::Inline(b)) if *b == small
        );

        let big_pid = ctx
            .ops
            .add_property(
                &node,
                &name("big"),
                vec![Value::Binary(BinaryValue::Inline(big.clone()))],
                false,
                CheckOptions::ALL,
            )
            .unwrap();
        let stored = ctx.session.get_property(&big_pid).unwrap();
        let Value::Binary(BinaryValue::External { id, size }) = &stored.values()[0] else {
            panic!("expected an external binary, got {:?}", stored.values()[0]);
        };
        assert_eq!(*size, big.len() as u64);
        let mut payload = Vec::new();
        ctx.session
            .shared()
            .store()
            .blobs()
            .get(id)
            .unwrap()
            .read_to_end(&mut payload)
            .unwrap();
        assert_eq!(payload, big);
    }

    #[derive(Debug)]
    struct DenyWrites;

    impl crate::oracles::AccessOracle for DenyWrites {
        fn is_granted(&self, _id: &ItemId, permission: Permission) -> bool {
            permission == Permission::Read
        }
    }

    #[derive(Debug)]
    struct EverythingLocked;

    impl crate::oracles::LockOracle for EverythingLocked {
        fn is_lock_free(&self, _node: &NodeId, _session_id: u64) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct AllCheckedIn;

    impl crate::oracles::VersionOracle for AllCheckedIn {
        fn is_checked_out(&self, _node: &NodeId) -> bool {
            false
        }
    }

    #[test]
    fn oracles_veto_operations() {
        let base = setup();

        let denied = BatchedItemOperations::new(
            Arc::clone(&base.session),
            Arc::clone(&base.registry),
            Arc::new(DenyWrites),
            Arc::new(NoLocks),
            Arc::new(AlwaysCheckedOut),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        );
        assert_matches!(
            denied.add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL),
            Err(OpsError::AccessDenied { .. })
        );

        let locked = BatchedItemOperations::new(
            Arc::clone(&base.session),
            Arc::clone(&base.registry),
            Arc::new(OpenAccess),
            Arc::new(EverythingLocked),
            Arc::new(AlwaysCheckedOut),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        );
        assert_matches!(
            locked.add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL),
            Err(OpsError::Locked { .. })
        );

        let checked_in = BatchedItemOperations::new(
            Arc::clone(&base.session),
            Arc::clone(&base.registry),
            Arc::new(OpenAccess),
            Arc::new(NoLocks),
            Arc::new(AllCheckedIn),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        );
        assert_matches!(
            checked_in.add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL),
            Err(OpsError::NotCheckedOut { .. })
        );

        // the permissive defaults let the same operation through
        base.ops
            .add_node(&ROOT_NODE_ID, &name("a"), None, None, CheckOptions::ALL)
            .unwrap();
    }

    #[test]
    fn validator_rejects_non_referenceable_targets() {
        let ctx = setup();
        let plain = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("plain"), None, None, CheckOptions::ALL)
            .unwrap();
        let holder = ctx
            .ops
            .add_node(&ROOT_NODE_ID, &name("holder"), None, None, CheckOptions::ALL)
            .unwrap();
        ctx.ops
            .add_property(
                &holder,
                &name("target"),
                vec![Value::Reference(plain)],
                false,
                CheckOptions::ALL,
            )
            .unwrap();

        let validator = Validator::new(Arc::clone(&ctx.session), Arc::clone(&ctx.registry));
        assert_matches!(
            validator.validate_subtree(&ItemId::Node(ROOT_NODE_ID)),
            Err(OpsError::ReferentialIntegrity { .. })
        );
    }
}
