//! The pre-save constraint sweep.

use std::sync::Arc;

use data_types::{
    well_known, ItemData, ItemId, NodeState, PropertyId, PropertyState, PropertyType, Value,
};
use item_state::{ItemStatus, SessionItemStateManager};
use node_schema::NodeTypeRegistry;
use observability_deps::tracing::trace;

use crate::error::OpsError;
use crate::Result;

/// Validates the pending transient states of a subtree against the schema
/// before they are committed.
///
/// The checks mirror the invariants a committed repository guarantees: every
/// mandatory child and property exists, property values conform to their
/// declared type and cardinality, same-name siblings only occur where their
/// definition allows them, and REFERENCE values target referenceable nodes.
#[derive(Debug)]
pub struct Validator {
    state: Arc<SessionItemStateManager>,
    registry: Arc<NodeTypeRegistry>,
}

impl Validator {
    /// A validator over the session's view.
    pub fn new(state: Arc<SessionItemStateManager>, registry: Arc<NodeTypeRegistry>) -> Self {
        Self { state, registry }
    }

    /// Check every pending state whose path lies within `root`.
    pub fn validate_subtree(&self, root: &ItemId) -> Result<()> {
        for (id, status) in self.state.transient_ids() {
            if !matches!(status, ItemStatus::New | ItemStatus::ExistingModified) {
                continue;
            }
            if !self.state.is_within_subtree(&id, root) {
                continue;
            }
            trace!(%id, %status, "validating pending state");
            match self.state.get_item(&id)? {
                ItemData::Node(node) => self.validate_node(&node)?,
                ItemData::Property(prop) => self.validate_property_shape(&prop)?,
            }
        }
        Ok(())
    }

    fn validate_node(&self, node: &NodeState) -> Result<()> {
        let ent = self.registry.effective_node_type_of(&node.type_names())?;

        for pd in ent.mandatory_property_defs() {
            if !node.has_property(&pd.name) {
                return Err(OpsError::ConstraintViolation(format!(
                    "mandatory property {} is missing on node {}",
                    pd.name,
                    node.id()
                )));
            }
        }
        for cd in ent.mandatory_child_node_defs() {
            if !node.has_child_with_name(&cd.name) {
                return Err(OpsError::ConstraintViolation(format!(
                    "mandatory child node {} is missing on node {}",
                    cd.name,
                    node.id()
                )));
            }
        }

        // same-name siblings are only legal under a definition allowing them
        let mut seen = std::collections::BTreeSet::new();
        for entry in node.child_entries() {
            if !seen.insert(entry.name.clone()) {
                continue;
            }
            if node.same_name_sibling_count(&entry.name) > 1 {
                let allows = ent
                    .applicable_child_node_def(&entry.name, None)
                    .map(|d| d.allows_same_name_siblings)
                    .unwrap_or(false);
                if !allows {
                    return Err(OpsError::ConstraintViolation(format!(
                        "same-name siblings named {} are not allowed on node {}",
                        entry.name,
                        node.id()
                    )));
                }
            }
        }

        // property values conform to their definitions
        for name in node.property_names() {
            let prop = self
                .state
                .get_property(&PropertyId::new(node.id(), name.clone()))?;
            self.validate_property_shape(&prop)?;
            if let Some(def) =
                ent.applicable_property_def(name, prop.ty(), prop.is_multi_valued())
            {
                if def.required_type != PropertyType::Undefined
                    && def.required_type != prop.ty()
                {
                    return Err(OpsError::ConstraintViolation(format!(
                        "property {name} on node {} has type {} but requires {}",
                        node.id(),
                        prop.ty(),
                        def.required_type
                    )));
                }
            } else {
                return Err(OpsError::ConstraintViolation(format!(
                    "no property definition of node {} applies to {name}",
                    node.id()
                )));
            }
        }
        Ok(())
    }

    /// The shape checks every property obeys regardless of its definition.
    fn validate_property_shape(&self, prop: &PropertyState) -> Result<()> {
        if !prop.is_multi_valued() && prop.values().len() != 1 {
            return Err(OpsError::ConstraintViolation(format!(
                "single-valued property {} holds {} values",
                prop.id(),
                prop.values().len()
            )));
        }
        for value in prop.values() {
            if value.ty() != prop.ty() {
                return Err(OpsError::ConstraintViolation(format!(
                    "property {} declares {} but holds a {} value",
                    prop.id(),
                    prop.ty(),
                    value.ty()
                )));
            }
            if let Value::Reference(target) = value {
                let target_node =
                    self.state
                        .get_node(target)
                        .map_err(|_| OpsError::ReferentialIntegrity {
                            id: *target,
                            reason: format!(
                                "reference in {} targets a missing node",
                                prop.id()
                            ),
                        })?;
                if !target_node.mixins().contains(&well_known::MIX_REFERENCEABLE) {
                    return Err(OpsError::ReferentialIntegrity {
                        id: *target,
                        reason: format!(
                            "reference in {} targets a non-referenceable node",
                            prop.id()
                        ),
                    });
                }
            }
        }

        // invariant: the owning node knows this property
        let parent = self.state.get_node(&prop.parent())?;
        if !parent.has_property(prop.name()) {
            return Err(OpsError::ConstraintViolation(format!(
                "property {} is not listed on its parent node",
                prop.id()
            )));
        }
        Ok(())
    }
}
