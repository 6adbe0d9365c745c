//! The built-in node-type catalog.

use data_types::NodeTypeDef;

use crate::store::DefinitionStoreError;

/// The embedded catalog resource.
const BUILTIN_TYPES: &str = include_str!("builtin_types.json");

/// Parse the built-in definitions shipped with the engine.
pub(crate) fn builtin_definitions() -> Result<Vec<NodeTypeDef>, DefinitionStoreError> {
    Ok(serde_json::from_str(BUILTIN_TYPES)?)
}

#[cfg(test)]
mod tests {
    use data_types::{well_known, PropertyType};

    use super::*;

    #[test]
    fn catalog_parses() {
        let defs = builtin_definitions().unwrap();
        assert_eq!(defs.len(), 8);

        let base = defs
            .iter()
            .find(|d| d.name == *well_known::NT_BASE)
            .unwrap();
        assert!(base.supertypes.is_empty());
        let primary_type = base
            .property_defs
            .iter()
            .find(|p| p.name == *well_known::PRIMARY_TYPE)
            .unwrap();
        assert_eq!(primary_type.required_type, PropertyType::Name);
        assert!(primary_type.protected);
        assert!(primary_type.mandatory);

        let referenceable = defs
            .iter()
            .find(|d| d.name == *well_known::MIX_REFERENCEABLE)
            .unwrap();
        assert!(referenceable.mixin);

        let unstructured = defs
            .iter()
            .find(|d| d.name == *well_known::NT_UNSTRUCTURED)
            .unwrap();
        assert!(unstructured.orderable_child_nodes);
        assert!(unstructured.child_node_defs[0].is_residual());
        assert!(unstructured.child_node_defs[0].allows_same_name_siblings);
    }
}
