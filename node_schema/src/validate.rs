//! Validation of submitted node-type definitions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use data_types::{Name, NamespaceRegistry, NodeTypeDef, PropertyType, well_known};

use crate::effective::EffectiveNodeType;
use crate::error::{InvalidNodeTypeDef, RegistryError};

/// The map a definition is validated against: the registered types plus the
/// whole submitted batch, so a batch may cross-reference within itself.
pub(crate) type ProvisionalMap = HashMap<Name, Arc<NodeTypeDef>>;

/// Validate one definition `def` against `map`.
///
/// `map` must already contain `def` itself; lookups of the defining name are
/// intentionally self-satisfying (a type may use itself as a child target).
pub(crate) fn validate_def(
    def: &NodeTypeDef,
    map: &ProvisionalMap,
    namespaces: &NamespaceRegistry,
) -> Result<(), RegistryError> {
    let lookup = |n: &Name| map.get(n).map(|d| d.as_ref());

    // the defining name itself
    if def.name.is_residual() {
        return Err(InvalidNodeTypeDef::BadName {
            name: def.name.clone(),
            reason: "the residual name cannot name a type".into(),
        }
        .into());
    }
    check_namespace(&def.name, &def.name, namespaces)?;

    // supertypes exist and are not the type itself
    for supertype in &def.supertypes {
        if supertype == &def.name {
            return Err(InvalidNodeTypeDef::SelfSupertype {
                name: def.name.clone(),
            }
            .into());
        }
        if !map.contains_key(supertype) {
            return Err(InvalidNodeTypeDef::UnknownSupertype {
                name: def.name.clone(),
                supertype: supertype.clone(),
            }
            .into());
        }
    }

    // inheritance cycles, reported with the offending path
    if let Some(cycle) = find_cycle(&def.name, |n| {
        map.get(n)
            .map(|d| d.supertypes.clone())
            .unwrap_or_default()
    }) {
        return Err(InvalidNodeTypeDef::InheritanceCycle { cycle }.into());
    }

    // supertypes must merge cleanly, and a non-mixin type must sit under the
    // base type
    let supertype_ent = EffectiveNodeType::build(&lookup, &def.supertypes)?;
    if !def.mixin && def.name != *well_known::NT_BASE && !supertype_ent.includes(&well_known::NT_BASE)
    {
        return Err(InvalidNodeTypeDef::MissingBaseType {
            name: def.name.clone(),
            base: well_known::NT_BASE.clone(),
        }
        .into());
    }

    for prop in &def.property_defs {
        let bad = |reason: String| InvalidNodeTypeDef::BadPropertyDef {
            name: def.name.clone(),
            prop: prop.name.clone(),
            reason,
        };
        if prop.declaring_type != def.name {
            return Err(bad(format!(
                "declaring type is {}, expected {}",
                prop.declaring_type, def.name
            ))
            .into());
        }
        if !prop.name.is_residual() {
            check_namespace(&def.name, &prop.name, namespaces)?;
        }
        if prop.auto_created {
            if prop.name.is_residual() {
                return Err(bad("an auto-created definition cannot be residual".into()).into());
            }
            if prop.required_type == PropertyType::Undefined {
                return Err(
                    bad("an auto-created property needs a fixed required type".into()).into(),
                );
            }
        }
        if prop.required_type != PropertyType::Undefined {
            for value in &prop.default_values {
                if value.ty() != prop.required_type {
                    return Err(bad(format!(
                        "default value of type {} does not match required type {}",
                        value.ty(),
                        prop.required_type
                    ))
                    .into());
                }
            }
        }
        if prop.required_type == PropertyType::Reference {
            for constraint in &prop.value_constraints {
                let target = Name::from_expanded(constraint).map_err(|_| {
                    bad(format!("malformed value constraint {constraint:?}"))
                })?;
                if !map.contains_key(&target) {
                    return Err(bad(format!(
                        "value constraint names unknown node type {target}"
                    ))
                    .into());
                }
            }
        }
    }

    for child in &def.child_node_defs {
        let bad = |reason: String| InvalidNodeTypeDef::BadChildNodeDef {
            name: def.name.clone(),
            child: child.name.clone(),
            reason,
        };
        if child.declaring_type != def.name {
            return Err(bad(format!(
                "declaring type is {}, expected {}",
                child.declaring_type, def.name
            ))
            .into());
        }
        if !child.name.is_residual() {
            check_namespace(&def.name, &child.name, namespaces)?;
        }
        if child.auto_created {
            if child.name.is_residual() {
                return Err(bad("an auto-created definition cannot be residual".into()).into());
            }
            if child.default_primary_type.is_none() {
                return Err(
                    bad("an auto-created child needs a default primary type".into()).into(),
                );
            }
        }
        for required in &child.required_primary_types {
            if !map.contains_key(required) {
                return Err(bad(format!(
                    "required primary type {required} is not registered"
                ))
                .into());
            }
        }
        if let Some(default) = &child.default_primary_type {
            if !map.contains_key(default) {
                return Err(bad(format!(
                    "default primary type {default} is not registered"
                ))
                .into());
            }
            // the default must itself satisfy the constraints it will be
            // created under
            let default_ent = EffectiveNodeType::build(&lookup, std::slice::from_ref(default))?;
            for required in &child.required_primary_types {
                if !default_ent.includes(required) {
                    return Err(bad(format!(
                        "default primary type {default} does not satisfy required type {required}"
                    ))
                    .into());
                }
            }
        }
    }

    // auto-created children must not form a creation cycle
    if let Some(cycle) = find_cycle(&def.name, |n| {
        map.get(n)
            .map(|d| {
                d.child_node_defs
                    .iter()
                    .filter(|c| c.auto_created)
                    .filter_map(|c| c.default_primary_type.clone())
                    .collect()
            })
            .unwrap_or_default()
    }) {
        return Err(InvalidNodeTypeDef::AutoCreationCycle { cycle }.into());
    }

    // finally the definition must merge with its own supertype closure
    EffectiveNodeType::build(&lookup, std::slice::from_ref(&def.name))?;

    Ok(())
}

fn check_namespace(
    def_name: &Name,
    name: &Name,
    namespaces: &NamespaceRegistry,
) -> Result<(), InvalidNodeTypeDef> {
    if namespaces.is_registered_uri(name.namespace()) {
        Ok(())
    } else {
        Err(InvalidNodeTypeDef::UnregisteredNamespace {
            name: def_name.clone(),
            uri: name.namespace().to_string(),
        })
    }
}

/// Depth-first search for a cycle reachable from `start`, following `edges`.
/// The returned path starts and ends with the same name.
fn find_cycle<F>(start: &Name, edges: F) -> Option<Vec<Name>>
where
    F: Fn(&Name) -> Vec<Name>,
{
    fn visit<F>(
        node: &Name,
        edges: &F,
        path: &mut Vec<Name>,
        done: &mut BTreeSet<Name>,
    ) -> Option<Vec<Name>>
    where
        F: Fn(&Name) -> Vec<Name>,
    {
        if let Some(pos) = path.iter().position(|n| n == node) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        path.push(node.clone());
        for next in edges(node) {
            if let Some(cycle) = visit(&next, edges, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node.clone());
        None
    }

    let mut path = Vec::new();
    let mut done = BTreeSet::new();
    visit(start, &edges, &mut path, &mut done)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn cycle_detection_reports_the_path() {
        let edges = |n: &Name| -> Vec<Name> {
            match n.local_name() {
                "a" => vec![Name::unqualified("b")],
                "b" => vec![Name::unqualified("c"), Name::unqualified("a")],
                _ => vec![],
            }
        };
        let cycle = find_cycle(&Name::unqualified("a"), edges).unwrap();
        let rendered: Vec<_> = cycle.iter().map(|n| n.local_name().to_string()).collect();
        assert_eq!(rendered, vec!["a", "b", "a"]);
    }

    #[test]
    fn acyclic_graphs_pass() {
        let edges = |n: &Name| -> Vec<Name> {
            match n.local_name() {
                "a" => vec![Name::unqualified("b"), Name::unqualified("c")],
                "b" => vec![Name::unqualified("c")],
                _ => vec![],
            }
        };
        assert_matches!(find_cycle(&Name::unqualified("a"), edges), None);
    }
}
