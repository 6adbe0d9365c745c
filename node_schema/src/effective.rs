//! Effective (merged) node types.

use std::collections::{BTreeMap, BTreeSet};

use data_types::{ChildNodeDef, Name, NodeTypeDef, PropertyDef, PropertyType};

use crate::error::{NodeTypeConflict, RegistryError};

/// The transitive, merged closure of a set of node-type names.
///
/// An effective type is a flat table: all property and child-node definitions
/// contributed by the member types and their supertype closures, indexed by
/// name with residual (`*`) definitions kept separately. The validator and
/// the operation layer consume these tables directly; no inheritance walk
/// happens at operation time.
#[derive(Debug, Clone)]
pub struct EffectiveNodeType {
    /// The explicitly aggregated member names (the cache key).
    merged_types: BTreeSet<Name>,
    /// The full transitive closure, including `merged_types`.
    all_types: BTreeSet<Name>,
    named_prop_defs: BTreeMap<Name, Vec<PropertyDef>>,
    residual_prop_defs: Vec<PropertyDef>,
    named_child_defs: BTreeMap<Name, Vec<ChildNodeDef>>,
    residual_child_defs: Vec<ChildNodeDef>,
}

impl EffectiveNodeType {
    /// The effective type of a single definition, not yet including its
    /// supertypes.
    pub(crate) fn from_def(def: &NodeTypeDef) -> Result<Self, NodeTypeConflict> {
        let mut ent = Self {
            merged_types: BTreeSet::from([def.name.clone()]),
            all_types: BTreeSet::from([def.name.clone()]),
            named_prop_defs: BTreeMap::new(),
            residual_prop_defs: Vec::new(),
            named_child_defs: BTreeMap::new(),
            residual_child_defs: Vec::new(),
        };
        for prop in &def.property_defs {
            ent.add_prop_def(prop)?;
        }
        for child in &def.child_node_defs {
            ent.add_child_def(child)?;
        }
        Ok(ent)
    }

    /// Build the full effective type of `names` against `lookup`, without any
    /// caching. Used by the validator against provisional maps; the registry
    /// keeps its own memoizing variant.
    pub(crate) fn build<'a, F>(lookup: &F, names: &[Name]) -> Result<Self, RegistryError>
    where
        F: Fn(&Name) -> Option<&'a NodeTypeDef>,
    {
        let mut acc: Option<Self> = None;
        for name in names {
            let single = Self::build_single(lookup, name)?;
            acc = Some(match acc {
                None => single,
                Some(acc) => acc.merge(&single)?,
            });
        }
        match acc {
            Some(acc) => Ok(acc),
            None => Ok(Self {
                merged_types: BTreeSet::new(),
                all_types: BTreeSet::new(),
                named_prop_defs: BTreeMap::new(),
                residual_prop_defs: Vec::new(),
                named_child_defs: BTreeMap::new(),
                residual_child_defs: Vec::new(),
            }),
        }
    }

    fn build_single<'a, F>(lookup: &F, name: &Name) -> Result<Self, RegistryError>
    where
        F: Fn(&Name) -> Option<&'a NodeTypeDef>,
    {
        let def = lookup(name).ok_or_else(|| RegistryError::NoSuchNodeType(name.clone()))?;
        let mut ent = Self::from_def(def).map_err(RegistryError::Conflict)?;
        for supertype in &def.supertypes {
            let inherited = Self::build_single(lookup, supertype)?;
            ent.absorb(&inherited).map_err(RegistryError::Conflict)?;
        }
        Ok(ent)
    }

    /// The explicitly aggregated member names.
    pub fn merged_types(&self) -> &BTreeSet<Name> {
        &self.merged_types
    }

    /// The full transitive closure of member names.
    pub fn all_types(&self) -> &BTreeSet<Name> {
        &self.all_types
    }

    /// `true` iff `name` is in the transitive closure.
    pub fn includes(&self, name: &Name) -> bool {
        self.all_types.contains(name)
    }

    /// The build-cost estimate used as the cache weight.
    pub fn weight(&self) -> usize {
        self.all_types.len()
    }

    /// Merge with another aggregate: member sets union, definitions union,
    /// incompatible same-name definitions fail.
    pub fn merge(&self, other: &Self) -> Result<Self, NodeTypeConflict> {
        let mut merged = self.clone();
        merged
            .merged_types
            .extend(other.merged_types.iter().cloned());
        merged.absorb(other)?;
        Ok(merged)
    }

    /// Union `other`'s closure and definitions into a copy of `self` without
    /// making its members explicit: how a type takes in a supertype.
    pub(crate) fn inherit(&self, other: &Self) -> Result<Self, NodeTypeConflict> {
        let mut inherited = self.clone();
        inherited.absorb(other)?;
        Ok(inherited)
    }

    /// Union `other`'s closure and definitions into `self` without making its
    /// members explicit. This is how supertype content is inherited.
    fn absorb(&mut self, other: &Self) -> Result<(), NodeTypeConflict> {
        self.all_types.extend(other.all_types.iter().cloned());
        for defs in other.named_prop_defs.values() {
            for def in defs {
                self.add_prop_def(def)?;
            }
        }
        for def in &other.residual_prop_defs {
            self.add_prop_def(def)?;
        }
        for defs in other.named_child_defs.values() {
            for def in defs {
                self.add_child_def(def)?;
            }
        }
        for def in &other.residual_child_defs {
            self.add_child_def(def)?;
        }
        Ok(())
    }

    fn add_prop_def(&mut self, def: &PropertyDef) -> Result<(), NodeTypeConflict> {
        if def.is_residual() {
            if !self.residual_prop_defs.contains(def) {
                self.residual_prop_defs.push(def.clone());
            }
            return Ok(());
        }
        let existing = self.named_prop_defs.entry(def.name.clone()).or_default();
        for present in existing.iter() {
            if present == def {
                // identical definition reached via two inheritance paths
                return Ok(());
            }
            if present.required_type != def.required_type {
                return Err(NodeTypeConflict {
                    name: def.name.clone(),
                    reason: format!(
                        "required type {} (from {}) vs {} (from {})",
                        present.required_type,
                        present.declaring_type,
                        def.required_type,
                        def.declaring_type
                    ),
                });
            }
            if present.multiple != def.multiple {
                return Err(NodeTypeConflict {
                    name: def.name.clone(),
                    reason: format!(
                        "cardinality disagrees between {} and {}",
                        present.declaring_type, def.declaring_type
                    ),
                });
            }
        }
        existing.push(def.clone());
        Ok(())
    }

    fn add_child_def(&mut self, def: &ChildNodeDef) -> Result<(), NodeTypeConflict> {
        if def.is_residual() {
            if !self.residual_child_defs.contains(def) {
                self.residual_child_defs.push(def.clone());
            }
            return Ok(());
        }
        let existing = self.named_child_defs.entry(def.name.clone()).or_default();
        for present in existing.iter() {
            if present == def {
                return Ok(());
            }
            let mut a: Vec<_> = present.required_primary_types.clone();
            let mut b: Vec<_> = def.required_primary_types.clone();
            a.sort();
            b.sort();
            if a != b {
                return Err(NodeTypeConflict {
                    name: def.name.clone(),
                    reason: format!(
                        "required primary types disagree between {} and {}",
                        present.declaring_type, def.declaring_type
                    ),
                });
            }
            if present.allows_same_name_siblings != def.allows_same_name_siblings {
                return Err(NodeTypeConflict {
                    name: def.name.clone(),
                    reason: format!(
                        "same-name-sibling policy disagrees between {} and {}",
                        present.declaring_type, def.declaring_type
                    ),
                });
            }
        }
        existing.push(def.clone());
        Ok(())
    }

    /// All property definitions declared for `name` (named definitions only).
    pub fn named_property_defs(&self, name: &Name) -> &[PropertyDef] {
        self.named_prop_defs
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Every property definition, named ones first.
    pub fn property_defs(&self) -> impl Iterator<Item = &PropertyDef> {
        self.named_prop_defs
            .values()
            .flatten()
            .chain(self.residual_prop_defs.iter())
    }

    /// Every child-node definition, named ones first.
    pub fn child_node_defs(&self) -> impl Iterator<Item = &ChildNodeDef> {
        self.named_child_defs
            .values()
            .flatten()
            .chain(self.residual_child_defs.iter())
    }

    /// The mandatory property definitions of this effective type.
    pub fn mandatory_property_defs(&self) -> impl Iterator<Item = &PropertyDef> {
        self.named_prop_defs
            .values()
            .flatten()
            .filter(|d| d.mandatory)
    }

    /// The mandatory child-node definitions of this effective type.
    pub fn mandatory_child_node_defs(&self) -> impl Iterator<Item = &ChildNodeDef> {
        self.named_child_defs
            .values()
            .flatten()
            .filter(|d| d.mandatory)
    }

    /// The auto-created property definitions of this effective type.
    pub fn auto_created_property_defs(&self) -> impl Iterator<Item = &PropertyDef> {
        self.named_prop_defs
            .values()
            .flatten()
            .filter(|d| d.auto_created)
    }

    /// The auto-created child-node definitions of this effective type.
    pub fn auto_created_child_node_defs(&self) -> impl Iterator<Item = &ChildNodeDef> {
        self.named_child_defs
            .values()
            .flatten()
            .filter(|d| d.auto_created)
    }

    /// The property definition applying to a value of type `ty` (with the
    /// given cardinality) stored under `name`.
    ///
    /// Named definitions win over residual ones; within each group an exact
    /// type match wins over an UNDEFINED one.
    pub fn applicable_property_def(
        &self,
        name: &Name,
        ty: PropertyType,
        multiple: bool,
    ) -> Option<&PropertyDef> {
        fn pick<'d>(
            defs: &'d [PropertyDef],
            ty: PropertyType,
            multiple: bool,
        ) -> Option<&'d PropertyDef> {
            let candidates = || defs.iter().filter(|d| d.multiple == multiple);
            candidates()
                .find(|d| d.required_type == ty)
                .or_else(|| candidates().find(|d| d.required_type == PropertyType::Undefined))
        }

        self.named_prop_defs
            .get(name)
            .and_then(|defs| pick(defs, ty, multiple))
            .or_else(|| pick(&self.residual_prop_defs, ty, multiple))
    }

    /// The child-node definition applying to a child stored under `name`
    /// whose effective type is `child` (or unknown when `None`).
    ///
    /// Named definitions win over residual ones; within each group the first
    /// definition whose required primary types the child satisfies wins. An
    /// unknown child type matches the first definition of the group, whose
    /// default primary type is then used to create the child.
    pub fn applicable_child_node_def(
        &self,
        name: &Name,
        child: Option<&EffectiveNodeType>,
    ) -> Option<&ChildNodeDef> {
        fn pick<'d>(
            defs: &'d [ChildNodeDef],
            child: Option<&EffectiveNodeType>,
        ) -> Option<&'d ChildNodeDef> {
            defs.iter().find(|d| match child {
                Some(child) => d
                    .required_primary_types
                    .iter()
                    .all(|required| child.includes(required)),
                None => true,
            })
        }

        self.named_child_defs
            .get(name)
            .and_then(|defs| pick(defs, child))
            .or_else(|| pick(&self.residual_child_defs, child))
    }
}

#[cfg(test)]
mod tests {
    use data_types::well_known;

    use super::*;

    fn def(name: &str, supertypes: &[&Name]) -> NodeTypeDef {
        NodeTypeDef::new(
            Name::unqualified(name),
            supertypes.iter().map(|n| (*n).clone()).collect(),
        )
    }

    fn prop(declaring: &Name, name: &str, ty: PropertyType, multiple: bool) -> PropertyDef {
        PropertyDef {
            declaring_type: declaring.clone(),
            name: if name == "*" {
                Name::residual()
            } else {
                Name::unqualified(name)
            },
            required_type: ty,
            auto_created: false,
            mandatory: false,
            protected: false,
            multiple,
            on_parent_version: Default::default(),
            value_constraints: vec![],
            default_values: vec![],
        }
    }

    #[test]
    fn build_resolves_supertype_closure() {
        let base = def("base", &[]);
        let mid_name = Name::unqualified("mid");
        let mid = def("mid", &[&base.name]);
        let leaf = def("leaf", &[&mid_name]);

        let defs = [base, mid, leaf];
        let lookup = |n: &Name| defs.iter().find(|d| &d.name == n);

        let ent = EffectiveNodeType::build(&lookup, &[Name::unqualified("leaf")]).unwrap();
        assert_eq!(ent.merged_types().len(), 1);
        assert_eq!(ent.all_types().len(), 3);
        assert!(ent.includes(&Name::unqualified("base")));
        assert_eq!(ent.weight(), 3);
    }

    #[test]
    fn merge_unions_members_and_defs() {
        let mut a = def("a", &[]);
        a.property_defs
            .push(prop(&a.name, "title", PropertyType::String, false));
        let mut b = def("b", &[]);
        b.property_defs
            .push(prop(&b.name, "count", PropertyType::Long, false));

        let ea = EffectiveNodeType::from_def(&a).unwrap();
        let eb = EffectiveNodeType::from_def(&b).unwrap();
        let merged = ea.merge(&eb).unwrap();

        assert_eq!(merged.merged_types().len(), 2);
        assert!(merged
            .applicable_property_def(&Name::unqualified("title"), PropertyType::String, false)
            .is_some());
        assert!(merged
            .applicable_property_def(&Name::unqualified("count"), PropertyType::Long, false)
            .is_some());
    }

    #[test]
    fn conflicting_required_types_fail_to_merge() {
        let mut a = def("a", &[]);
        a.property_defs
            .push(prop(&a.name, "x", PropertyType::String, false));
        let mut b = def("b", &[]);
        b.property_defs
            .push(prop(&b.name, "x", PropertyType::Long, false));

        let ea = EffectiveNodeType::from_def(&a).unwrap();
        let eb = EffectiveNodeType::from_def(&b).unwrap();
        let err = ea.merge(&eb).unwrap_err();
        assert_eq!(err.name, Name::unqualified("x"));
    }

    #[test]
    fn conflicting_cardinality_fails_to_merge() {
        let mut a = def("a", &[]);
        a.property_defs
            .push(prop(&a.name, "x", PropertyType::String, false));
        let mut b = def("b", &[]);
        b.property_defs
            .push(prop(&b.name, "x", PropertyType::String, true));

        let ea = EffectiveNodeType::from_def(&a).unwrap();
        let eb = EffectiveNodeType::from_def(&b).unwrap();
        let err = ea.merge(&eb).unwrap_err();
        assert_eq!(err.name, Name::unqualified("x"));
    }

    #[test]
    fn diamond_inheritance_dedups_definitions() {
        let mut base = def("base", &[]);
        base.property_defs
            .push(prop(&base.name, "shared", PropertyType::String, false));
        let base_name = base.name.clone();
        let left = def("left", &[&base_name]);
        let right = def("right", &[&base_name]);
        let leaf = def(
            "leaf",
            &[&Name::unqualified("left"), &Name::unqualified("right")],
        );

        let defs = [base, left, right, leaf];
        let lookup = |n: &Name| defs.iter().find(|d| &d.name == n);
        let ent = EffectiveNodeType::build(&lookup, &[Name::unqualified("leaf")]).unwrap();

        // the shared definition is reached via both paths but kept once
        assert_eq!(
            ent.named_property_defs(&Name::unqualified("shared")).len(),
            1
        );
        assert_eq!(ent.all_types().len(), 4);
    }

    #[test]
    fn applicable_property_def_prefers_exact_type() {
        let name = Name::unqualified("t");
        let mut d = def("t", &[]);
        d.property_defs
            .push(prop(&name, "*", PropertyType::Undefined, false));
        d.property_defs
            .push(prop(&name, "x", PropertyType::Undefined, false));
        d.property_defs
            .push(prop(&name, "x", PropertyType::Long, false));

        let ent = EffectiveNodeType::from_def(&d).unwrap();
        let picked = ent
            .applicable_property_def(&Name::unqualified("x"), PropertyType::Long, false)
            .unwrap();
        assert_eq!(picked.required_type, PropertyType::Long);

        // a string value under the same name falls back to the UNDEFINED def
        let picked = ent
            .applicable_property_def(&Name::unqualified("x"), PropertyType::String, false)
            .unwrap();
        assert_eq!(picked.required_type, PropertyType::Undefined);

        // any other name lands on the residual def
        let picked = ent
            .applicable_property_def(&Name::unqualified("y"), PropertyType::Boolean, false)
            .unwrap();
        assert!(picked.is_residual());

        // no multi-valued def exists at all
        assert!(ent
            .applicable_property_def(&Name::unqualified("x"), PropertyType::Long, true)
            .is_none());
    }

    #[test]
    fn applicable_child_def_checks_required_types() {
        let parent = Name::unqualified("parent");
        let mut d = def("parent", &[]);
        d.child_node_defs.push(ChildNodeDef {
            declaring_type: parent.clone(),
            name: Name::unqualified("doc"),
            required_primary_types: vec![well_known::NT_HIERARCHY_NODE.clone()],
            default_primary_type: Some(well_known::NT_FOLDER.clone()),
            auto_created: false,
            mandatory: false,
            protected: false,
            on_parent_version: Default::default(),
            allows_same_name_siblings: false,
        });
        let ent = EffectiveNodeType::from_def(&d).unwrap();

        let folder = {
            let folder_def = NodeTypeDef::new(
                well_known::NT_FOLDER.clone(),
                vec![well_known::NT_HIERARCHY_NODE.clone()],
            );
            let hierarchy_def = NodeTypeDef::new(well_known::NT_HIERARCHY_NODE.clone(), vec![]);
            let defs = [folder_def, hierarchy_def];
            let lookup = |n: &Name| defs.iter().find(|d| &d.name == n);
            EffectiveNodeType::build(&lookup, &[well_known::NT_FOLDER.clone()]).unwrap()
        };
        let plain = {
            let plain_def = NodeTypeDef::new(Name::unqualified("plain"), vec![]);
            EffectiveNodeType::from_def(&plain_def).unwrap()
        };

        assert!(ent
            .applicable_child_node_def(&Name::unqualified("doc"), Some(&folder))
            .is_some());
        assert!(ent
            .applicable_child_node_def(&Name::unqualified("doc"), Some(&plain))
            .is_none());
        // unknown child type matches; caller then uses the default type
        let picked = ent
            .applicable_child_node_def(&Name::unqualified("doc"), None)
            .unwrap();
        assert_eq!(
            picked.default_primary_type.as_ref(),
            Some(&*well_known::NT_FOLDER)
        );
    }
}
