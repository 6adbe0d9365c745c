//! The node-type registry.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use data_types::{Name, NamespaceRegistry, NodeTypeDef};
use observability_deps::tracing::{debug, info};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::builtin::builtin_definitions;
use crate::cache::EffectiveTypeCache;
use crate::effective::EffectiveNodeType;
use crate::error::RegistryError;
use crate::store::DefinitionStore;
use crate::validate::{validate_def, ProvisionalMap};
use crate::Result;

/// The hook consulted before a node type is unregistered or non-trivially
/// reregistered: it must prove that no persisted content still uses the type.
pub trait ContentClearance: Debug + Send + Sync {
    /// Succeeds iff no content of type `name` exists.
    fn ensure_unused(&self, name: &Name) -> Result<()>;
}

/// The conservative default [`ContentClearance`]: no scan is implemented, so
/// every request is refused as [`RegistryError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedContentCheck;

impl ContentClearance for UnsupportedContentCheck {
    fn ensure_unused(&self, _name: &Name) -> Result<()> {
        Err(RegistryError::Unsupported("content-reference scan"))
    }
}

/// A [`ContentClearance`] that waves everything through.
///
/// Only correct when the caller can guarantee no typed content exists for the
/// types being cleared, e.g. freshly bootstrapped stores and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveContentCheck;

impl ContentClearance for PermissiveContentCheck {
    fn ensure_unused(&self, _name: &Name) -> Result<()> {
        Ok(())
    }
}

/// The schema engine: validates definitions, resolves inheritance and
/// aggregation into cached [`EffectiveNodeType`]s, and answers dependency
/// questions.
///
/// Shared by every session of a repository. Reads are concurrent; writes and
/// effective-type-cache mutation are serialized under the registry's lock.
pub struct NodeTypeRegistry {
    namespaces: Arc<NamespaceRegistry>,
    definition_store: Arc<dyn DefinitionStore>,
    content: Arc<dyn ContentClearance>,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    registered: HashMap<Name, Arc<NodeTypeDef>>,
    builtin: HashSet<Name>,
    cache: EffectiveTypeCache,
}

impl Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("NodeTypeRegistry")
            .field("registered", &inner.registered.len())
            .field("builtin", &inner.builtin.len())
            .finish_non_exhaustive()
    }
}

impl NodeTypeRegistry {
    /// Initialise a registry: parse and register the built-in catalog, then
    /// re-register the custom definitions found in `definition_store`.
    pub fn new(
        namespaces: Arc<NamespaceRegistry>,
        definition_store: Arc<dyn DefinitionStore>,
        content: Arc<dyn ContentClearance>,
    ) -> Result<Self> {
        let registry = Self {
            namespaces,
            definition_store,
            content,
            inner: RwLock::new(Inner::default()),
        };
        {
            let mut inner = registry.inner.write();
            let builtins = builtin_definitions()?;
            registry.register_batch_locked(&mut inner, builtins, true, false)?;
            let custom = registry.definition_store.load_all()?;
            let n_custom = custom.len();
            registry.register_batch_locked(&mut inner, custom, false, false)?;
            info!(
                builtin = inner.builtin.len(),
                custom = n_custom,
                "node type registry initialised"
            );
        }
        Ok(registry)
    }

    /// The declared definition of `name`.
    pub fn get(&self, name: &Name) -> Result<Arc<NodeTypeDef>> {
        self.inner
            .read()
            .registered
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NoSuchNodeType(name.clone()))
    }

    /// `true` iff `name` is registered.
    pub fn is_registered(&self, name: &Name) -> bool {
        self.inner.read().registered.contains_key(name)
    }

    /// `true` iff `name` is part of the immutable built-in catalog.
    pub fn is_builtin(&self, name: &Name) -> bool {
        self.inner.read().builtin.contains(name)
    }

    /// Every registered type name.
    pub fn all_names(&self) -> Vec<Name> {
        self.inner.read().registered.keys().cloned().collect()
    }

    /// The registered types whose dependency set contains `name`.
    pub fn dependents(&self, name: &Name) -> Vec<Name> {
        self.inner
            .read()
            .registered
            .values()
            .filter(|d| d.dependencies().contains(name))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Validate and register one definition.
    pub fn register(&self, def: NodeTypeDef) -> Result<()> {
        self.register_batch(vec![def])
    }

    /// Validate and register a batch. The batch is validated against a
    /// provisional map containing the whole batch, so definitions may
    /// cross-reference each other; a failure registers nothing.
    pub fn register_batch(&self, defs: Vec<NodeTypeDef>) -> Result<()> {
        let mut inner = self.inner.write();
        self.register_batch_locked(&mut inner, defs, false, true)
    }

    fn register_batch_locked(
        &self,
        inner: &mut Inner,
        defs: Vec<NodeTypeDef>,
        builtin: bool,
        persist: bool,
    ) -> Result<()> {
        let mut provisional: ProvisionalMap = inner.registered.clone();
        for def in &defs {
            if provisional.contains_key(&def.name) {
                return Err(RegistryError::AlreadyRegistered(def.name.clone()));
            }
            provisional.insert(def.name.clone(), Arc::new(def.clone()));
        }
        for def in &defs {
            validate_def(def, &provisional, &self.namespaces)?;
        }

        if persist {
            // keep the store and the map in step: undo partial persists
            let mut persisted: Vec<&Name> = Vec::new();
            for def in &defs {
                if let Err(e) = self.definition_store.store(def) {
                    for name in persisted {
                        let _ = self.definition_store.remove(name);
                    }
                    return Err(e.into());
                }
                persisted.push(&def.name);
            }
        }
        for def in defs {
            debug!(name = %def.name, builtin, "registered node type");
            if builtin {
                inner.builtin.insert(def.name.clone());
            }
            inner.registered.insert(def.name.clone(), Arc::new(def));
        }
        Ok(())
    }

    /// Unregister one custom definition.
    pub fn unregister(&self, name: &Name) -> Result<()> {
        self.unregister_batch(std::slice::from_ref(name))
    }

    /// Unregister a batch of custom definitions. Dependencies inside the
    /// batch are allowed; a failure unregisters nothing.
    pub fn unregister_batch(&self, names: &[Name]) -> Result<()> {
        let mut inner = self.inner.write();
        for name in names {
            if !inner.registered.contains_key(name) {
                return Err(RegistryError::NoSuchNodeType(name.clone()));
            }
            if inner.builtin.contains(name) {
                return Err(RegistryError::BuiltIn(name.clone()));
            }
        }
        for name in names {
            let dependents: Vec<Name> = inner
                .registered
                .values()
                .filter(|d| !names.contains(&d.name) && d.dependencies().contains(name))
                .map(|d| d.name.clone())
                .collect();
            if !dependents.is_empty() {
                return Err(RegistryError::HasDependents {
                    name: name.clone(),
                    dependents,
                });
            }
            self.content.ensure_unused(name)?;
        }
        for name in names {
            self.definition_store.remove(name)?;
            inner.registered.remove(name);
            inner.cache.evict_containing(name);
            debug!(%name, "unregistered node type");
        }
        Ok(())
    }

    /// Replace the registered definition of `def.name`.
    ///
    /// Trivial (additive, non-content-affecting) changes apply at any time;
    /// anything else requires the content-clearance hook to prove the type
    /// unused.
    pub fn reregister(&self, def: NodeTypeDef) -> Result<()> {
        let mut inner = self.inner.write();
        let old = inner
            .registered
            .get(&def.name)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NoSuchNodeType(def.name.clone()))?;
        if inner.builtin.contains(&def.name) {
            return Err(RegistryError::BuiltIn(def.name.clone()));
        }
        if !diff_is_trivial(&old, &def) {
            self.content.ensure_unused(&def.name)?;
        }

        let mut provisional: ProvisionalMap = inner.registered.clone();
        provisional.insert(def.name.clone(), Arc::new(def.clone()));
        validate_def(&def, &provisional, &self.namespaces)?;

        self.definition_store.store(&def)?;
        inner.cache.evict_containing(&def.name);
        debug!(name = %def.name, "reregistered node type");
        inner.registered.insert(def.name.clone(), Arc::new(def));
        Ok(())
    }

    /// The effective type of a single registered type.
    pub fn effective_node_type(&self, name: &Name) -> Result<Arc<EffectiveNodeType>> {
        self.effective_node_type_of(std::slice::from_ref(name))
    }

    /// The effective type of an aggregate of registered types, e.g. a node's
    /// primary type plus its mixins. Memoized in the weighted cache, together
    /// with every intermediate aggregate built along the way.
    pub fn effective_node_type_of(&self, names: &[Name]) -> Result<Arc<EffectiveNodeType>> {
        let requested: BTreeSet<Name> = names.iter().cloned().collect();

        let inner = self.inner.upgradable_read();
        for name in &requested {
            if !inner.registered.contains_key(name) {
                return Err(RegistryError::NoSuchNodeType(name.clone()));
            }
        }
        if let Some(hit) = inner.cache.get(&requested) {
            return Ok(hit);
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        Self::build_aggregate(&mut inner, &requested)
    }

    /// Cover `requested` with the largest cached subsets available, building
    /// and caching what is missing.
    fn build_aggregate(
        inner: &mut Inner,
        requested: &BTreeSet<Name>,
    ) -> Result<Arc<EffectiveNodeType>> {
        let mut remaining = requested.clone();
        let mut acc: Option<Arc<EffectiveNodeType>> = None;
        while !remaining.is_empty() {
            let part = match inner.cache.largest_subset(&remaining) {
                Some(key) => {
                    let set: BTreeSet<Name> = key.names().iter().cloned().collect();
                    inner
                        .cache
                        .get(&set)
                        .expect("key list and entry map out of sync")
                }
                None => {
                    let name = remaining
                        .iter()
                        .next()
                        .expect("remaining is non-empty")
                        .clone();
                    Self::build_single(inner, &name)?
                }
            };
            for name in part.merged_types() {
                remaining.remove(name);
            }
            acc = Some(match acc {
                None => part,
                Some(acc) => {
                    let merged = Arc::new(acc.merge(&part)?);
                    // every intermediate aggregate is worth remembering
                    inner.cache.put(Arc::clone(&merged));
                    merged
                }
            });
        }
        let ent = acc.ok_or(RegistryError::EmptyAggregate)?;
        inner.cache.put(Arc::clone(&ent));
        Ok(ent)
    }

    /// The effective type of one type name, built recursively over its
    /// supertypes, each level memoized.
    fn build_single(inner: &mut Inner, name: &Name) -> Result<Arc<EffectiveNodeType>> {
        let singleton = BTreeSet::from([name.clone()]);
        if let Some(hit) = inner.cache.get(&singleton) {
            return Ok(hit);
        }
        let def = inner
            .registered
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::NoSuchNodeType(name.clone()))?;
        let mut ent = EffectiveNodeType::from_def(&def)?;
        for supertype in &def.supertypes {
            let inherited = Self::build_single(inner, supertype)?;
            ent = ent.inherit(&inherited)?;
        }
        let ent = Arc::new(ent);
        inner.cache.put(Arc::clone(&ent));
        Ok(ent)
    }
}

/// `true` iff replacing `old` with `new` cannot affect existing content:
/// flags and hierarchy are unchanged, no declared item definition was removed
/// or altered, and every addition is optional.
fn diff_is_trivial(old: &NodeTypeDef, new: &NodeTypeDef) -> bool {
    let mut old_supers: Vec<_> = old.supertypes.clone();
    let mut new_supers: Vec<_> = new.supertypes.clone();
    old_supers.sort();
    new_supers.sort();
    if old_supers != new_supers
        || old.mixin != new.mixin
        || old.orderable_child_nodes != new.orderable_child_nodes
        || old.primary_item != new.primary_item
    {
        return false;
    }
    for prop in &old.property_defs {
        if !new.property_defs.contains(prop) {
            return false;
        }
    }
    for child in &old.child_node_defs {
        if !new.child_node_defs.contains(child) {
            return false;
        }
    }
    let added_props = new
        .property_defs
        .iter()
        .filter(|p| !old.property_defs.contains(p));
    if added_props.into_iter().any(|p| p.mandatory) {
        return false;
    }
    let added_children = new
        .child_node_defs
        .iter()
        .filter(|c| !old.child_node_defs.contains(c));
    if added_children.into_iter().any(|c| c.mandatory) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use data_types::{well_known, PropertyDef, PropertyType};
    use proptest::prelude::*;

    use super::*;
    use crate::error::InvalidNodeTypeDef;
    use crate::store::MemDefinitionStore;

    fn registry() -> NodeTypeRegistry {
        NodeTypeRegistry::new(
            Arc::new(NamespaceRegistry::new()),
            Arc::new(MemDefinitionStore::new()),
            Arc::new(PermissiveContentCheck),
        )
        .unwrap()
    }

    fn strict_registry() -> NodeTypeRegistry {
        NodeTypeRegistry::new(
            Arc::new(NamespaceRegistry::new()),
            Arc::new(MemDefinitionStore::new()),
            Arc::new(UnsupportedContentCheck),
        )
        .unwrap()
    }

    fn simple_type(name: &str) -> NodeTypeDef {
        NodeTypeDef::new(Name::unqualified(name), vec![well_known::NT_BASE.clone()])
    }

    fn prop_def(declaring: &Name, name: &str, ty: PropertyType) -> PropertyDef {
        PropertyDef {
            declaring_type: declaring.clone(),
            name: Name::unqualified(name),
            required_type: ty,
            auto_created: false,
            mandatory: false,
            protected: false,
            multiple: false,
            on_parent_version: Default::default(),
            value_constraints: vec![],
            default_values: vec![],
        }
    }

    #[test]
    fn builtins_are_bootstrapped() {
        let reg = registry();
        assert!(reg.is_registered(&well_known::NT_BASE));
        assert!(reg.is_builtin(&well_known::NT_UNSTRUCTURED));
        assert!(reg.all_names().len() >= 8);

        let ent = reg.effective_node_type(&well_known::NT_UNSTRUCTURED).unwrap();
        assert!(ent.includes(&well_known::NT_BASE));
        assert!(ent
            .applicable_property_def(&well_known::PRIMARY_TYPE, PropertyType::Name, false)
            .is_some());
    }

    #[test]
    fn register_and_resolve_custom_type() {
        let reg = registry();
        let name = Name::unqualified("page");
        let mut def = simple_type("page");
        def.property_defs
            .push(prop_def(&name, "title", PropertyType::String));
        reg.register(def).unwrap();

        let ent = reg.effective_node_type(&name).unwrap();
        assert!(ent.includes(&well_known::NT_BASE));
        assert!(ent
            .applicable_property_def(&Name::unqualified("title"), PropertyType::String, false)
            .is_some());

        // registering the same name twice fails and changes nothing
        assert_matches!(
            reg.register(simple_type("page")),
            Err(RegistryError::AlreadyRegistered(_))
        );
        assert!(reg.is_registered(&name));
    }

    #[test]
    fn unknown_supertype_is_rejected() {
        let reg = registry();
        let def = NodeTypeDef::new(
            Name::unqualified("orphan"),
            vec![Name::unqualified("nosuch")],
        );
        assert_matches!(
            reg.register(def),
            Err(RegistryError::InvalidDefinition(
                InvalidNodeTypeDef::UnknownSupertype { .. }
            ))
        );
        assert!(!reg.is_registered(&Name::unqualified("orphan")));
    }

    #[test]
    fn supertype_cycle_is_rejected_with_path() {
        let reg = registry();
        let mut a = NodeTypeDef::new(Name::unqualified("a"), vec![Name::unqualified("b")]);
        a.mixin = true;
        let mut b = NodeTypeDef::new(Name::unqualified("b"), vec![Name::unqualified("a")]);
        b.mixin = true;

        let err = reg.register_batch(vec![a, b]).unwrap_err();
        assert_matches!(
            &err,
            RegistryError::InvalidDefinition(InvalidNodeTypeDef::InheritanceCycle { cycle })
                if cycle.len() == 3
        );
        assert_eq!(err.to_string(), "inheritance cycle: a -> b -> a");
        // registry unchanged
        assert!(!reg.is_registered(&Name::unqualified("a")));
        assert!(!reg.is_registered(&Name::unqualified("b")));
    }

    #[test]
    fn batch_may_cross_reference_itself() {
        let reg = registry();
        let parent = simple_type("article");
        let child = NodeTypeDef::new(
            Name::unqualified("section"),
            vec![Name::unqualified("article")],
        );
        reg.register_batch(vec![child, parent]).unwrap();
        let ent = reg
            .effective_node_type(&Name::unqualified("section"))
            .unwrap();
        assert!(ent.includes(&Name::unqualified("article")));
    }

    #[test]
    fn non_mixin_without_base_is_rejected() {
        let reg = registry();
        let def = NodeTypeDef::new(Name::unqualified("floating"), vec![]);
        assert_matches!(
            reg.register(def),
            Err(RegistryError::InvalidDefinition(
                InvalidNodeTypeDef::MissingBaseType { .. }
            ))
        );
    }

    #[test]
    fn dependents_are_tracked() {
        let reg = registry();
        reg.register(simple_type("a")).unwrap();
        reg.register(NodeTypeDef::new(
            Name::unqualified("b"),
            vec![Name::unqualified("a"), well_known::NT_BASE.clone()],
        ))
        .unwrap();

        let deps = reg.dependents(&Name::unqualified("a"));
        assert_eq!(deps, vec![Name::unqualified("b")]);
    }

    #[test]
    fn unregister_refuses_builtin_and_depended_upon() {
        let reg = registry();
        assert_matches!(
            reg.unregister(&well_known::NT_BASE),
            Err(RegistryError::BuiltIn(_))
        );

        reg.register(simple_type("a")).unwrap();
        reg.register(NodeTypeDef::new(
            Name::unqualified("b"),
            vec![Name::unqualified("a"), well_known::NT_BASE.clone()],
        ))
        .unwrap();
        assert_matches!(
            reg.unregister(&Name::unqualified("a")),
            Err(RegistryError::HasDependents { .. })
        );

        // a batch containing both is self-consistent
        reg.unregister_batch(&[Name::unqualified("a"), Name::unqualified("b")])
            .unwrap();
        assert!(!reg.is_registered(&Name::unqualified("a")));

        assert_matches!(
            reg.unregister(&Name::unqualified("a")),
            Err(RegistryError::NoSuchNodeType(_))
        );
    }

    #[test]
    fn unregister_without_content_scan_is_unsupported() {
        let reg = strict_registry();
        reg.register(simple_type("a")).unwrap();
        assert_matches!(
            reg.unregister(&Name::unqualified("a")),
            Err(RegistryError::Unsupported(_))
        );
        // the failed unregister left the type in place
        assert!(reg.is_registered(&Name::unqualified("a")));
    }

    #[test]
    fn trivial_reregister_applies_without_clearance() {
        let reg = strict_registry();
        let name = Name::unqualified("page");
        reg.register(simple_type("page")).unwrap();

        // adding an optional property is trivial
        let mut updated = simple_type("page");
        updated
            .property_defs
            .push(prop_def(&name, "subtitle", PropertyType::String));
        reg.reregister(updated).unwrap();
        let ent = reg.effective_node_type(&name).unwrap();
        assert!(ent
            .applicable_property_def(&Name::unqualified("subtitle"), PropertyType::String, false)
            .is_some());

        // adding a mandatory property is not
        let mut breaking = simple_type("page");
        let mut title = prop_def(&name, "title", PropertyType::String);
        title.mandatory = true;
        breaking.property_defs.push(title);
        assert_matches!(reg.reregister(breaking), Err(RegistryError::Unsupported(_)));
    }

    #[test]
    fn reregister_evicts_stale_aggregates() {
        let reg = registry();
        let name = Name::unqualified("page");
        reg.register(simple_type("page")).unwrap();
        let before = reg.effective_node_type(&name).unwrap();
        assert!(before
            .applicable_property_def(&Name::unqualified("title"), PropertyType::String, false)
            .is_none());

        let mut updated = simple_type("page");
        updated
            .property_defs
            .push(prop_def(&name, "title", PropertyType::String));
        reg.reregister(updated).unwrap();

        let after = reg.effective_node_type(&name).unwrap();
        assert!(after
            .applicable_property_def(&Name::unqualified("title"), PropertyType::String, false)
            .is_some());
    }

    #[test]
    fn aggregate_effective_type_spans_mixins() {
        let reg = registry();
        let ent = reg
            .effective_node_type_of(&[
                well_known::NT_UNSTRUCTURED.clone(),
                well_known::MIX_REFERENCEABLE.clone(),
            ])
            .unwrap();
        assert!(ent.includes(&well_known::NT_BASE));
        assert!(ent.includes(&well_known::MIX_REFERENCEABLE));
        assert!(ent
            .applicable_property_def(&well_known::UUID, PropertyType::String, false)
            .is_some());
        assert_matches!(
            reg.effective_node_type_of(&[]),
            Err(RegistryError::EmptyAggregate)
        );
    }

    /// The §-free statement of the closure property: whatever the cache has
    /// seen before, an aggregate's member closure equals the union of the
    /// supertype closures of the requested names.
    #[test]
    fn effective_type_closure_is_cache_independent() {
        fn naive_closure(reg: &NodeTypeRegistry, names: &[Name]) -> BTreeSet<Name> {
            let mut out = BTreeSet::new();
            let mut work: Vec<Name> = names.to_vec();
            while let Some(n) = work.pop() {
                if out.insert(n.clone()) {
                    work.extend(reg.get(&n).unwrap().supertypes.iter().cloned());
                }
            }
            out
        }

        let pool = [
            "a", "b", "c", "d", "e",
        ];

        proptest!(|(
            requests in proptest::collection::vec(
                proptest::collection::vec(0usize..5, 1..4),
                1..8,
            ),
        )| {
            // a fresh registry per case; the requests warm the cache in
            // arbitrary order and every answer must match the naive closure
            let reg = registry();
            reg.register(simple_type("a")).unwrap();
            reg.register(NodeTypeDef::new(
                Name::unqualified("b"),
                vec![Name::unqualified("a"), well_known::NT_BASE.clone()],
            )).unwrap();
            reg.register(NodeTypeDef::new(
                Name::unqualified("c"),
                vec![Name::unqualified("b")],
            )).unwrap();
            reg.register(simple_type("d")).unwrap();
            reg.register(NodeTypeDef::new(
                Name::unqualified("e"),
                vec![Name::unqualified("d"), Name::unqualified("a")],
            )).unwrap();

            for request in requests {
                let names: Vec<Name> = request
                    .iter()
                    .map(|i| Name::unqualified(pool[*i]))
                    .collect();
                let ent = reg.effective_node_type_of(&names).unwrap();
                prop_assert_eq!(ent.all_types(), &naive_closure(&reg, &names));
            }
        });
    }
}
