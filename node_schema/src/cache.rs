//! The weighted effective-node-type cache.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use data_types::Name;
use observability_deps::tracing::trace;

use crate::effective::EffectiveNodeType;

/// A cache key: the sorted explicit member names of an aggregate, plus the
/// weight of the aggregate (the size of its fully transitive member set).
///
/// Keys are ordered by descending weight, then ascending member list. Member
/// sets - not weights - are the identity of a cached aggregate: the cache
/// never holds two keys with equal member sets, so the weight only steers the
/// scan order and can never split equal sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WeightedKey {
    names: Vec<Name>,
    weight: usize,
}

impl WeightedKey {
    fn new(names: Vec<Name>, weight: usize) -> Self {
        debug_assert!(names.windows(2).all(|w| w[0] < w[1]), "names not sorted");
        Self { names, weight }
    }

    /// The sorted member names.
    pub(crate) fn names(&self) -> &[Name] {
        &self.names
    }

    /// `true` iff every member is contained in `set`.
    fn is_subset_of(&self, set: &BTreeSet<Name>) -> bool {
        self.names.iter().all(|n| set.contains(n))
    }

    fn contains(&self, name: &Name) -> bool {
        self.names.binary_search(name).is_ok()
    }
}

impl Ord for WeightedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then_with(|| self.names.cmp(&other.names))
    }
}

impl PartialOrd for WeightedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Memoizes aggregated [`EffectiveNodeType`]s, keyed by explicit member set.
#[derive(Debug, Default)]
pub(crate) struct EffectiveTypeCache {
    entries: HashMap<Vec<Name>, Arc<EffectiveNodeType>>,
    /// Every key of `entries`, kept sorted by (weight desc, names asc) for
    /// the largest-subset scan.
    keys: Vec<WeightedKey>,
}

impl EffectiveTypeCache {
    fn sorted_names(names: &BTreeSet<Name>) -> Vec<Name> {
        names.iter().cloned().collect()
    }

    /// The cached aggregate whose explicit member set equals `names`.
    pub(crate) fn get(&self, names: &BTreeSet<Name>) -> Option<Arc<EffectiveNodeType>> {
        self.entries
            .get(&Self::sorted_names(names))
            .map(Arc::clone)
    }

    /// Memoize `ent` under its explicit member set.
    pub(crate) fn put(&mut self, ent: Arc<EffectiveNodeType>) {
        let names = Self::sorted_names(ent.merged_types());
        if names.is_empty() {
            return;
        }
        let key = WeightedKey::new(names.clone(), ent.weight());
        if self.entries.insert(names, ent).is_none() {
            let pos = self.keys.partition_point(|k| *k < key);
            self.keys.insert(pos, key);
        }
        // a replaced entry keeps its key: equal member sets compare equal
        // regardless of weight, and the weight of an aggregate is a function
        // of its member set anyway
    }

    /// The highest-weight cached key whose member set is a subset of `set`.
    pub(crate) fn largest_subset(&self, set: &BTreeSet<Name>) -> Option<&WeightedKey> {
        self.keys.iter().find(|k| k.is_subset_of(set))
    }

    /// Evict every aggregate whose member set contains `name`, including
    /// aggregates where it only appears transitively.
    pub(crate) fn evict_containing(&mut self, name: &Name) {
        let Self { entries, keys } = self;
        keys.retain(|k| {
            let keep = !k.contains(name)
                && !entries
                    .get(k.names())
                    .map(|ent| ent.includes(name))
                    .unwrap_or(false);
            if !keep {
                trace!(%name, key = ?k.names(), "evicting effective type");
                entries.remove(k.names());
            }
            keep
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.entries.len(), self.keys.len());
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use data_types::NodeTypeDef;

    use super::*;

    fn ent_of(names: &[&str], supertypes_of_first: &[&str]) -> Arc<EffectiveNodeType> {
        // build a small universe where the first name inherits the given
        // supertypes and everything else is independent
        let mut defs: Vec<NodeTypeDef> = Vec::new();
        for (i, n) in names.iter().enumerate() {
            let supers = if i == 0 {
                supertypes_of_first
                    .iter()
                    .map(|s| Name::unqualified(*s))
                    .collect()
            } else {
                vec![]
            };
            defs.push(NodeTypeDef::new(Name::unqualified(*n), supers));
        }
        for s in supertypes_of_first {
            defs.push(NodeTypeDef::new(Name::unqualified(*s), vec![]));
        }
        let lookup = |n: &Name| defs.iter().find(|d| &d.name == n);
        let names: Vec<Name> = names.iter().map(|n| Name::unqualified(*n)).collect();
        Arc::new(EffectiveNodeType::build(&lookup, &names).unwrap())
    }

    #[test]
    fn get_put_round_trip() {
        let mut cache = EffectiveTypeCache::default();
        let ent = ent_of(&["a", "b"], &[]);
        cache.put(Arc::clone(&ent));

        let got = cache.get(ent.merged_types()).unwrap();
        assert_eq!(got.merged_types(), ent.merged_types());
        assert_eq!(cache.len(), 1);

        // re-putting the same member set does not duplicate the key
        cache.put(ent);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn scan_order_is_weight_desc_then_lexicographic() {
        let mut cache = EffectiveTypeCache::default();
        // weight 1 each
        cache.put(ent_of(&["b"], &[]));
        cache.put(ent_of(&["a"], &[]));
        // weight 3: c plus two supertypes
        cache.put(ent_of(&["c"], &["s1", "s2"]));
        // weight 2
        cache.put(ent_of(&["a", "b"], &[]));

        let weights: Vec<usize> = cache.keys.iter().map(|k| k.weight).collect();
        assert_eq!(weights, vec![3, 2, 1, 1]);
        // ties broken lexicographically
        assert_eq!(cache.keys[2].names(), &[Name::unqualified("a")]);
        assert_eq!(cache.keys[3].names(), &[Name::unqualified("b")]);
    }

    #[test]
    fn largest_subset_prefers_heavier_keys() {
        let mut cache = EffectiveTypeCache::default();
        cache.put(ent_of(&["a"], &[]));
        cache.put(ent_of(&["a", "b"], &[]));

        let request: BTreeSet<Name> = ["a", "b", "c"]
            .into_iter()
            .map(Name::unqualified)
            .collect();
        let key = cache.largest_subset(&request).unwrap();
        assert_eq!(key.names().len(), 2);

        let request: BTreeSet<Name> =
            ["a", "c"].into_iter().map(Name::unqualified).collect();
        let key = cache.largest_subset(&request).unwrap();
        assert_eq!(key.names(), &[Name::unqualified("a")]);

        let request: BTreeSet<Name> = ["c"].into_iter().map(Name::unqualified).collect();
        assert!(cache.largest_subset(&request).is_none());
    }

    #[test]
    fn eviction_matches_transitive_members() {
        let mut cache = EffectiveTypeCache::default();
        cache.put(ent_of(&["a"], &["s"]));
        cache.put(ent_of(&["b"], &[]));
        assert_eq!(cache.len(), 2);

        // `s` is only a transitive member of the `a` aggregate
        cache.evict_containing(&Name::unqualified("s"));
        assert_eq!(cache.len(), 1);
        assert!(cache
            .get(&BTreeSet::from([Name::unqualified("b")]))
            .is_some());
    }
}
