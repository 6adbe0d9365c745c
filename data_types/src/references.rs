//! The back-reference record of a referenceable node.

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, PropertyId};

/// Enumerates the properties currently holding a REFERENCE to one target
/// node.
///
/// A multi-valued property referencing the target more than once appears once
/// per occurrence, so removal of a single occurrence keeps the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReferences {
    target: NodeId,
    referrers: Vec<PropertyId>,
}

impl NodeReferences {
    /// An empty record for `target`.
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            referrers: Vec::new(),
        }
    }

    /// The referenced node.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The referring properties, one entry per occurrence.
    pub fn referrers(&self) -> &[PropertyId] {
        &self.referrers
    }

    /// Record one referring occurrence.
    pub fn add(&mut self, referrer: PropertyId) {
        self.referrers.push(referrer);
    }

    /// Drop one occurrence of `referrer`; returns `false` if none was
    /// recorded.
    pub fn remove(&mut self, referrer: &PropertyId) -> bool {
        match self.referrers.iter().position(|r| r == referrer) {
            Some(idx) => {
                self.referrers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// `true` iff nothing references the target.
    pub fn is_empty(&self) -> bool {
        self.referrers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::Name;

    #[test]
    fn occurrences_are_counted() {
        let target = NodeId::random();
        let p = PropertyId::new(NodeId::random(), Name::unqualified("ref"));

        let mut refs = NodeReferences::new(target);
        assert!(refs.is_empty());

        refs.add(p.clone());
        refs.add(p.clone());
        assert_eq!(refs.referrers().len(), 2);

        assert!(refs.remove(&p));
        assert!(!refs.is_empty());
        assert!(refs.remove(&p));
        assert!(refs.is_empty());
        assert!(!refs.remove(&p));
    }
}
