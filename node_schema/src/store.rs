//! Persistence of custom node-type definitions.
//!
//! Custom definitions are persisted as a named stream of definitions; the
//! codec is JSON, and the store is a black box to the registry.

use std::collections::BTreeMap;
use std::fmt::Debug;

use data_types::{Name, NodeTypeDef};
use parking_lot::Mutex;
use thiserror::Error;

/// Failures of the custom-definition store.
#[derive(Debug, Error)]
pub enum DefinitionStoreError {
    /// The definition stream could not be encoded or decoded.
    #[error("definition codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An I/O failure of the backing medium.
    #[error("definition store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the registry keeps custom (non-built-in) definitions.
pub trait DefinitionStore: Debug + Send + Sync {
    /// All persisted definitions.
    fn load_all(&self) -> Result<Vec<NodeTypeDef>, DefinitionStoreError>;

    /// Insert or replace the definition named `def.name`.
    fn store(&self, def: &NodeTypeDef) -> Result<(), DefinitionStoreError>;

    /// Remove the definition named `name`. Removing a missing definition is
    /// not an error.
    fn remove(&self, name: &Name) -> Result<(), DefinitionStoreError>;

    /// The encoded byte form of the whole stream, stable across reorderings
    /// of the same contents.
    fn encoded(&self) -> Result<Vec<u8>, DefinitionStoreError>;
}

/// An in-memory [`DefinitionStore`].
#[derive(Debug, Default)]
pub struct MemDefinitionStore {
    defs: Mutex<BTreeMap<Name, NodeTypeDef>>,
}

impl MemDefinitionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DefinitionStore for MemDefinitionStore {
    fn load_all(&self) -> Result<Vec<NodeTypeDef>, DefinitionStoreError> {
        Ok(self.defs.lock().values().cloned().collect())
    }

    fn store(&self, def: &NodeTypeDef) -> Result<(), DefinitionStoreError> {
        self.defs.lock().insert(def.name.clone(), def.clone());
        Ok(())
    }

    fn remove(&self, name: &Name) -> Result<(), DefinitionStoreError> {
        self.defs.lock().remove(name);
        Ok(())
    }

    fn encoded(&self) -> Result<Vec<u8>, DefinitionStoreError> {
        let defs: Vec<NodeTypeDef> = self.defs.lock().values().cloned().collect();
        Ok(serde_json::to_vec_pretty(&defs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_remove_round_trip() {
        let store = MemDefinitionStore::new();
        let empty = store.encoded().unwrap();

        let def = NodeTypeDef::new(Name::unqualified("t"), vec![]);
        store.store(&def).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![def.clone()]);

        store.remove(&def.name).unwrap();
        assert!(store.load_all().unwrap().is_empty());
        // back to byte-identical contents
        assert_eq!(store.encoded().unwrap(), empty);
    }
}
