//! In-memory store implementation.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use data_types::{BlobId, ItemId, NodeId, NodeReferences, NodeState, PropertyId, PropertyState};
use observability_deps::tracing::trace;
use parking_lot::{Mutex, MutexGuard};

use crate::interface::{BlobStore, Result, Store, StoreError};

/// An in-memory [`Store`].
///
/// Transactions are implemented as a full snapshot taken at `begin`; rollback
/// restores the snapshot, commit drops it. Good enough for the record volumes
/// the tests deal in, and trivially correct.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
    blobs: Arc<MemBlobStore>,
}

#[derive(Debug, Default, Clone)]
struct Collections {
    nodes: HashMap<NodeId, NodeState>,
    properties: HashMap<PropertyId, PropertyState>,
    references: HashMap<NodeId, NodeReferences>,
}

#[derive(Debug, Default)]
struct Inner {
    current: Collections,
    snapshot: Option<Collections>,
}

impl MemStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }
}

impl Store for MemStore {
    fn begin(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.snapshot.is_some() {
            return Err(StoreError::Transaction("begin inside open transaction"));
        }
        inner.snapshot = Some(inner.current.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.snapshot.take().is_none() {
            return Err(StoreError::Transaction("commit without transaction"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.inner();
        match inner.snapshot.take() {
            Some(snapshot) => {
                inner.current = snapshot;
                Ok(())
            }
            None => Err(StoreError::Transaction("rollback without transaction")),
        }
    }

    fn load_node(&self, id: &NodeId) -> Result<NodeState> {
        self.inner()
            .current
            .nodes
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound {
                id: ItemId::Node(*id),
            })
    }

    fn load_property(&self, id: &PropertyId) -> Result<PropertyState> {
        self.inner()
            .current
            .properties
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                id: ItemId::Property(id.clone()),
            })
    }

    fn load_references(&self, id: &NodeId) -> Result<NodeReferences> {
        self.inner()
            .current
            .references
            .get(id)
            .cloned()
            .ok_or(StoreError::ReferencesNotFound { id: *id })
    }

    fn store_node(&self, state: &NodeState) -> Result<()> {
        trace!(node_id = %state.id(), "store node");
        self.inner().current.nodes.insert(state.id(), state.clone());
        Ok(())
    }

    fn store_property(&self, state: &PropertyState) -> Result<()> {
        trace!(property_id = %state.id(), "store property");
        self.inner()
            .current
            .properties
            .insert(state.id(), state.clone());
        Ok(())
    }

    fn store_references(&self, refs: &NodeReferences) -> Result<()> {
        self.inner()
            .current
            .references
            .insert(refs.target(), refs.clone());
        Ok(())
    }

    fn destroy_node(&self, id: &NodeId) -> Result<()> {
        trace!(node_id = %id, "destroy node");
        self.inner().current.nodes.remove(id);
        Ok(())
    }

    fn destroy_property(&self, id: &PropertyId) -> Result<()> {
        trace!(property_id = %id, "destroy property");
        self.inner().current.properties.remove(id);
        Ok(())
    }

    fn destroy_references(&self, id: &NodeId) -> Result<()> {
        self.inner().current.references.remove(id);
        Ok(())
    }

    fn exists(&self, id: &ItemId) -> Result<bool> {
        let inner = self.inner();
        Ok(match id {
            ItemId::Node(id) => inner.current.nodes.contains_key(id),
            ItemId::Property(id) => inner.current.properties.contains_key(id),
        })
    }

    fn exists_references(&self, id: &NodeId) -> Result<bool> {
        Ok(self.inner().current.references.contains_key(id))
    }

    fn blobs(&self) -> Arc<dyn BlobStore> {
        Arc::clone(&self.blobs) as _
    }
}

/// An in-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<BlobId, Bytes>>,
}

impl BlobStore for MemBlobStore {
    fn put(&self, id: BlobId, data: &mut dyn Read, len: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(len as usize);
        data.take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(StoreError::Internal(format!(
                "blob {id}: expected {len} bytes, got {}",
                buf.len()
            )));
        }
        self.blobs.lock().insert(id, Bytes::from(buf));
        Ok(())
    }

    fn get(&self, id: &BlobId) -> Result<Box<dyn Read + Send>> {
        let blob = self
            .blobs
            .lock()
            .get(id)
            .cloned()
            .ok_or(StoreError::BlobNotFound { id: *id })?;
        Ok(Box::new(Cursor::new(blob)))
    }

    fn remove(&self, id: &BlobId) -> Result<()> {
        self.blobs.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use data_types::Name;

    use super::*;

    fn node() -> NodeState {
        NodeState::new(
            NodeId::random(),
            Name::new(data_types::NS_SYS_URI, "unstructured"),
            None,
        )
    }

    #[test]
    fn load_store_destroy() {
        let store = MemStore::new();
        let n = node();
        let id = n.id();

        assert_matches!(store.load_node(&id), Err(StoreError::NotFound { .. }));
        assert!(!store.exists(&ItemId::Node(id)).unwrap());

        store.store_node(&n).unwrap();
        assert_eq!(store.load_node(&id).unwrap(), n);
        assert!(store.exists(&ItemId::Node(id)).unwrap());

        store.destroy_node(&id).unwrap();
        assert_matches!(store.load_node(&id), Err(StoreError::NotFound { .. }));
        // destroying again is a no-op
        store.destroy_node(&id).unwrap();
    }

    #[test]
    fn rollback_restores_pre_begin_content() {
        let store = MemStore::new();
        let keep = node();
        store.store_node(&keep).unwrap();

        store.begin().unwrap();
        let gone = node();
        store.store_node(&gone).unwrap();
        store.destroy_node(&keep.id()).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.load_node(&keep.id()).unwrap(), keep);
        assert_matches!(
            store.load_node(&gone.id()),
            Err(StoreError::NotFound { .. })
        );
    }

    #[test]
    fn commit_publishes() {
        let store = MemStore::new();
        store.begin().unwrap();
        let n = node();
        store.store_node(&n).unwrap();
        store.commit().unwrap();
        assert_eq!(store.load_node(&n.id()).unwrap(), n);
    }

    #[test]
    fn transaction_misuse_is_an_error() {
        let store = MemStore::new();
        assert_matches!(store.commit(), Err(StoreError::Transaction(_)));
        assert_matches!(store.rollback(), Err(StoreError::Transaction(_)));
        store.begin().unwrap();
        assert_matches!(store.begin(), Err(StoreError::Transaction(_)));
        store.rollback().unwrap();
    }

    #[test]
    fn blob_round_trip() {
        let store = MemStore::new();
        let blobs = store.blobs();
        let id = BlobId::random();

        let payload = b"0123456789".to_vec();
        blobs
            .put(id, &mut Cursor::new(payload.clone()), payload.len() as u64)
            .unwrap();

        let mut out = Vec::new();
        blobs.get(&id).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);

        blobs.remove(&id).unwrap();
        assert!(matches!(blobs.get(&id), Err(StoreError::BlobNotFound { .. })));
    }

    #[test]
    fn short_blob_write_is_rejected() {
        let store = MemStore::new();
        let blobs = store.blobs();
        let id = BlobId::random();
        assert_matches!(
            blobs.put(id, &mut Cursor::new(b"abc".to_vec()), 10),
            Err(StoreError::Internal(_))
        );
    }
}
