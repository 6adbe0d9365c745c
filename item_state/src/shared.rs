//! The workspace (shared) item-state manager.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use data_types::{
    ItemData, ItemId, NodeId, NodeReferences, Path, PathElement, PropertyId, Value,
    ROOT_NODE_ID,
};
use item_store::interface::{Store, StoreError};
use observability_deps::tracing::{debug, trace, warn};
use parking_lot::Mutex;

use crate::change_log::ChangeLog;
use crate::error::StateError;
use crate::events::{EventKind, EventListener, RepositoryEvent};
use crate::Result;

/// Receives the ids touched by other sessions' commits, so a session can mark
/// its overlapping transient states stale.
pub(crate) trait ExternalChangeHandler: Send + Sync {
    /// `modified` were overwritten, `destroyed` were removed.
    fn external_changes(&self, modified: &[ItemId], destroyed: &[ItemId]);
}

/// The authoritative, process-wide view of persistent items.
///
/// Loads on demand through the store, caches with strong keys and weak values
/// (an unreferenced state may be reclaimed at any time and is transparently
/// re-loaded), applies change logs atomically, and maintains the references
/// index. All public operations are serialized under one lock; the store
/// boundary is the transaction unit.
#[derive(Debug)]
pub struct SharedItemStateManager {
    store: Arc<dyn Store>,
    /// Serializes `execute` end to end, so events and staleness
    /// notifications leave in commit order.
    commit_lock: Mutex<()>,
    inner: Mutex<Cache>,
    listeners: Mutex<Vec<Weak<dyn EventListener>>>,
    handlers: Mutex<Vec<(u64, Weak<dyn ExternalChangeHandler>)>>,
    session_counter: AtomicU64,
}

#[derive(Debug, Default)]
struct Cache {
    states: HashMap<ItemId, Weak<ItemData>>,
}

impl SharedItemStateManager {
    /// A manager over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            commit_lock: Mutex::new(()),
            inner: Mutex::new(Cache::default()),
            listeners: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            session_counter: AtomicU64::new(0),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The persistent state of `id`.
    ///
    /// Returned snapshots are immutable; sessions copy them into their
    /// overlay before modifying.
    pub fn get(&self, id: &ItemId) -> Result<Arc<ItemData>> {
        let mut inner = self.inner.lock();
        if let Some(weak) = inner.states.get(id) {
            if let Some(hit) = weak.upgrade() {
                return Ok(hit);
            }
        }
        let data = match id {
            ItemId::Node(node_id) => ItemData::Node(
                self.store
                    .load_node(node_id)
                    .map_err(|e| not_found_to_state(e, id))?,
            ),
            ItemId::Property(prop_id) => ItemData::Property(
                self.store
                    .load_property(prop_id)
                    .map_err(|e| not_found_to_state(e, id))?,
            ),
        };
        let arc = Arc::new(data);
        inner.states.insert(id.clone(), Arc::downgrade(&arc));
        trace!(%id, "loaded item state");
        Ok(arc)
    }

    /// Existence check without materializing the body.
    pub fn has(&self, id: &ItemId) -> Result<bool> {
        let _inner = self.inner.lock();
        Ok(self.store.exists(id)?)
    }

    /// The references record of `id`; an empty record if none is stored.
    pub fn references(&self, id: &NodeId) -> Result<NodeReferences> {
        let _inner = self.inner.lock();
        match self.store.load_references(id) {
            Ok(refs) => Ok(refs),
            Err(StoreError::ReferencesNotFound { .. }) => Ok(NodeReferences::new(*id)),
            Err(e) => Err(e.into()),
        }
    }

    /// `true` iff a non-empty references record exists for `id`.
    pub fn has_references(&self, id: &NodeId) -> Result<bool> {
        Ok(!self.references(id)?.is_empty())
    }

    /// Register an observation callback. Held weakly; a dropped listener is
    /// pruned on the next commit.
    pub fn register_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Allocate a session identity for staleness bookkeeping.
    pub(crate) fn next_session_id(&self) -> u64 {
        self.session_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a session's staleness handler, held weakly.
    pub(crate) fn register_handler(
        &self,
        session_id: u64,
        handler: Weak<dyn ExternalChangeHandler>,
    ) {
        self.handlers.lock().push((session_id, handler));
    }

    /// Drop all cached states.
    pub fn dispose(&self) {
        self.inner.lock().states.clear();
    }

    /// Atomically apply a change log.
    ///
    /// The store transaction wraps the whole application: on any failure the
    /// store is rolled back, nothing is cached, no event is emitted, and the
    /// error is surfaced. On success the observation listeners see one event
    /// per state change in commit order, and every other session is told
    /// which items moved underneath it.
    pub fn execute(&self, log: &ChangeLog, origin_session: Option<u64>) -> Result<()> {
        let _commit = self.commit_lock.lock();

        let events = {
            let mut inner = self.inner.lock();
            self.store.begin()?;
            match self.apply(&mut inner, log) {
                Ok(events) => {
                    self.store.commit()?;
                    events
                }
                Err(e) => {
                    if let Err(rollback_err) = self.store.rollback() {
                        warn!(%rollback_err, "store rollback failed after aborted commit");
                    }
                    return Err(e);
                }
            }
            // the cache lock is released before any callback runs: handlers
            // take session locks of their own, and sessions holding their
            // lock may be loading states through us at the same time
        };

        debug!(
            added = log.added_states().len(),
            modified = log.modified_entries().len(),
            deleted = log.deleted_entries().len(),
            operations = log.operations().len(),
            "committed change log"
        );

        self.emit(&events);
        self.notify_handlers(log, origin_session);
        Ok(())
    }

    fn apply(&self, inner: &mut Cache, log: &ChangeLog) -> Result<Vec<RepositoryEvent>> {
        // collision and freshness checks before anything is written
        for added in log.added_states() {
            if self.store.exists(&added.id())? {
                return Err(StateError::ItemExists { id: added.id() });
            }
        }
        let mut pre_states: HashMap<ItemId, ItemData> = HashMap::new();
        for modified in log.modified_entries() {
            let id = modified.data.id();
            let pre = self.load_pre_state(&id)?;
            if pre.mod_count() != modified.base_mod_count {
                return Err(StateError::StaleItemState { id });
            }
            pre_states.insert(id, pre);
        }
        for deleted in log.deleted_entries() {
            let pre = self.load_pre_state(&deleted.id)?;
            if pre.mod_count() != deleted.base_mod_count {
                return Err(StateError::StaleItemState {
                    id: deleted.id.clone(),
                });
            }
            pre_states.insert(deleted.id.clone(), pre);
        }

        // the references-index delta implied by this log
        let mut delta: HashMap<NodeId, RefsDelta> = HashMap::new();
        for pre in pre_states.values() {
            if let ItemData::Property(p) = pre {
                for value in p.values() {
                    if let Value::Reference(target) = value {
                        delta.entry(*target).or_default().removed.push(p.id());
                    }
                }
            }
        }
        for data in log
            .added_states()
            .iter()
            .chain(log.modified_entries().iter().map(|m| &m.data))
        {
            if let ItemData::Property(p) = data {
                for value in p.values() {
                    if let Value::Reference(target) = value {
                        delta.entry(*target).or_default().added.push(p.id());
                    }
                }
            }
        }

        self.check_referential_integrity(log, &delta)?;

        // pre-removal paths resolve against the unmodified store content
        let mut removed_paths: Vec<(ItemId, Path)> = Vec::new();
        for deleted in log.deleted_entries() {
            removed_paths.push((deleted.id.clone(), self.committed_path(&deleted.id)?));
        }

        // apply states
        let mut events = Vec::new();
        for data in log.added_states() {
            self.write_state(inner, data.clone())?;
            events.push(RepositoryEvent {
                id: data.id(),
                kind: EventKind::Added,
                path: None,
            });
        }
        for entry in log.modified_entries() {
            let mut bumped = entry.data.clone();
            bumped.set_mod_count(entry.base_mod_count + 1);
            self.write_state(inner, bumped)?;
            events.push(RepositoryEvent {
                id: entry.data.id(),
                kind: EventKind::Modified,
                path: None,
            });
        }
        for (id, path) in removed_paths {
            events.push(RepositoryEvent {
                id,
                kind: EventKind::Removed,
                path: Some(path),
            });
        }
        for deleted in log.deleted_entries() {
            match &deleted.id {
                ItemId::Node(node_id) => {
                    self.store.destroy_node(node_id)?;
                    self.store.destroy_references(node_id)?;
                }
                ItemId::Property(prop_id) => self.store.destroy_property(prop_id)?,
            }
            inner.states.remove(&deleted.id);
        }

        // apply the references-index delta
        let deleted_nodes: HashSet<NodeId> = log
            .deleted_entries()
            .iter()
            .filter_map(|d| d.id.as_node())
            .collect();
        for (target, d) in delta {
            if deleted_nodes.contains(&target) {
                // record destroyed above; verified empty by the check
                continue;
            }
            let mut record = match self.store.load_references(&target) {
                Ok(record) => record,
                Err(StoreError::ReferencesNotFound { .. }) => NodeReferences::new(target),
                Err(e) => return Err(e.into()),
            };
            for removed in &d.removed {
                record.remove(removed);
            }
            for added in d.added {
                record.add(added);
            }
            if record.is_empty() {
                self.store.destroy_references(&target)?;
            } else {
                self.store.store_references(&record)?;
            }
        }

        Ok(events)
    }

    fn write_state(&self, inner: &mut Cache, data: ItemData) -> Result<()> {
        match &data {
            ItemData::Node(n) => self.store.store_node(n)?,
            ItemData::Property(p) => self.store.store_property(p)?,
        }
        let id = data.id();
        let arc = Arc::new(data);
        inner.states.insert(id, Arc::downgrade(&arc));
        // the arc is dropped here if no reader shows up before reclamation;
        // a later get() transparently re-loads
        Ok(())
    }

    fn load_pre_state(&self, id: &ItemId) -> Result<ItemData> {
        let loaded = match id {
            ItemId::Node(node_id) => self.store.load_node(node_id).map(ItemData::Node),
            ItemId::Property(prop_id) => {
                self.store.load_property(prop_id).map(ItemData::Property)
            }
        };
        loaded.map_err(|e| match e {
            StoreError::NotFound { .. } => StateError::StaleItemState { id: id.clone() },
            e => e.into(),
        })
    }

    fn check_referential_integrity(
        &self,
        log: &ChangeLog,
        delta: &HashMap<NodeId, RefsDelta>,
    ) -> Result<()> {
        let deleted_nodes: HashSet<NodeId> = log
            .deleted_entries()
            .iter()
            .filter_map(|d| d.id.as_node())
            .collect();
        let added_nodes: HashSet<NodeId> = log
            .added_states()
            .iter()
            .filter_map(|d| d.as_node().map(|n| n.id()))
            .collect();

        for (target, d) in delta {
            if d.added.is_empty() {
                continue;
            }
            if deleted_nodes.contains(target) {
                return Err(StateError::ReferentialIntegrity {
                    id: *target,
                    reason: "a new reference targets a node removed in the same commit".into(),
                });
            }
            if !added_nodes.contains(target) && !self.store.exists(&ItemId::Node(*target))? {
                return Err(StateError::ReferentialIntegrity {
                    id: *target,
                    reason: "reference target does not exist".into(),
                });
            }
        }

        for node_id in &deleted_nodes {
            let mut record = match self.store.load_references(node_id) {
                Ok(record) => record,
                Err(StoreError::ReferencesNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(d) = delta.get(node_id) {
                for removed in &d.removed {
                    record.remove(removed);
                }
            }
            if !record.is_empty() {
                return Err(StateError::ReferentialIntegrity {
                    id: *node_id,
                    reason: format!(
                        "node is still referenced by {} propert{}",
                        record.referrers().len(),
                        if record.referrers().len() == 1 { "y" } else { "ies" }
                    ),
                });
            }
        }
        Ok(())
    }

    /// The path of a committed item, resolved against current store content.
    fn committed_path(&self, id: &ItemId) -> Result<Path> {
        let (mut node_id, mut elements) = match id {
            ItemId::Node(n) => (*n, Vec::new()),
            ItemId::Property(p) => (
                p.parent(),
                vec![PathElement::new(p.name().clone())],
            ),
        };
        while node_id != ROOT_NODE_ID {
            let state = self.store.load_node(&node_id).map_err(|e| {
                not_found_to_state(e, &ItemId::Node(node_id))
            })?;
            let Some(parent_id) = state.primary_parent() else {
                break;
            };
            let parent = self.store.load_node(&parent_id).map_err(|e| {
                not_found_to_state(e, &ItemId::Node(parent_id))
            })?;
            let (name, index) =
                parent
                    .child_position(&node_id)
                    .ok_or(StateError::NoSuchItemState {
                        id: ItemId::Node(node_id),
                    })?;
            elements.push(PathElement::with_index(name, index));
            node_id = parent_id;
        }
        elements.reverse();
        let mut path = Path::root();
        for element in elements {
            path = path.child(element);
        }
        Ok(path)
    }

    fn emit(&self, events: &[RepositoryEvent]) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| weak.upgrade().is_some());
        for weak in listeners.iter() {
            if let Some(listener) = weak.upgrade() {
                for event in events {
                    listener.on_event(event);
                }
            }
        }
    }

    fn notify_handlers(&self, log: &ChangeLog, origin_session: Option<u64>) {
        let modified: Vec<ItemId> = log.modified_entries().iter().map(|m| m.data.id()).collect();
        let destroyed: Vec<ItemId> = log
            .deleted_entries()
            .iter()
            .map(|d| d.id.clone())
            .collect();
        if modified.is_empty() && destroyed.is_empty() {
            return;
        }
        let mut handlers = self.handlers.lock();
        handlers.retain(|(_, weak)| weak.upgrade().is_some());
        for (session_id, weak) in handlers.iter() {
            if Some(*session_id) == origin_session {
                continue;
            }
            if let Some(handler) = weak.upgrade() {
                handler.external_changes(&modified, &destroyed);
            }
        }
    }
}

#[derive(Debug, Default)]
struct RefsDelta {
    added: Vec<PropertyId>,
    removed: Vec<PropertyId>,
}

fn not_found_to_state(e: StoreError, id: &ItemId) -> StateError {
    match e {
        StoreError::NotFound { .. } => StateError::NoSuchItemState { id: id.clone() },
        e => e.into(),
    }
}
