//! The per-session transient overlay.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use data_types::{ItemData, ItemId, NodeId, NodeState, PropertyId, PropertyState, ROOT_NODE_ID};
use observability_deps::tracing::{debug, trace};
use parking_lot::Mutex;

use crate::change_log::{ChangeLog, Operation};
use crate::error::StateError;
use crate::shared::{ExternalChangeHandler, SharedItemStateManager};
use crate::status::ItemStatus;
use crate::Result;

/// One transient working copy.
#[derive(Debug, Clone)]
struct TransientState {
    data: ItemData,
    status: ItemStatus,
    /// The persistent snapshot this copy shadows; `None` for NEW states.
    overlay: Option<Arc<ItemData>>,
}

#[derive(Debug, Default)]
struct Transient {
    states: HashMap<ItemId, TransientState>,
    operations: Vec<Operation>,
    /// Holding area for REMOVED copies between a successful commit and the
    /// end of save bookkeeping.
    attic: HashMap<ItemId, TransientState>,
}

/// The session-scoped item-state manager: a transient overlay over the
/// [`SharedItemStateManager`].
///
/// Reads fall through to the workspace layer and pull an EXISTING copy into
/// the overlay; writes go copy-on-write against that overlay. `save` commits
/// a subtree of the overlay as one change log; `revert` restores a subtree to
/// its overlayed snapshots.
///
/// A session is a single logical thread of control. The overlay still sits
/// behind a mutex because other sessions' commits mark overlapping states
/// stale from their own threads.
#[derive(Debug)]
pub struct SessionItemStateManager {
    shared: Arc<SharedItemStateManager>,
    session_id: u64,
    inner: Mutex<Transient>,
}

impl SessionItemStateManager {
    /// Open a session overlay over `shared`.
    pub fn new(shared: Arc<SharedItemStateManager>) -> Arc<Self> {
        let session_id = shared.next_session_id();
        let manager = Arc::new(Self {
            shared: Arc::clone(&shared),
            session_id,
            inner: Mutex::new(Transient::default()),
        });
        let weak: Weak<dyn ExternalChangeHandler> =
            Arc::downgrade(&manager) as Weak<dyn ExternalChangeHandler>;
        shared.register_handler(session_id, weak);
        manager
    }

    /// The workspace layer this session overlays.
    pub fn shared(&self) -> &Arc<SharedItemStateManager> {
        &self.shared
    }

    /// This session's identity for staleness bookkeeping.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// The item state as this session sees it: the transient copy if one
    /// exists (even a REMOVED one; the removal is only realized at save),
    /// else a fresh EXISTING pull from the workspace layer.
    pub fn get_item(&self, id: &ItemId) -> Result<ItemData> {
        let mut t = self.inner.lock();
        if let Some(ts) = t.states.get(id) {
            return Ok(ts.data.clone());
        }
        let overlay = self.shared.get(id)?;
        let data = (*overlay).clone();
        t.states.insert(
            id.clone(),
            TransientState {
                data: data.clone(),
                status: ItemStatus::Existing,
                overlay: Some(overlay),
            },
        );
        Ok(data)
    }

    /// The node state of `id` as this session sees it.
    pub fn get_node(&self, id: &NodeId) -> Result<NodeState> {
        match self.get_item(&ItemId::Node(*id))? {
            ItemData::Node(n) => Ok(n),
            ItemData::Property(_) => unreachable!("node id resolved to property data"),
        }
    }

    /// The property state of `id` as this session sees it.
    pub fn get_property(&self, id: &PropertyId) -> Result<PropertyState> {
        match self.get_item(&ItemId::Property(id.clone()))? {
            ItemData::Property(p) => Ok(p),
            ItemData::Node(_) => unreachable!("property id resolved to node data"),
        }
    }

    /// The transient status of `id`, `None` when the session holds no copy.
    pub fn status(&self, id: &ItemId) -> Option<ItemStatus> {
        self.inner.lock().states.get(id).map(|ts| ts.status)
    }

    /// Existence as this session sees it: a copy marked removed hides the
    /// persistent item, a NEW copy exists before any commit.
    pub fn has_item(&self, id: &ItemId) -> Result<bool> {
        {
            let t = self.inner.lock();
            if let Some(ts) = t.states.get(id) {
                return Ok(!matches!(
                    ts.status,
                    ItemStatus::ExistingRemoved | ItemStatus::StaleDestroyed
                ));
            }
        }
        self.shared.has(id)
    }

    /// `true` iff the overlay holds anything a save would commit.
    pub fn has_pending_changes(&self) -> bool {
        let t = self.inner.lock();
        t.states.values().any(|ts| ts.status.is_pending()) || !t.operations.is_empty()
    }

    /// Install a brand-new node state.
    pub fn create_node(&self, state: NodeState) -> Result<()> {
        self.create_item(ItemData::Node(state))
    }

    /// Install a brand-new property state.
    pub fn create_property(&self, state: PropertyState) -> Result<()> {
        self.create_item(ItemData::Property(state))
    }

    fn create_item(&self, data: ItemData) -> Result<()> {
        let id = data.id();
        let mut t = self.inner.lock();
        if let Some(ts) = t.states.get_mut(&id) {
            // re-creating an identity removed in this session is a replace:
            // the commit overwrites the stored record in one step
            if ts.status == ItemStatus::ExistingRemoved {
                ts.data = data;
                ts.status = ItemStatus::ExistingModified;
                trace!(%id, "replaced removed transient state");
                return Ok(());
            }
            return Err(StateError::ItemExists { id });
        }
        trace!(%id, "created transient state");
        t.states.insert(
            id,
            TransientState {
                data,
                status: ItemStatus::New,
                overlay: None,
            },
        );
        Ok(())
    }

    /// Mutate the node `id` copy-on-write: a first modification pulls the
    /// persistent state into the overlay and flips it to EXISTING_MODIFIED.
    pub fn modify_node<R>(
        &self,
        id: &NodeId,
        f: impl FnOnce(&mut NodeState) -> R,
    ) -> Result<R> {
        self.modify_item(&ItemId::Node(*id), |data| match data {
            ItemData::Node(n) => f(n),
            ItemData::Property(_) => unreachable!("node id resolved to property data"),
        })
    }

    /// Mutate the property `id` copy-on-write.
    pub fn modify_property<R>(
        &self,
        id: &PropertyId,
        f: impl FnOnce(&mut PropertyState) -> R,
    ) -> Result<R> {
        self.modify_item(&ItemId::Property(id.clone()), |data| match data {
            ItemData::Property(p) => f(p),
            ItemData::Node(_) => unreachable!("property id resolved to node data"),
        })
    }

    fn modify_item<R>(&self, id: &ItemId, f: impl FnOnce(&mut ItemData) -> R) -> Result<R> {
        let mut t = self.inner.lock();
        if !t.states.contains_key(id) {
            let overlay = self.shared.get(id)?;
            t.states.insert(
                id.clone(),
                TransientState {
                    data: (*overlay).clone(),
                    status: ItemStatus::Existing,
                    overlay: Some(overlay),
                },
            );
        }
        let ts = t.states.get_mut(id).expect("inserted above");
        match ts.status {
            ItemStatus::New | ItemStatus::ExistingModified => {}
            ItemStatus::Existing => ts.status = ItemStatus::ExistingModified,
            ItemStatus::ExistingRemoved => {
                return Err(StateError::NoSuchItemState { id: id.clone() })
            }
            ItemStatus::StaleModified
            | ItemStatus::StaleDestroyed
            | ItemStatus::Undefined => {
                return Err(StateError::StaleItemState { id: id.clone() })
            }
        }
        Ok(f(&mut ts.data))
    }

    /// Mark `id` removed. A NEW copy vanishes outright; an existing copy is
    /// kept (the removal is realized at save).
    pub fn mark_removed(&self, id: &ItemId) -> Result<()> {
        let mut t = self.inner.lock();
        if !t.states.contains_key(id) {
            let overlay = self.shared.get(id)?;
            t.states.insert(
                id.clone(),
                TransientState {
                    data: (*overlay).clone(),
                    status: ItemStatus::Existing,
                    overlay: Some(overlay),
                },
            );
        }
        let status = t.states.get(id).expect("inserted above").status;
        match status {
            ItemStatus::New => {
                t.states.remove(id);
            }
            ItemStatus::Existing | ItemStatus::ExistingModified => {
                t.states
                    .get_mut(id)
                    .expect("present above")
                    .status = ItemStatus::ExistingRemoved;
            }
            ItemStatus::ExistingRemoved => {}
            ItemStatus::StaleModified | ItemStatus::StaleDestroyed | ItemStatus::Undefined => {
                return Err(StateError::StaleItemState { id: id.clone() })
            }
        }
        trace!(%id, "marked removed");
        Ok(())
    }

    /// Append to the ordered pending-operation list.
    pub fn add_operation(&self, op: Operation) {
        self.inner.lock().operations.push(op);
    }

    /// The pending operations, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.lock().operations.clone()
    }

    /// Every id the overlay currently holds a copy for, with its status.
    pub fn transient_ids(&self) -> Vec<(ItemId, ItemStatus)> {
        self.inner
            .lock()
            .states
            .iter()
            .map(|(id, ts)| (id.clone(), ts.status))
            .collect()
    }

    /// `true` iff `id`'s current location lies at or below `root`.
    ///
    /// Containment follows primary-parent linkage through the overlay first
    /// and the workspace layer second. When the chain cannot be walked (an
    /// ancestor vanished underneath the session), the item counts as
    /// contained only for the repository root, which spans everything.
    pub fn is_within_subtree(&self, id: &ItemId, root: &ItemId) -> bool {
        let t = self.inner.lock();
        self.is_within_locked(&t, id, root)
    }

    fn is_within_locked(&self, t: &Transient, id: &ItemId, root: &ItemId) -> bool {
        if id == root {
            return true;
        }
        let root_node = match root {
            ItemId::Node(n) => *n,
            // a property roots nothing but itself
            ItemId::Property(_) => return false,
        };
        let mut current = match id {
            ItemId::Node(n) => *n,
            ItemId::Property(p) => p.parent(),
        };
        loop {
            if current == root_node {
                return true;
            }
            let parent = match self.parent_of(t, &current) {
                Ok(parent) => parent,
                Err(_) => return root_node == ROOT_NODE_ID,
            };
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn parent_of(&self, t: &Transient, node_id: &NodeId) -> Result<Option<NodeId>> {
        if let Some(ts) = t.states.get(&ItemId::Node(*node_id)) {
            match &ts.data {
                ItemData::Node(n) => return Ok(n.primary_parent()),
                ItemData::Property(_) => unreachable!("node id resolved to property data"),
            }
        }
        let data = self.shared.get(&ItemId::Node(*node_id))?;
        match &*data {
            ItemData::Node(n) => Ok(n.primary_parent()),
            ItemData::Property(_) => unreachable!("node id resolved to property data"),
        }
    }

    /// Restore the subtree rooted at `root` to its overlayed state: NEW
    /// copies vanish, modified and removed copies fall back to the
    /// persistent snapshot, stale markers clear. Pending operations touching
    /// only reverted states are disposed.
    pub fn revert(&self, root: &ItemId) -> Result<()> {
        let mut t = self.inner.lock();
        let reverted: HashSet<ItemId> = t
            .states
            .keys()
            .filter(|id| self.is_within_locked(&t, id, root))
            .cloned()
            .collect();
        for id in &reverted {
            t.states.remove(id);
        }
        t.operations.retain(|op| !op.touches_only(&reverted));
        debug!(
            session_id = self.session_id,
            %root,
            reverted = reverted.len(),
            "reverted subtree"
        );
        Ok(())
    }

    /// Revert the whole overlay.
    pub fn revert_all(&self) {
        let mut t = self.inner.lock();
        t.states.clear();
        t.operations.clear();
        t.attic.clear();
        debug!(session_id = self.session_id, "reverted all transient state");
    }

    /// Commit the subtree rooted at `root`.
    ///
    /// Implements the change-log commit: gather the transient states whose
    /// path lies within the subtree, refuse stale states and NEW roots,
    /// partition into added/modified/deleted, require the change set to be
    /// self-contained, include the pending operations it covers, and hand
    /// the log to the workspace layer. On success the committed copies are
    /// disposed (REMOVED ones through the attic); on failure the overlay is
    /// left exactly as it was.
    pub fn save(&self, root: &ItemId) -> Result<()> {
        let (log, included, affected) = {
            let t = self.inner.lock();

            let affected: Vec<ItemId> = t
                .states
                .keys()
                .filter(|id| self.is_within_locked(&t, id, root))
                .cloned()
                .collect();

            for id in &affected {
                let ts = &t.states[id];
                if ts.status.is_stale() || ts.status == ItemStatus::Undefined {
                    return Err(StateError::StaleItemState { id: id.clone() });
                }
            }
            if let Some(ts) = t.states.get(root) {
                if ts.status == ItemStatus::New {
                    return Err(StateError::OrphanedNew { id: root.clone() });
                }
            }

            let affected_set: HashSet<ItemId> = affected.iter().cloned().collect();
            let mut log = ChangeLog::new();
            for id in &affected {
                let ts = &t.states[id];
                match ts.status {
                    ItemStatus::New => log.added(ts.data.clone()),
                    ItemStatus::ExistingModified => {
                        let base = ts
                            .overlay
                            .as_ref()
                            .map(|o| o.mod_count())
                            .unwrap_or_else(|| ts.data.mod_count());
                        log.modified(ts.data.clone(), base);
                    }
                    ItemStatus::ExistingRemoved => {
                        let base = ts
                            .overlay
                            .as_ref()
                            .map(|o| o.mod_count())
                            .unwrap_or_else(|| ts.data.mod_count());
                        log.deleted(id.clone(), base);
                    }
                    ItemStatus::Existing => {}
                    ItemStatus::StaleModified
                    | ItemStatus::StaleDestroyed
                    | ItemStatus::Undefined => unreachable!("checked above"),
                }
            }

            let included: Vec<usize> = t
                .operations
                .iter()
                .enumerate()
                .filter(|(_, op)| op.touches_any(&affected_set))
                .map(|(idx, _)| idx)
                .collect();
            if log.is_empty() && included.is_empty() {
                return Ok(());
            }

            self.check_self_contained(&t, &affected_set)?;

            for idx in &included {
                log.push_operation(t.operations[*idx].clone());
            }
            (log, included, affected)
            // the lock drops here: execute must not be entered while holding
            // it, or another session's commit notifying us would deadlock
        };

        self.shared.execute(&log, Some(self.session_id))?;

        let mut t = self.inner.lock();
        for id in &affected {
            if let Some(ts) = t.states.remove(id) {
                if ts.status == ItemStatus::ExistingRemoved {
                    // observation has read the pre-removal paths during
                    // execute; park the copy and let the attic drain below
                    t.attic.insert(id.clone(), ts);
                }
            }
        }
        for idx in included.iter().rev() {
            t.operations.remove(*idx);
        }
        t.attic.clear();
        debug!(
            session_id = self.session_id,
            %root,
            committed = affected.len(),
            "saved subtree"
        );
        Ok(())
    }

    /// The self-containment check: every change committed by this save must
    /// have its structural counterpart inside the save scope, otherwise the
    /// committed tree would be inconsistent. The error names the item the
    /// caller must widen the scope to include.
    fn check_self_contained(
        &self,
        t: &Transient,
        affected: &HashSet<ItemId>,
    ) -> Result<()> {
        for (id, ts) in &t.states {
            let in_scope = affected.contains(id);
            match ts.status {
                ItemStatus::New if in_scope => {
                    // the parent's child list or property set changed with it
                    if let Some(parent) = self.linked_parent(&ts.data) {
                        let parent_id = ItemId::Node(parent);
                        if self.is_pending(t, &parent_id) && !affected.contains(&parent_id) {
                            return Err(StateError::NotSelfContained { missing: parent_id });
                        }
                    }
                }
                ItemStatus::ExistingRemoved if in_scope => {
                    let old_parent = ts
                        .overlay
                        .as_deref()
                        .and_then(|o| self.linked_parent(o))
                        .or_else(|| self.linked_parent(&ts.data));
                    if let Some(parent) = old_parent {
                        let parent_id = ItemId::Node(parent);
                        if self.is_pending(t, &parent_id) && !affected.contains(&parent_id) {
                            return Err(StateError::NotSelfContained { missing: parent_id });
                        }
                    }
                }
                ItemStatus::ExistingModified => {
                    let ItemData::Node(node) = &ts.data else {
                        continue;
                    };
                    let old_parent = ts
                        .overlay
                        .as_deref()
                        .and_then(|o| o.as_node())
                        .and_then(|n| n.primary_parent());
                    let new_parent = node.primary_parent();
                    if old_parent == new_parent {
                        continue;
                    }
                    if in_scope {
                        // a re-parented node needs both ends of the move
                        for parent in [old_parent, new_parent].into_iter().flatten() {
                            let parent_id = ItemId::Node(parent);
                            if !affected.contains(&parent_id) {
                                return Err(StateError::NotSelfContained {
                                    missing: parent_id,
                                });
                            }
                        }
                    } else {
                        // the node sits outside the scope but one of its
                        // parents is being saved: the entry change would
                        // commit without the node's own linkage
                        let old_in = old_parent
                            .map(|p| affected.contains(&ItemId::Node(p)))
                            .unwrap_or(false);
                        let new_in = new_parent
                            .map(|p| affected.contains(&ItemId::Node(p)))
                            .unwrap_or(false);
                        if old_in || new_in {
                            let missing = if !new_in {
                                new_parent.map(ItemId::Node)
                            } else if !old_in {
                                old_parent.map(ItemId::Node)
                            } else {
                                None
                            };
                            return Err(StateError::NotSelfContained {
                                missing: missing.unwrap_or_else(|| id.clone()),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The node whose child list or property set holds `data`.
    fn linked_parent(&self, data: &ItemData) -> Option<NodeId> {
        match data {
            ItemData::Node(n) => n.primary_parent(),
            ItemData::Property(p) => Some(p.parent()),
        }
    }

    fn is_pending(&self, t: &Transient, id: &ItemId) -> bool {
        t.states
            .get(id)
            .map(|ts| ts.status.is_pending())
            .unwrap_or(false)
    }
}

impl ExternalChangeHandler for SessionItemStateManager {
    fn external_changes(&self, modified: &[ItemId], destroyed: &[ItemId]) {
        let mut t = self.inner.lock();
        for id in modified {
            if let Some(ts) = t.states.get_mut(id) {
                if matches!(
                    ts.status,
                    ItemStatus::Existing
                        | ItemStatus::ExistingModified
                        | ItemStatus::ExistingRemoved
                ) {
                    trace!(session_id = self.session_id, %id, "state went stale (modified)");
                    ts.status = ItemStatus::StaleModified;
                }
            }
        }
        for id in destroyed {
            if let Some(ts) = t.states.get_mut(id) {
                if matches!(
                    ts.status,
                    ItemStatus::Existing
                        | ItemStatus::ExistingModified
                        | ItemStatus::ExistingRemoved
                        | ItemStatus::StaleModified
                ) {
                    trace!(session_id = self.session_id, %id, "state went stale (destroyed)");
                    ts.status = ItemStatus::StaleDestroyed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use data_types::{Name, PropertyType, Value, NS_SYS_URI};
    use item_store::interface::Store;
    use item_store::mem::MemStore;

    use super::*;

    fn unstructured() -> Name {
        Name::new(NS_SYS_URI, "unstructured")
    }

    fn setup() -> (Arc<MemStore>, Arc<SharedItemStateManager>) {
        let store = Arc::new(MemStore::new());
        let root = NodeState::new(ROOT_NODE_ID, unstructured(), None);
        store.store_node(&root).unwrap();
        let shared = Arc::new(SharedItemStateManager::new(
            Arc::clone(&store) as Arc<dyn Store>
        ));
        (store, shared)
    }

    fn root_id() -> ItemId {
        ItemId::Node(ROOT_NODE_ID)
    }

    /// Stage a new child of the root in the session overlay: parent entry,
    /// node state and pending operation, the way the operation layer does.
    fn stage_child(session: &SessionItemStateManager, name: &str) -> NodeId {
        let id = NodeId::random();
        session
            .modify_node(&ROOT_NODE_ID, |root| {
                root.add_child_entry(Name::unqualified(name), id);
            })
            .unwrap();
        session
            .create_node(NodeState::new(id, unstructured(), Some(ROOT_NODE_ID)))
            .unwrap();
        session.add_operation(Operation::AddNode {
            parent: ROOT_NODE_ID,
            node: id,
            name: Name::unqualified(name),
        });
        id
    }

    #[test]
    fn reads_pull_existing_copies() {
        let (_store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        assert_eq!(session.status(&root_id()), None);
        let root = session.get_node(&ROOT_NODE_ID).unwrap();
        assert_eq!(root.id(), ROOT_NODE_ID);
        assert_eq!(session.status(&root_id()), Some(ItemStatus::Existing));
        assert!(!session.has_pending_changes());
    }

    #[test]
    fn save_commits_staged_changes() {
        let (store, shared) = setup();
        let session = SessionItemStateManager::new(Arc::clone(&shared));

        let child = stage_child(&session, "a");
        assert!(session.has_pending_changes());
        assert_eq!(
            session.status(&ItemId::Node(child)),
            Some(ItemStatus::New)
        );

        session.save(&root_id()).unwrap();

        assert!(!session.has_pending_changes());
        assert_eq!(session.status(&ItemId::Node(child)), None);
        assert_eq!(session.operations().len(), 0);

        let stored = store.load_node(&child).unwrap();
        assert_eq!(stored.primary_parent(), Some(ROOT_NODE_ID));
        // re-reading pulls a fresh EXISTING copy
        let reread = session.get_node(&child).unwrap();
        assert_eq!(reread, stored);
    }

    #[test]
    fn save_commits_property_values() {
        let (store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        let child = stage_child(&session, "a");
        let prop_name = Name::unqualified("title");
        session
            .modify_node(&child, |n| {
                n.add_property_name(prop_name.clone());
            })
            .unwrap();
        let mut prop = PropertyState::new(child, prop_name.clone(), PropertyType::String, false);
        prop.set_values(PropertyType::String, vec![Value::String("hi".into())]);
        session.create_property(prop).unwrap();

        session.save(&root_id()).unwrap();

        let stored = store
            .load_property(&PropertyId::new(child, prop_name))
            .unwrap();
        assert_eq!(stored.values(), &[Value::String("hi".into())]);
    }

    #[test]
    fn setting_twice_collapses_to_one_change_entry() {
        let (store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        let child = stage_child(&session, "a");
        session.save(&root_id()).unwrap();

        let prop_name = Name::unqualified("x");
        session
            .modify_node(&child, |n| {
                n.add_property_name(prop_name.clone());
            })
            .unwrap();
        let mut prop = PropertyState::new(child, prop_name.clone(), PropertyType::Long, false);
        prop.set_values(PropertyType::Long, vec![Value::Long(1)]);
        session.create_property(prop).unwrap();
        session.save(&root_id()).unwrap();

        // set the same value twice; the overlay holds one modified copy
        let pid = PropertyId::new(child, prop_name);
        for _ in 0..2 {
            session
                .modify_property(&pid, |p| {
                    p.set_values(PropertyType::Long, vec![Value::Long(2)]);
                })
                .unwrap();
            session.add_operation(Operation::SetProperty { id: pid.clone() });
        }
        assert_eq!(
            session.status(&ItemId::Property(pid.clone())),
            Some(ItemStatus::ExistingModified)
        );
        session.save(&root_id()).unwrap();

        let stored = store.load_property(&pid).unwrap();
        assert_eq!(stored.values(), &[Value::Long(2)]);
        // exactly one committed overwrite of the property
        assert_eq!(stored.mod_count(), 1);
    }

    #[test]
    fn revert_restores_the_overlayed_state() {
        let (_store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        let child = stage_child(&session, "a");
        session.save(&root_id()).unwrap();

        // stage a modification and a fresh child, then revert everything
        session
            .modify_node(&child, |n| {
                n.add_property_name(Name::unqualified("x"));
            })
            .unwrap();
        let staged = stage_child(&session, "b");
        assert!(session.has_pending_changes());

        session.revert(&root_id()).unwrap();
        assert!(!session.has_pending_changes());
        assert_eq!(session.operations().len(), 0);
        assert_eq!(session.status(&ItemId::Node(staged)), None);

        // the committed child is untouched, the staged property is gone
        let reread = session.get_node(&child).unwrap();
        assert!(!reread.has_property(&Name::unqualified("x")));
        // the never-committed child does not exist anywhere
        assert!(!session.has_item(&ItemId::Node(staged)).unwrap());
    }

    #[test]
    fn new_root_cannot_be_saved_alone() {
        let (_store, shared) = setup();
        let session = SessionItemStateManager::new(shared);
        let child = stage_child(&session, "a");
        assert_matches!(
            session.save(&ItemId::Node(child)),
            Err(StateError::OrphanedNew { .. })
        );
    }

    #[test]
    fn concurrent_modification_goes_stale() {
        let (_store, shared) = setup();
        let one = SessionItemStateManager::new(Arc::clone(&shared));
        let two = SessionItemStateManager::new(Arc::clone(&shared));

        let child = stage_child(&one, "a");
        one.save(&root_id()).unwrap();

        // both sessions stage changes to the same node
        one.modify_node(&child, |n| {
            n.add_property_name(Name::unqualified("from_one"));
        })
        .unwrap();
        two.modify_node(&child, |n| {
            n.add_property_name(Name::unqualified("from_two"));
        })
        .unwrap();

        two.save(&root_id()).unwrap();

        // session one was told its copy diverged
        assert_eq!(
            one.status(&ItemId::Node(child)),
            Some(ItemStatus::StaleModified)
        );
        assert_matches!(
            one.save(&root_id()),
            Err(StateError::StaleItemState { .. })
        );
        // the overlay survives the failed save; revert recovers the session
        one.revert(&root_id()).unwrap();
        one.modify_node(&child, |n| {
            n.add_property_name(Name::unqualified("from_one"));
        })
        .unwrap();
        one.save(&root_id()).unwrap();
    }

    #[test]
    fn partial_save_requires_self_containment() {
        let (_store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        // commit /a, /a/x and /b
        let a = stage_child(&session, "a");
        let b = stage_child(&session, "b");
        let x = NodeId::random();
        session
            .modify_node(&a, |n| {
                n.add_child_entry(Name::unqualified("x"), x);
            })
            .unwrap();
        session
            .create_node(NodeState::new(x, unstructured(), Some(a)))
            .unwrap();
        session.save(&root_id()).unwrap();

        // move x from a to b, in-place in the overlay
        session
            .modify_node(&a, |n| {
                n.remove_child_entry(&x);
            })
            .unwrap();
        session
            .modify_node(&b, |n| {
                n.add_child_entry(Name::unqualified("x"), x);
            })
            .unwrap();
        session
            .modify_node(&x, |n| {
                n.set_primary_parent(b);
            })
            .unwrap();

        // saving only the source side names the destination parent
        assert_matches!(
            session.save(&ItemId::Node(a)),
            Err(StateError::NotSelfContained { missing }) if missing == ItemId::Node(b)
        );
        // saving only the destination side names the source parent
        assert_matches!(
            session.save(&ItemId::Node(b)),
            Err(StateError::NotSelfContained { missing }) if missing == ItemId::Node(a)
        );
        // the whole tree is self-contained
        session.save(&root_id()).unwrap();

        let a_state = session.get_node(&a).unwrap();
        let b_state = session.get_node(&b).unwrap();
        assert!(!a_state.has_child_with_name(&Name::unqualified("x")));
        assert!(b_state.has_child_with_name(&Name::unqualified("x")));
        assert_eq!(session.get_node(&x).unwrap().primary_parent(), Some(b));
    }

    #[test]
    fn scoped_save_leaves_the_rest_pending() {
        let (store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        let a = stage_child(&session, "a");
        let b = stage_child(&session, "b");
        session.save(&root_id()).unwrap();

        session
            .modify_node(&a, |n| {
                n.add_property_name(Name::unqualified("in_a"));
            })
            .unwrap();
        session
            .modify_node(&b, |n| {
                n.add_property_name(Name::unqualified("in_b"));
            })
            .unwrap();

        session.save(&ItemId::Node(a)).unwrap();

        // a committed, b still pending
        assert!(store
            .load_node(&a)
            .unwrap()
            .has_property(&Name::unqualified("in_a")));
        assert!(!store
            .load_node(&b)
            .unwrap()
            .has_property(&Name::unqualified("in_b")));
        assert_eq!(
            session.status(&ItemId::Node(b)),
            Some(ItemStatus::ExistingModified)
        );
    }

    #[test]
    fn removal_is_realized_at_save() {
        let (store, shared) = setup();
        let session = SessionItemStateManager::new(shared);

        let a = stage_child(&session, "a");
        session.save(&root_id()).unwrap();

        session
            .modify_node(&ROOT_NODE_ID, |n| {
                n.remove_child_entry(&a);
            })
            .unwrap();
        session.mark_removed(&ItemId::Node(a)).unwrap();

        // the transient copy is still readable, existence says gone
        assert_eq!(
            session.status(&ItemId::Node(a)),
            Some(ItemStatus::ExistingRemoved)
        );
        assert!(!session.has_item(&ItemId::Node(a)).unwrap());
        assert!(store.exists(&ItemId::Node(a)).unwrap());

        session.save(&root_id()).unwrap();
        assert!(!store.exists(&ItemId::Node(a)).unwrap());
        assert_eq!(session.status(&ItemId::Node(a)), None);
    }
}
