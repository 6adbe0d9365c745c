//! The repository: the process-wide engine instance.

use std::sync::Arc;

use data_types::{
    well_known, ItemId, NamespaceRegistry, NodeState, PropDefId, PropertyState, PropertyType,
    Value, ROOT_NODE_ID,
};
use item_ops::{
    AccessOracle, AlwaysCheckedOut, BatchedItemOperations, LockOracle, NoLocks, OpenAccess,
    Validator, VersionOracle,
};
use item_state::{ChangeLog, EventListener, SessionItemStateManager, SharedItemStateManager};
use item_store::interface::Store;
use node_schema::{
    ContentClearance, DefinitionStore, MemDefinitionStore, NodeTypeRegistry,
    UnsupportedContentCheck,
};
use observability_deps::tracing::info;
use repo_time::{SystemProvider, TimeProvider};

use crate::session::Session;
use crate::Result;

/// A repository instance bound to one store.
///
/// Owns the process-wide singletons - the workspace state manager, the
/// node-type registry and the namespace registry - and hands out sessions.
/// The singletons are explicit values wired into every session, never
/// ambient globals.
#[derive(Debug)]
pub struct Repository {
    shared: Arc<SharedItemStateManager>,
    namespaces: Arc<NamespaceRegistry>,
    node_types: Arc<NodeTypeRegistry>,
    time: Arc<dyn TimeProvider>,
    access: Arc<dyn AccessOracle>,
    locks: Arc<dyn LockOracle>,
    versions: Arc<dyn VersionOracle>,
}

impl Repository {
    /// Open a repository over `store` with default collaborators.
    pub fn new(store: Arc<dyn Store>) -> Result<Self> {
        Self::builder(store).build()
    }

    /// A builder for swapping collaborators in.
    pub fn builder(store: Arc<dyn Store>) -> RepositoryBuilder {
        RepositoryBuilder {
            store,
            definition_store: Arc::new(MemDefinitionStore::new()),
            content: Arc::new(UnsupportedContentCheck),
            time: Arc::new(SystemProvider::new()),
            access: Arc::new(OpenAccess),
            locks: Arc::new(NoLocks),
            versions: Arc::new(AlwaysCheckedOut),
        }
    }

    /// Open a new session: an isolated transient overlay plus the operation
    /// layer over it.
    pub fn open_session(&self) -> Session {
        let manager = SessionItemStateManager::new(Arc::clone(&self.shared));
        let ops = BatchedItemOperations::new(
            Arc::clone(&manager),
            Arc::clone(&self.node_types),
            Arc::clone(&self.access),
            Arc::clone(&self.locks),
            Arc::clone(&self.versions),
            Arc::clone(&self.time),
        );
        let validator = Validator::new(Arc::clone(&manager), Arc::clone(&self.node_types));
        Session::new(manager, ops, validator, Arc::clone(&self.namespaces))
    }

    /// The namespace registry shared by every session.
    pub fn namespaces(&self) -> &Arc<NamespaceRegistry> {
        &self.namespaces
    }

    /// The node-type registry shared by every session.
    pub fn node_types(&self) -> &Arc<NodeTypeRegistry> {
        &self.node_types
    }

    /// The workspace state manager (observation, references index).
    pub fn shared_state(&self) -> &Arc<SharedItemStateManager> {
        &self.shared
    }

    /// Register an observation callback, weakly held.
    pub fn register_listener(&self, listener: &Arc<dyn EventListener>) {
        self.shared.register_listener(listener);
    }
}

/// Assembles a [`Repository`], letting deployments swap each collaborator.
#[derive(Debug)]
pub struct RepositoryBuilder {
    store: Arc<dyn Store>,
    definition_store: Arc<dyn DefinitionStore>,
    content: Arc<dyn ContentClearance>,
    time: Arc<dyn TimeProvider>,
    access: Arc<dyn AccessOracle>,
    locks: Arc<dyn LockOracle>,
    versions: Arc<dyn VersionOracle>,
}

impl RepositoryBuilder {
    /// Where custom node-type definitions persist.
    pub fn with_definition_store(mut self, definition_store: Arc<dyn DefinitionStore>) -> Self {
        self.definition_store = definition_store;
        self
    }

    /// The content-clearance hook for unregistration and non-trivial
    /// reregistration.
    pub fn with_content_clearance(mut self, content: Arc<dyn ContentClearance>) -> Self {
        self.content = content;
        self
    }

    /// The clock system-generated DATE values come from.
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// The access oracle.
    pub fn with_access_oracle(mut self, access: Arc<dyn AccessOracle>) -> Self {
        self.access = access;
        self
    }

    /// The lock oracle.
    pub fn with_lock_oracle(mut self, locks: Arc<dyn LockOracle>) -> Self {
        self.locks = locks;
        self
    }

    /// The version oracle.
    pub fn with_version_oracle(mut self, versions: Arc<dyn VersionOracle>) -> Self {
        self.versions = versions;
        self
    }

    /// Wire everything up, bootstrapping the root node on first start.
    pub fn build(self) -> Result<Repository> {
        let namespaces = Arc::new(NamespaceRegistry::new());
        let node_types = Arc::new(NodeTypeRegistry::new(
            Arc::clone(&namespaces),
            self.definition_store,
            self.content,
        )?);
        let shared = Arc::new(SharedItemStateManager::new(Arc::clone(&self.store)));

        if !shared.has(&ItemId::Node(ROOT_NODE_ID))? {
            bootstrap_root(&shared)?;
            info!(root = %ROOT_NODE_ID, "bootstrapped repository root");
        }

        Ok(Repository {
            shared,
            namespaces,
            node_types,
            time: self.time,
            access: self.access,
            locks: self.locks,
            versions: self.versions,
        })
    }
}

/// Write the root node and its computed primary-type property.
fn bootstrap_root(shared: &SharedItemStateManager) -> Result<()> {
    let mut root = NodeState::new(ROOT_NODE_ID, well_known::NT_UNSTRUCTURED.clone(), None);
    root.add_property_name(well_known::PRIMARY_TYPE.clone());

    let mut primary = PropertyState::new(
        ROOT_NODE_ID,
        well_known::PRIMARY_TYPE.clone(),
        PropertyType::Name,
        false,
    );
    primary.set_values(
        PropertyType::Name,
        vec![Value::Name(well_known::NT_UNSTRUCTURED.clone())],
    );
    primary.set_definition(Some(PropDefId {
        declaring_type: well_known::NT_BASE.clone(),
        name: well_known::PRIMARY_TYPE.clone(),
    }));

    let mut log = ChangeLog::new();
    log.added(root.into());
    log.added(primary.into());
    shared.execute(&log, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use item_store::mem::MemStore;

    use super::*;

    #[test]
    fn bootstrap_is_idempotent() {
        let store = Arc::new(MemStore::new());
        let repository = Repository::new(Arc::clone(&store) as Arc<dyn Store>).unwrap();
        drop(repository);

        // a second open over the same store keeps the existing root
        let repository = Repository::new(store as Arc<dyn Store>).unwrap();
        let session = repository.open_session();
        let root = session.node("/").unwrap();
        assert_eq!(root.id(), ROOT_NODE_ID);
        assert!(root.has_property(&well_known::PRIMARY_TYPE));
    }
}
