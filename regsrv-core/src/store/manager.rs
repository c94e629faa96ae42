//! Registered servers store
//!
//! `RegisteredServersStore` owns the whole tree in a flat arena indexed by
//! handle and persists it through one of two backends. A local store rewrites
//! its entire XML document after every committed mutation; a remote store
//! issues one catalog call per mutation and applies the result (such as a new
//! id) to its in-memory mirror.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;

use super::events::{StoreEvent, StoreListener};
use super::remote::{RemoteCall, RemoteCatalog};
use crate::connection_string::shared_server_connection_string;
use crate::document::{parse_document, write_document, Document, GroupNode};
use crate::error::{EntityKind, RegistryError, RegistryResult, ReservedAction};
use crate::models::{
    CredentialPersistenceType, GroupId, GroupParent, IdentityKey, NameComparer, ObjectState,
    RegisteredServer, ServerGroup, ServerId, ServerType, Urn, ValidationMode, ValidationState,
    CENTRAL_MANAGEMENT_GROUP,
};
use crate::secret::CredentialCodec;

/// Maximum number of parent hops followed by any tree walk
pub const MAX_TREE_DEPTH: usize = 10_000;

/// Where a store keeps its tree
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// A single XML document on disk
    Local {
        /// Path of the store document
        path: PathBuf,
    },
    /// A shared catalog reached through named procedures
    Remote {
        /// The catalog connection
        catalog: Arc<dyn RemoteCatalog>,
    },
}

#[derive(Debug, Clone, Default)]
struct Tree {
    groups: HashMap<GroupId, ServerGroup>,
    servers: HashMap<ServerId, RegisteredServer>,
    roots: Vec<GroupId>,
}

impl Tree {
    fn link_group(&mut self, parent: GroupParent, id: GroupId) {
        match parent {
            GroupParent::Store => self.roots.push(id),
            GroupParent::Group(parent_id) => {
                if let Some(parent) = self.groups.get_mut(&parent_id) {
                    parent.groups.push(id);
                }
            }
        }
    }

    fn unlink_group(&mut self, id: GroupId) {
        match self.groups.get(&id).and_then(|g| g.parent) {
            Some(GroupParent::Store) => self.roots.retain(|root| *root != id),
            Some(GroupParent::Group(parent_id)) => {
                if let Some(parent) = self.groups.get_mut(&parent_id) {
                    parent.groups.retain(|child| *child != id);
                }
            }
            None => {}
        }
    }

    fn link_server(&mut self, group_id: GroupId, id: ServerId) {
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.servers.push(id);
        }
    }

    fn unlink_server(&mut self, id: ServerId) {
        if let Some(group_id) = self.servers.get(&id).and_then(|s| s.parent) {
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.servers.retain(|child| *child != id);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachMode {
    /// Entities read from the store's own document keep their ids
    Load,
    /// Entities grafted from another document get fresh ids
    Graft,
}

/// The root of a registered server tree
pub struct RegisteredServersStore {
    backend: StoreBackend,
    codec: CredentialCodec,
    comparer: NameComparer,
    tree: Tree,
    serialize_on_creation: bool,
    validation_mode: ValidationMode,
    credential_persistence_override: Option<CredentialPersistenceType>,
    listeners: Vec<StoreListener>,
}

impl fmt::Debug for RegisteredServersStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredServersStore")
            .field("backend", &self.backend)
            .field("groups", &self.tree.groups.len())
            .field("servers", &self.tree.servers.len())
            .field("serialize_on_creation", &self.serialize_on_creation)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl RegisteredServersStore {
    /// Creates an empty local store that will be written to `path`
    #[must_use]
    pub fn new_local(path: impl Into<PathBuf>, codec: CredentialCodec) -> Self {
        Self {
            backend: StoreBackend::Local { path: path.into() },
            codec,
            comparer: NameComparer::default(),
            tree: Tree::default(),
            serialize_on_creation: true,
            validation_mode: ValidationMode::FailFast,
            credential_persistence_override: None,
            listeners: Vec::new(),
        }
    }

    /// Opens a local store, reading `path` if it exists
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `Deserialize` if the file cannot be read or parsed.
    pub fn open_local(path: impl Into<PathBuf>, codec: CredentialCodec) -> RegistryResult<Self> {
        let mut store = Self::new_local(path, codec);
        store.refresh()?;
        Ok(store)
    }

    /// Opens a store mirrored from a remote catalog
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the catalog cannot be enumerated.
    pub fn open_remote(catalog: Arc<dyn RemoteCatalog>, codec: CredentialCodec) -> RegistryResult<Self> {
        let mut store = Self {
            comparer: NameComparer::new(catalog.collation()),
            backend: StoreBackend::Remote { catalog },
            codec,
            tree: Tree::default(),
            serialize_on_creation: true,
            validation_mode: ValidationMode::FailFast,
            credential_persistence_override: None,
            listeners: Vec::new(),
        };
        store.refresh()?;
        Ok(store)
    }

    /// Re-reads the tree from the backend, discarding the in-memory copy
    ///
    /// # Errors
    ///
    /// Returns `Deserialize` for an unreadable local file, or `Remote` if the
    /// catalog cannot be enumerated.
    pub fn refresh(&mut self) -> RegistryResult<()> {
        match self.backend.clone() {
            StoreBackend::Local { path } => self.load_file(&path),
            StoreBackend::Remote { catalog } => self.load_catalog(catalog.as_ref()),
        }
    }

    fn load_file(&mut self, path: &Path) -> RegistryResult<()> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Store file not found, starting with an empty store");
            self.tree = Tree::default();
            return Ok(());
        }

        let deserialize = |reason: String| RegistryError::Deserialize {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| deserialize(e.to_string()))?;
        let Document::Store(nodes) = parse_document(&text).map_err(|e| deserialize(e.to_string()))?
        else {
            return Err(deserialize(format!(
                "expected a {} root element",
                EntityKind::Store.as_str()
            )));
        };

        let previous = std::mem::take(&mut self.tree);
        for node in nodes {
            if let Err(e) = self.attach_node(GroupParent::Store, node, AttachMode::Load, 0) {
                self.tree = previous;
                return Err(deserialize(e.to_string()));
            }
        }
        tracing::info!(
            path = %path.display(),
            groups = self.tree.groups.len(),
            servers = self.tree.servers.len(),
            "Loaded registered servers store"
        );
        Ok(())
    }

    fn load_catalog(&mut self, catalog: &dyn RemoteCatalog) -> RegistryResult<()> {
        let mut group_rows = catalog.enumerate_groups()?;
        let mut server_rows = catalog.enumerate_servers()?;
        group_rows.sort_by_key(|row| row.id);
        server_rows.sort_by_key(|row| row.id);

        let mut tree = Tree::default();
        let mut by_id = HashMap::new();
        for row in &group_rows {
            let mut group = ServerGroup::new(row.name.clone()).with_description(row.description.clone());
            group.server_type = ServerType::from_catalog_code(row.server_type).unwrap_or_default();
            group.id = row.id;
            group.state = ObjectState::Existing;
            by_id.insert(row.id, group.handle);
            tree.groups.insert(group.handle, group);
        }

        for row in &group_rows {
            let Some(&handle) = by_id.get(&row.id) else {
                continue;
            };
            let parent = match row.parent_id.and_then(|pid| by_id.get(&pid).copied()) {
                Some(parent) => GroupParent::Group(parent),
                None => {
                    if let Some(pid) = row.parent_id {
                        tracing::warn!(group = %row.name, parent_id = pid, "Catalog group has an unknown parent");
                    }
                    GroupParent::Store
                }
            };
            if let GroupParent::Group(parent_id) = parent {
                let parent_type = tree.groups.get(&parent_id).map(|g| g.server_type);
                if let (Some(parent_type), Some(group)) = (parent_type, tree.groups.get_mut(&handle)) {
                    group.server_type = parent_type;
                }
            }
            if let Some(group) = tree.groups.get_mut(&handle) {
                group.parent = Some(parent);
            }
            tree.link_group(parent, handle);
        }

        for row in server_rows {
            let Some(&group_id) = by_id.get(&row.group_id) else {
                tracing::warn!(server = %row.name, group_id = row.group_id, "Catalog server has an unknown group");
                continue;
            };
            let mut server = RegisteredServer::new(row.name).with_description(row.description);
            server.server_name = row.server_name;
            server.server_type = tree
                .groups
                .get(&group_id)
                .map_or_else(|| ServerType::from_catalog_code(row.server_type).unwrap_or_default(), |g| g.server_type);
            server.id = row.id;
            server.parent = Some(group_id);
            server.state = ObjectState::Existing;
            let handle = server.handle;
            tree.servers.insert(handle, server);
            tree.link_server(group_id, handle);
        }

        tracing::info!(
            catalog = %catalog.display_name(),
            groups = tree.groups.len(),
            servers = tree.servers.len(),
            "Loaded shared registered servers"
        );
        self.tree = tree;
        Ok(())
    }

    // ========== Store Properties ==========

    /// Returns the backend
    #[must_use]
    pub const fn backend(&self) -> &StoreBackend {
        &self.backend
    }

    /// Returns true for a local file store
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self.backend, StoreBackend::Local { .. })
    }

    /// Returns the document path of a local store
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        match &self.backend {
            StoreBackend::Local { path } => Some(path),
            StoreBackend::Remote { .. } => None,
        }
    }

    /// Returns the catalog of a remote store
    #[must_use]
    pub const fn remote_catalog(&self) -> Option<&Arc<dyn RemoteCatalog>> {
        match &self.backend {
            StoreBackend::Remote { catalog } => Some(catalog),
            StoreBackend::Local { .. } => None,
        }
    }

    /// Returns the credential codec
    #[must_use]
    pub const fn codec(&self) -> &CredentialCodec {
        &self.codec
    }

    /// Returns the sibling name comparison rule
    #[must_use]
    pub const fn comparer(&self) -> &NameComparer {
        &self.comparer
    }

    /// Session-scoped credential policy applied to exports
    #[must_use]
    pub const fn credential_persistence_override(&self) -> Option<CredentialPersistenceType> {
        self.credential_persistence_override
    }

    /// Sets or clears the session-scoped credential policy
    pub fn set_credential_persistence_override(&mut self, policy: Option<CredentialPersistenceType>) {
        self.credential_persistence_override = policy;
    }

    /// Returns the policy a server is written with while the override is set
    #[must_use]
    pub const fn effective_persistence(&self, server: &RegisteredServer) -> CredentialPersistenceType {
        match self.credential_persistence_override {
            Some(policy) => {
                CredentialPersistenceType::effective_for_export(server.credential_persistence_type, policy)
            }
            None => server.credential_persistence_type,
        }
    }

    /// Returns whether creations rewrite the local document immediately
    #[must_use]
    pub const fn serialize_on_creation(&self) -> bool {
        self.serialize_on_creation
    }

    /// Suspends or resumes the document rewrite after each creation
    pub fn set_serialize_on_creation(&mut self, enabled: bool) {
        self.serialize_on_creation = enabled;
    }

    /// Selects fail-fast or batch validation for mutations
    pub fn set_validation_mode(&mut self, mode: ValidationMode) {
        self.validation_mode = mode;
    }

    /// Registers a change listener
    pub fn subscribe(&mut self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ========== Queries ==========

    /// Gets a group by handle
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<&ServerGroup> {
        self.tree.groups.get(&id)
    }

    /// Gets a server by handle
    #[must_use]
    pub fn server(&self, id: ServerId) -> Option<&RegisteredServer> {
        self.tree.servers.get(&id)
    }

    fn group_ref(&self, id: GroupId) -> RegistryResult<&ServerGroup> {
        self.tree
            .groups
            .get(&id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::ServerGroup, id.to_string()))
    }

    fn server_ref(&self, id: ServerId) -> RegistryResult<&RegisteredServer> {
        self.tree
            .servers
            .get(&id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::RegisteredServer, id.to_string()))
    }

    /// Top-level groups in insertion order
    #[must_use]
    pub fn root_groups(&self) -> Vec<&ServerGroup> {
        self.tree
            .roots
            .iter()
            .filter_map(|id| self.tree.groups.get(id))
            .collect()
    }

    /// Child groups of a group in insertion order
    #[must_use]
    pub fn child_groups(&self, id: GroupId) -> Vec<&ServerGroup> {
        self.sibling_groups(GroupParent::Group(id))
            .iter()
            .filter_map(|child| self.tree.groups.get(child))
            .collect()
    }

    /// Servers of a group in insertion order
    #[must_use]
    pub fn servers_in(&self, id: GroupId) -> Vec<&RegisteredServer> {
        self.tree.groups.get(&id).map_or_else(Vec::new, |group| {
            group
                .servers
                .iter()
                .filter_map(|s| self.tree.servers.get(s))
                .collect()
        })
    }

    /// Number of groups in the store
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.tree.groups.len()
    }

    /// Number of servers in the store
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.tree.servers.len()
    }

    fn sibling_groups(&self, parent: GroupParent) -> &[GroupId] {
        match parent {
            GroupParent::Store => &self.tree.roots,
            GroupParent::Group(id) => self.tree.groups.get(&id).map_or(&[], |g| g.groups.as_slice()),
        }
    }

    /// Finds a child group by name under the store's collation
    #[must_use]
    pub fn find_child_group(&self, parent: GroupParent, name: &str) -> Option<GroupId> {
        self.sibling_groups(parent).iter().copied().find(|id| {
            self.tree
                .groups
                .get(id)
                .is_some_and(|g| self.comparer.same_name(&g.name, name))
        })
    }

    /// Finds a server by name within a group
    #[must_use]
    pub fn find_server(&self, group_id: GroupId, name: &str) -> Option<ServerId> {
        let group = self.tree.groups.get(&group_id)?;
        group.servers.iter().copied().find(|id| {
            self.tree
                .servers
                .get(id)
                .is_some_and(|s| self.comparer.same_name(&s.name, name))
        })
    }

    /// Finds the built-in group of a server type without creating it
    #[must_use]
    pub fn find_server_group(&self, server_type: ServerType) -> Option<GroupId> {
        self.find_child_group(GroupParent::Store, server_type.group_name())
    }

    /// Returns the built-in group of a server type
    ///
    /// Local stores create the group on first access; it is written with the
    /// next mutation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a remote catalog lacks the group.
    pub fn server_group(&mut self, server_type: ServerType) -> RegistryResult<GroupId> {
        self.well_known_group(server_type.group_name(), server_type)
    }

    /// Returns the database engine built-in group
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a remote catalog lacks the group.
    pub fn database_engine_server_group(&mut self) -> RegistryResult<GroupId> {
        self.server_group(ServerType::DatabaseEngine)
    }

    /// Returns the central management group of a local store
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for remote stores.
    pub fn central_management_server_group(&mut self) -> RegistryResult<GroupId> {
        if !self.is_local() {
            return Err(RegistryError::InvalidState(
                "the central management group exists only in local stores".to_string(),
            ));
        }
        self.well_known_group(CENTRAL_MANAGEMENT_GROUP, ServerType::DatabaseEngine)
    }

    fn well_known_group(&mut self, name: &str, server_type: ServerType) -> RegistryResult<GroupId> {
        if let Some(id) = self.find_child_group(GroupParent::Store, name) {
            return Ok(id);
        }
        if !self.is_local() {
            return Err(RegistryError::not_found(EntityKind::ServerGroup, name));
        }

        let mut group = ServerGroup::new(name);
        group.server_type = server_type;
        group.parent = Some(GroupParent::Store);
        group.state = ObjectState::Existing;
        group.id = self.next_local_id();
        let id = group.handle;
        self.tree.groups.insert(id, group);
        self.tree.link_group(GroupParent::Store, id);
        tracing::debug!(group = name, "Created built-in server group");
        Ok(id)
    }

    /// Returns the groups from the top level down to `id`, inclusive
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group, or `InvalidState` if the
    /// parent chain is longer than [`MAX_TREE_DEPTH`] (a corrupted tree).
    pub fn ancestors(&self, id: GroupId) -> RegistryResult<Vec<GroupId>> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(group_id) = current {
            if chain.len() >= MAX_TREE_DEPTH {
                return Err(RegistryError::InvalidState(format!(
                    "server group hierarchy exceeds {MAX_TREE_DEPTH} levels"
                )));
            }
            let group = self.group_ref(group_id)?;
            chain.push(group_id);
            current = match group.parent {
                Some(GroupParent::Group(parent)) => Some(parent),
                _ => None,
            };
        }
        chain.reverse();
        Ok(chain)
    }

    /// Gets the slash-separated path of a group (e.g. `DatabaseEngineServerGroup/Prod`)
    #[must_use]
    pub fn group_path(&self, id: GroupId) -> Option<String> {
        let chain = self.ancestors(id).ok()?;
        let names: Vec<&str> = chain
            .iter()
            .filter_map(|g| self.tree.groups.get(g).map(ServerGroup::name))
            .collect();
        Some(names.join("/"))
    }

    /// Resolves a slash-separated group path from the top level
    #[must_use]
    pub fn resolve_group_path(&self, path: &str) -> Option<GroupId> {
        let mut parent = GroupParent::Store;
        let mut found = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let id = self.find_child_group(parent, segment)?;
            parent = GroupParent::Group(id);
            found = Some(id);
        }
        found
    }

    /// Resolves `group/path/server` to a server
    #[must_use]
    pub fn resolve_server_path(&self, path: &str) -> Option<ServerId> {
        let (group_path, name) = path.trim_end_matches('/').rsplit_once('/')?;
        let group = self.resolve_group_path(group_path)?;
        self.find_server(group, name)
    }

    fn group_keys(&self, id: GroupId) -> RegistryResult<Vec<IdentityKey>> {
        Ok(self
            .ancestors(id)?
            .iter()
            .filter_map(|g| self.tree.groups.get(g))
            .map(|g| self.comparer.key(EntityKind::ServerGroup, &g.name))
            .collect())
    }

    /// Builds the locator of a group
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group.
    pub fn group_urn(&self, id: GroupId) -> RegistryResult<Urn> {
        Ok(Urn::from_keys(&self.group_keys(id)?))
    }

    /// Builds the locator of a server
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown server.
    pub fn server_urn(&self, id: ServerId) -> RegistryResult<Urn> {
        let server = self.server_ref(id)?;
        let mut keys = match server.parent {
            Some(group_id) => self.group_keys(group_id)?,
            None => Vec::new(),
        };
        keys.push(self.comparer.key(EntityKind::RegisteredServer, &server.name));
        Ok(Urn::from_keys(&keys))
    }

    /// Returns the effective connection string of a server
    ///
    /// Shared servers without a stored string get an integrated-security
    /// string naming their server.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown server, or a crypto error if a
    /// stored password cannot be unprotected.
    pub fn connection_string(&self, id: ServerId) -> RegistryResult<Option<SecretString>> {
        let server = self.server_ref(id)?;
        if let Some(plain) = server.connection_string(&self.codec)? {
            return Ok(Some(plain));
        }
        Ok(self.shared_connection_string(server).map(SecretString::from))
    }

    /// Computed connection string of a shared server; `None` for local stores
    #[must_use]
    pub fn shared_connection_string(&self, server: &RegisteredServer) -> Option<String> {
        self.remote_catalog().map(|catalog| {
            shared_server_connection_string(&server.server_name, catalog.trust_server_certificate())
        })
    }

    /// Copies a group and its descendants out of the store
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group, or `InvalidState` if the
    /// subtree is deeper than [`MAX_TREE_DEPTH`].
    pub fn snapshot_group(&self, id: GroupId) -> RegistryResult<GroupNode> {
        self.snapshot_at(id, 0)
    }

    fn snapshot_at(&self, id: GroupId, depth: usize) -> RegistryResult<GroupNode> {
        if depth > MAX_TREE_DEPTH {
            return Err(RegistryError::InvalidState(format!(
                "server group hierarchy exceeds {MAX_TREE_DEPTH} levels"
            )));
        }
        let group = self.group_ref(id)?;
        let mut node = GroupNode::new(group.clone());
        for child in &group.groups {
            node.groups.push(self.snapshot_at(*child, depth + 1)?);
        }
        node.servers = group
            .servers
            .iter()
            .filter_map(|s| self.tree.servers.get(s).cloned())
            .collect();
        Ok(node)
    }

    // ========== Persistence ==========

    /// Writes the whole tree to the local document
    ///
    /// Remote stores have nothing to write. The file is overwritten in place.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn serialize(&self) -> RegistryResult<()> {
        let StoreBackend::Local { path } = &self.backend else {
            return Ok(());
        };
        let nodes = self
            .tree
            .roots
            .iter()
            .map(|id| self.snapshot_group(*id))
            .collect::<RegistryResult<Vec<_>>>()?;
        let xml = write_document(&Document::Store(nodes))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, xml)?;

        tracing::debug!(
            path = %path.display(),
            groups = self.tree.groups.len(),
            servers = self.tree.servers.len(),
            "Serialized registered servers store"
        );
        Ok(())
    }

    /// Applies a change and, for local stores, rewrites the document
    ///
    /// The tree is restored if the change or the write fails.
    fn commit<T>(
        &mut self,
        persist: bool,
        change: impl FnOnce(&mut Self) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let saved = self.tree.clone();
        let result = change(self).and_then(|value| {
            if persist {
                self.serialize()?;
            }
            Ok(value)
        });
        if result.is_err() {
            self.tree = saved;
        }
        result
    }

    fn emit(&self, event: &StoreEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    fn next_local_id(&self) -> i32 {
        let groups = self.tree.groups.values().map(|g| g.id);
        let servers = self.tree.servers.values().map(|s| s.id);
        groups.chain(servers).max().unwrap_or(0).saturating_add(1)
    }

    // ========== Validation ==========

    fn ensure_valid(state: ValidationState) -> RegistryResult<()> {
        if state.is_valid() {
            return Ok(());
        }
        if state.mode() == ValidationMode::FailFast {
            if let Some(issue) = state.issues().first() {
                return Err(RegistryError::Validation {
                    property: issue.property.clone(),
                    reason: issue.reason.clone(),
                });
            }
        }
        Err(RegistryError::ValidationFailed(state))
    }

    fn ensure_unique_group(
        &self,
        parent: GroupParent,
        name: &str,
        except: Option<GroupId>,
    ) -> RegistryResult<()> {
        match self.find_child_group(parent, name) {
            Some(existing) if Some(existing) != except => Err(RegistryError::AlreadyExists {
                kind: EntityKind::ServerGroup,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn ensure_unique_server(
        &self,
        group_id: GroupId,
        name: &str,
        except: Option<ServerId>,
    ) -> RegistryResult<()> {
        match self.find_server(group_id, name) {
            Some(existing) if Some(existing) != except => Err(RegistryError::AlreadyExists {
                kind: EntityKind::RegisteredServer,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Resolves the server type a new group under `parent` must carry
    fn type_for_new_group(&self, parent: GroupParent, name: &str) -> RegistryResult<ServerType> {
        match parent {
            GroupParent::Store => Ok(ServerType::from_group_name(name).unwrap_or_default()),
            GroupParent::Group(parent_id) => {
                let parent = self.group_ref(parent_id)?;
                if parent.is_central_management_group() {
                    return Err(RegistryError::ReservedGroup {
                        name: parent.name.clone(),
                        action: ReservedAction::CreateUnder,
                    });
                }
                Ok(parent.server_type)
            }
        }
    }

    // ========== Creation ==========

    /// Creates a pending group under `parent`
    ///
    /// The group inherits its parent's server type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the group is not pending, `ReservedGroup` if
    /// the parent is the central management group, a validation error,
    /// `AlreadyExists` for a sibling with the same name, or a backend error.
    pub fn create_group(&mut self, parent: GroupParent, group: ServerGroup) -> RegistryResult<GroupId> {
        if group.state != ObjectState::Pending {
            return Err(RegistryError::InvalidState(format!(
                "server group '{}' has already been created",
                group.name
            )));
        }
        let server_type = self.type_for_new_group(parent, &group.name)?;
        Self::ensure_valid(group.validate(self.validation_mode))?;
        self.ensure_unique_group(parent, &group.name, None)?;

        let mut group = group;
        group.server_type = server_type;
        group.groups.clear();
        group.servers.clear();
        group.id = match &self.backend {
            StoreBackend::Local { .. } => self.next_local_id(),
            StoreBackend::Remote { catalog } => {
                let GroupParent::Group(parent_id) = parent else {
                    return Err(RegistryError::InvalidArgument {
                        argument: "parent".to_string(),
                        reason: "shared groups must be created under an existing group".to_string(),
                    });
                };
                let parent_id = self.group_ref(parent_id)?.id;
                let call = RemoteCall::add_group(parent_id, &group.name, &group.description, server_type);
                catalog.execute(&call)?.ok_or_else(|| {
                    RegistryError::Remote(format!("{} returned no id", call.procedure))
                })?
            }
        };

        let handle = group.handle;
        let persist = self.serialize_on_creation;
        self.commit(persist, |store| {
            group.parent = Some(parent);
            group.state = ObjectState::Existing;
            store.tree.groups.insert(handle, group);
            store.tree.link_group(parent, handle);
            Ok(())
        })?;

        tracing::debug!(group = %handle, "Created server group");
        self.emit(&StoreEvent::Created {
            kind: EntityKind::ServerGroup,
            urn: self.group_urn(handle)?,
        });
        Ok(handle)
    }

    /// Creates a pending server in `group_id`
    ///
    /// Shared servers are stripped to integrated authentication before the
    /// catalog call; local servers have their persisted form computed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the server is not pending, `NotFound` for an
    /// unknown group, a validation error, `AlreadyExists` for a sibling with
    /// the same name, a crypto error, or a backend error.
    pub fn create_server(&mut self, group_id: GroupId, server: RegisteredServer) -> RegistryResult<ServerId> {
        if server.state != ObjectState::Pending {
            return Err(RegistryError::InvalidState(format!(
                "registered server '{}' has already been created",
                server.name
            )));
        }
        let group = self.group_ref(group_id)?;
        let (server_type, group_remote_id) = (group.server_type, group.id);
        Self::ensure_valid(server.validate(self.validation_mode))?;
        self.ensure_unique_server(group_id, &server.name, None)?;

        let mut server = server;
        server.adopt_server_type(server_type);
        match &self.backend {
            StoreBackend::Local { .. } => {
                server.refresh_projection(&self.codec)?;
                server.id = self.next_local_id();
            }
            StoreBackend::Remote { catalog } => {
                server.strip_to_shared();
                let call = RemoteCall::add_server(
                    group_remote_id,
                    &server.name,
                    &server.server_name,
                    &server.description,
                    server_type,
                );
                server.id = catalog.execute(&call)?.ok_or_else(|| {
                    RegistryError::Remote(format!("{} returned no id", call.procedure))
                })?;
            }
        }

        let handle = server.handle;
        let persist = self.serialize_on_creation;
        self.commit(persist, |store| {
            server.parent = Some(group_id);
            server.state = ObjectState::Existing;
            store.tree.servers.insert(handle, server);
            store.tree.link_server(group_id, handle);
            Ok(())
        })?;

        tracing::debug!(server = %handle, "Created registered server");
        self.emit(&StoreEvent::Created {
            kind: EntityKind::RegisteredServer,
            urn: self.server_urn(handle)?,
        });
        Ok(handle)
    }

    /// Grafts a detached subtree under `parent` with a single write
    ///
    /// Used for local imports; one `Created` event is raised for the root.
    pub(crate) fn graft_group(&mut self, parent: GroupId, node: GroupNode) -> RegistryResult<GroupId> {
        let handle = self.commit(true, |store| {
            store.attach_node(GroupParent::Group(parent), node, AttachMode::Graft, 0)
        })?;
        self.emit(&StoreEvent::Created {
            kind: EntityKind::ServerGroup,
            urn: self.group_urn(handle)?,
        });
        Ok(handle)
    }

    fn attach_node(
        &mut self,
        parent: GroupParent,
        node: GroupNode,
        mode: AttachMode,
        depth: usize,
    ) -> RegistryResult<GroupId> {
        if depth > MAX_TREE_DEPTH {
            return Err(RegistryError::InvalidState(format!(
                "server group hierarchy exceeds {MAX_TREE_DEPTH} levels"
            )));
        }
        let GroupNode {
            mut group,
            groups,
            servers,
        } = node;

        group.server_type = match (parent, mode) {
            (GroupParent::Store, _) => {
                ServerType::from_group_name(&group.name).unwrap_or(group.server_type)
            }
            (GroupParent::Group(_), AttachMode::Graft) => self.type_for_new_group(parent, &group.name)?,
            (GroupParent::Group(parent_id), AttachMode::Load) => self.group_ref(parent_id)?.server_type,
        };
        Self::ensure_valid(group.validate(self.validation_mode))?;
        self.ensure_unique_group(parent, &group.name, None)?;

        if mode == AttachMode::Graft {
            group.id = self.next_local_id();
        }
        let handle = group.handle;
        let server_type = group.server_type;
        group.parent = Some(parent);
        group.state = ObjectState::Existing;
        group.groups.clear();
        group.servers.clear();
        self.tree.groups.insert(handle, group);
        self.tree.link_group(parent, handle);

        for mut server in servers {
            Self::ensure_valid(server.validate(self.validation_mode))?;
            self.ensure_unique_server(handle, &server.name, None)?;
            if mode == AttachMode::Graft {
                server.id = self.next_local_id();
                server.adopt_server_type(server_type);
                server.refresh_projection(&self.codec)?;
            } else {
                server.server_type = server_type;
            }
            server.parent = Some(handle);
            server.state = ObjectState::Existing;
            let server_id = server.handle;
            self.tree.servers.insert(server_id, server);
            self.tree.link_server(handle, server_id);
        }

        for child in groups {
            self.attach_node(GroupParent::Group(handle), child, mode, depth + 1)?;
        }
        Ok(handle)
    }

    // ========== Alteration ==========

    /// Changes a group's properties and re-persists it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown group, a validation error, or a
    /// backend error.
    pub fn alter_group(&mut self, id: GroupId, change: impl FnOnce(&mut ServerGroup)) -> RegistryResult<()> {
        let mut updated = self.group_ref(id)?.clone();
        change(&mut updated);
        Self::ensure_valid(updated.validate(self.validation_mode))?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::update_group(updated.id, &updated.description))?;
        }
        self.commit(true, |store| {
            store.tree.groups.insert(id, updated);
            Ok(())
        })?;

        self.emit(&StoreEvent::Altered {
            kind: EntityKind::ServerGroup,
            urn: self.group_urn(id)?,
        });
        Ok(())
    }

    /// Changes a server's properties and re-persists it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown server, a validation error, a crypto
    /// error, or a backend error.
    pub fn alter_server(
        &mut self,
        id: ServerId,
        change: impl FnOnce(&mut RegisteredServer),
    ) -> RegistryResult<()> {
        let mut updated = self.server_ref(id)?.clone();
        change(&mut updated);
        Self::ensure_valid(updated.validate(self.validation_mode))?;

        match &self.backend {
            StoreBackend::Local { .. } => updated.refresh_projection(&self.codec)?,
            StoreBackend::Remote { catalog } => {
                updated.strip_to_shared();
                catalog.execute(&RemoteCall::update_server(
                    updated.id,
                    &updated.server_name,
                    &updated.description,
                ))?;
            }
        }
        self.commit(true, |store| {
            store.tree.servers.insert(id, updated);
            Ok(())
        })?;

        self.emit(&StoreEvent::Altered {
            kind: EntityKind::RegisteredServer,
            urn: self.server_urn(id)?,
        });
        Ok(())
    }

    // ========== Rename ==========

    fn check_new_name(new_name: &str) -> RegistryResult<()> {
        if new_name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument {
                argument: "newName".to_string(),
                reason: "name cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Renames a group
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name, `ReservedGroup` for a
    /// built-in group, `AlreadyExists` for a sibling with the new name, or a
    /// backend error.
    pub fn rename_group(&mut self, id: GroupId, new_name: &str) -> RegistryResult<()> {
        Self::check_new_name(new_name)?;
        let group = self.group_ref(id)?;
        if group.is_system_group() || group.is_central_management_group() {
            return Err(RegistryError::ReservedGroup {
                name: group.name.clone(),
                action: ReservedAction::Rename,
            });
        }
        let remote_id = group.id;
        self.ensure_unique_group(group.parent.unwrap_or(GroupParent::Store), new_name, Some(id))?;
        let old_urn = self.group_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::rename_group(remote_id, new_name))?;
        }
        self.commit(true, |store| {
            if let Some(group) = store.tree.groups.get_mut(&id) {
                group.name = new_name.to_string();
            }
            Ok(())
        })?;

        self.emit(&StoreEvent::Renamed {
            kind: EntityKind::ServerGroup,
            old_urn,
            urn: self.group_urn(id)?,
        });
        Ok(())
    }

    /// Renames a server
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name, `AlreadyExists` for a
    /// sibling with the new name, or a backend error.
    pub fn rename_server(&mut self, id: ServerId, new_name: &str) -> RegistryResult<()> {
        Self::check_new_name(new_name)?;
        let server = self.server_ref(id)?;
        let remote_id = server.id;
        if let Some(group_id) = server.parent {
            self.ensure_unique_server(group_id, new_name, Some(id))?;
        }
        let old_urn = self.server_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::rename_server(remote_id, new_name))?;
        }
        self.commit(true, |store| {
            if let Some(server) = store.tree.servers.get_mut(&id) {
                server.name = new_name.to_string();
            }
            Ok(())
        })?;

        self.emit(&StoreEvent::Renamed {
            kind: EntityKind::RegisteredServer,
            old_urn,
            urn: self.server_urn(id)?,
        });
        Ok(())
    }

    // ========== Move ==========

    /// Moves a group under another group
    ///
    /// # Errors
    ///
    /// Returns `ReservedGroup` for a top-level group or a central management
    /// target, `InvalidArgument` for a target of another server type or one
    /// inside the moved subtree, `AlreadyExists` for a name clash, or a
    /// backend error.
    pub fn move_group(&mut self, id: GroupId, new_parent: GroupId) -> RegistryResult<()> {
        let group = self.group_ref(id)?;
        if group.parent == Some(GroupParent::Store) {
            return Err(RegistryError::ReservedGroup {
                name: group.name.clone(),
                action: ReservedAction::Move,
            });
        }
        if group.parent == Some(GroupParent::Group(new_parent)) {
            return Ok(());
        }
        let (name, server_type, remote_id) = (group.name.clone(), group.server_type, group.id);

        let target = self.group_ref(new_parent)?;
        if target.is_central_management_group() {
            return Err(RegistryError::ReservedGroup {
                name: target.name.clone(),
                action: ReservedAction::CreateUnder,
            });
        }
        if target.server_type != server_type {
            return Err(RegistryError::InvalidArgument {
                argument: "newParent".to_string(),
                reason: format!(
                    "server group '{}' holds {} entries, not {server_type}",
                    target.name, target.server_type
                ),
            });
        }
        let target_remote_id = target.id;
        if self.ancestors(new_parent)?.contains(&id) {
            return Err(RegistryError::InvalidArgument {
                argument: "newParent".to_string(),
                reason: "moving the group would create a cycle in the hierarchy".to_string(),
            });
        }
        self.ensure_unique_group(GroupParent::Group(new_parent), &name, Some(id))?;
        let old_urn = self.group_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::move_group(remote_id, target_remote_id))?;
        }
        self.commit(true, |store| {
            store.tree.unlink_group(id);
            if let Some(group) = store.tree.groups.get_mut(&id) {
                group.parent = Some(GroupParent::Group(new_parent));
            }
            store.tree.link_group(GroupParent::Group(new_parent), id);
            Ok(())
        })?;

        self.emit(&StoreEvent::Moved {
            kind: EntityKind::ServerGroup,
            old_urn,
            urn: self.group_urn(id)?,
        });
        Ok(())
    }

    /// Moves a server to another group
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a group of another server type,
    /// `AlreadyExists` for a name clash, or a backend error.
    pub fn move_server(&mut self, id: ServerId, new_group: GroupId) -> RegistryResult<()> {
        let server = self.server_ref(id)?;
        if server.parent == Some(new_group) {
            return Ok(());
        }
        let (name, server_type, remote_id) = (server.name.clone(), server.server_type, server.id);

        let target = self.group_ref(new_group)?;
        if target.server_type != server_type {
            return Err(RegistryError::InvalidArgument {
                argument: "newParent".to_string(),
                reason: format!(
                    "server group '{}' holds {} entries, not {server_type}",
                    target.name, target.server_type
                ),
            });
        }
        let target_remote_id = target.id;
        self.ensure_unique_server(new_group, &name, Some(id))?;
        let old_urn = self.server_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::move_server(remote_id, target_remote_id))?;
        }
        self.commit(true, |store| {
            store.tree.unlink_server(id);
            if let Some(server) = store.tree.servers.get_mut(&id) {
                server.parent = Some(new_group);
            }
            store.tree.link_server(new_group, id);
            Ok(())
        })?;

        self.emit(&StoreEvent::Moved {
            kind: EntityKind::RegisteredServer,
            old_urn,
            urn: self.server_urn(id)?,
        });
        Ok(())
    }

    // ========== Drop ==========

    /// Collects a group and all its descendant groups
    fn collect_descendant_groups(&self, group_id: GroupId) -> Vec<GroupId> {
        let mut result = vec![group_id];
        let mut to_process = vec![group_id];

        while let Some(current_id) = to_process.pop() {
            if let Some(group) = self.tree.groups.get(&current_id) {
                for child in &group.groups {
                    if !result.contains(child) {
                        result.push(*child);
                        to_process.push(*child);
                    }
                }
            }
        }

        result
    }

    /// Removes a group together with its descendants and their servers
    ///
    /// Returns the removed group in the `Dropped` state.
    ///
    /// # Errors
    ///
    /// Returns `ReservedGroup` for a built-in group, `NotFound` for an unknown
    /// group, or a backend error.
    pub fn drop_group(&mut self, id: GroupId) -> RegistryResult<ServerGroup> {
        let group = self.group_ref(id)?;
        if group.is_system_group() {
            return Err(RegistryError::ReservedGroup {
                name: group.name.clone(),
                action: ReservedAction::Drop,
            });
        }
        let remote_id = group.id;
        let urn = self.group_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::delete_group(remote_id))?;
        }
        let mut dropped = self.commit(true, |store| {
            let doomed = store.collect_descendant_groups(id);
            store.tree.unlink_group(id);
            store
                .tree
                .servers
                .retain(|_, s| !s.parent.is_some_and(|g| doomed.contains(&g)));
            let mut removed = None;
            for group_id in doomed {
                let group = store.tree.groups.remove(&group_id);
                if group_id == id {
                    removed = group;
                }
            }
            removed.ok_or_else(|| RegistryError::not_found(EntityKind::ServerGroup, id.to_string()))
        })?;
        dropped.state = ObjectState::Dropped;

        tracing::debug!(group = %dropped.name, "Dropped server group");
        self.emit(&StoreEvent::Dropped {
            kind: EntityKind::ServerGroup,
            urn,
        });
        Ok(dropped)
    }

    /// Removes a server
    ///
    /// Returns the removed server in the `Dropped` state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown server, or a backend error.
    pub fn drop_server(&mut self, id: ServerId) -> RegistryResult<RegisteredServer> {
        let remote_id = self.server_ref(id)?.id;
        let urn = self.server_urn(id)?;

        if let StoreBackend::Remote { catalog } = &self.backend {
            catalog.execute(&RemoteCall::delete_server(remote_id))?;
        }
        let mut dropped = self.commit(true, |store| {
            store.tree.unlink_server(id);
            store
                .tree
                .servers
                .remove(&id)
                .ok_or_else(|| RegistryError::not_found(EntityKind::RegisteredServer, id.to_string()))
        })?;
        dropped.state = ObjectState::Dropped;

        tracing::debug!(server = %dropped.name, "Dropped registered server");
        self.emit(&StoreEvent::Dropped {
            kind: EntityKind::RegisteredServer,
            urn,
        });
        Ok(dropped)
    }
}
