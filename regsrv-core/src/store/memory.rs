//! In-process remote catalog.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::remote::{procedures, CatalogGroup, CatalogServer, RemoteCall, RemoteCatalog};
use crate::error::{RegistryError, RegistryResult};
use crate::models::{Collation, NameComparer, OrdinalIgnoreCase, ServerType};

#[derive(Debug, Default)]
struct CatalogState {
    next_id: i32,
    groups: BTreeMap<i32, CatalogGroup>,
    servers: BTreeMap<i32, CatalogServer>,
    calls: Vec<RemoteCall>,
    fail_procedure: Option<&'static str>,
}

/// A [`RemoteCatalog`] held in memory
///
/// Starts with one built-in top-level group per server type and enforces
/// sibling name uniqueness under its collation, like a shared catalog does.
#[derive(Debug)]
pub struct InMemoryCatalog {
    name: String,
    collation: Arc<dyn Collation>,
    trust_server_certificate: bool,
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    /// Creates a catalog seeded with the built-in groups
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut state = CatalogState::default();
        for server_type in ServerType::ALL {
            state.next_id += 1;
            state.groups.insert(
                state.next_id,
                CatalogGroup {
                    id: state.next_id,
                    parent_id: None,
                    name: server_type.group_name().to_string(),
                    description: String::new(),
                    server_type: server_type.catalog_code(),
                },
            );
        }
        Self {
            name: name.into(),
            collation: Arc::new(OrdinalIgnoreCase),
            trust_server_certificate: false,
            state: Mutex::new(state),
        }
    }

    /// Uses a custom name collation
    #[must_use]
    pub fn with_collation(mut self, collation: Arc<dyn Collation>) -> Self {
        self.collation = collation;
        self
    }

    /// Sets the trust-server-certificate flag of the catalog connection
    #[must_use]
    pub const fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Makes every later call to `procedure` fail
    pub fn fail_procedure(&self, procedure: Option<&'static str>) {
        self.lock().fail_procedure = procedure;
    }

    /// Returns the calls executed so far
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn comparer(&self) -> NameComparer {
        NameComparer::new(Arc::clone(&self.collation))
    }
}

fn int_arg(call: &RemoteCall, name: &str) -> RegistryResult<i32> {
    call.arg(name)
        .and_then(|v| v.as_int())
        .ok_or_else(|| RegistryError::Remote(format!("{}: missing @{name}", call.procedure)))
}

fn text_arg(call: &RemoteCall, name: &str) -> RegistryResult<String> {
    call.arg(name)
        .and_then(|v| v.as_text())
        .map(str::to_string)
        .ok_or_else(|| RegistryError::Remote(format!("{}: missing @{name}", call.procedure)))
}

impl CatalogState {
    fn group_name_taken(&self, comparer: &NameComparer, parent: i32, name: &str, except: i32) -> bool {
        self.groups.values().any(|g| {
            g.id != except && g.parent_id == Some(parent) && comparer.same_name(&g.name, name)
        })
    }

    fn server_name_taken(&self, comparer: &NameComparer, group: i32, name: &str, except: i32) -> bool {
        self.servers.values().any(|s| {
            s.id != except && s.group_id == group && comparer.same_name(&s.name, name)
        })
    }

    fn require_group(&self, procedure: &str, id: i32) -> RegistryResult<&CatalogGroup> {
        self.groups
            .get(&id)
            .ok_or_else(|| RegistryError::Remote(format!("{procedure}: group {id} does not exist")))
    }

    fn delete_group_tree(&mut self, id: i32) {
        let children: Vec<i32> = self
            .groups
            .values()
            .filter(|g| g.parent_id == Some(id))
            .map(|g| g.id)
            .collect();
        for child in children {
            self.delete_group_tree(child);
        }
        self.servers.retain(|_, s| s.group_id != id);
        self.groups.remove(&id);
    }

    fn is_descendant(&self, candidate: i32, ancestor: i32) -> bool {
        let mut current = Some(candidate);
        let mut hops = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.groups.len() {
                return false;
            }
            current = self.groups.get(&id).and_then(|g| g.parent_id);
        }
        false
    }
}

impl RemoteCatalog for InMemoryCatalog {
    fn execute(&self, call: &RemoteCall) -> RegistryResult<Option<i32>> {
        let comparer = self.comparer();
        let mut state = self.lock();
        if state.fail_procedure == Some(call.procedure) {
            return Err(RegistryError::Remote(format!("{} failed", call.procedure)));
        }
        state.calls.push(call.clone());

        match call.procedure {
            procedures::ADD_GROUP => {
                let parent = int_arg(call, "parent_id")?;
                let name = text_arg(call, "name")?;
                state.require_group(call.procedure, parent)?;
                if state.group_name_taken(&comparer, parent, &name, 0) {
                    return Err(RegistryError::Remote(format!(
                        "a server group named '{name}' already exists"
                    )));
                }
                state.next_id += 1;
                let id = state.next_id;
                state.groups.insert(
                    id,
                    CatalogGroup {
                        id,
                        parent_id: Some(parent),
                        name,
                        description: text_arg(call, "description")?,
                        server_type: int_arg(call, "server_type")?,
                    },
                );
                Ok(Some(id))
            }
            procedures::UPDATE_GROUP => {
                let id = int_arg(call, "server_group_id")?;
                let description = text_arg(call, "description")?;
                state.require_group(call.procedure, id)?;
                if let Some(group) = state.groups.get_mut(&id) {
                    group.description = description;
                }
                Ok(None)
            }
            procedures::DELETE_GROUP => {
                let id = int_arg(call, "server_group_id")?;
                state.require_group(call.procedure, id)?;
                state.delete_group_tree(id);
                Ok(None)
            }
            procedures::RENAME_GROUP => {
                let id = int_arg(call, "server_group_id")?;
                let new_name = text_arg(call, "new_name")?;
                let parent = state.require_group(call.procedure, id)?.parent_id;
                if let Some(parent) = parent {
                    if state.group_name_taken(&comparer, parent, &new_name, id) {
                        return Err(RegistryError::Remote(format!(
                            "a server group named '{new_name}' already exists"
                        )));
                    }
                }
                if let Some(group) = state.groups.get_mut(&id) {
                    group.name = new_name;
                }
                Ok(None)
            }
            procedures::MOVE_GROUP => {
                let id = int_arg(call, "server_group_id")?;
                let new_parent = int_arg(call, "new_parent_id")?;
                let name = state.require_group(call.procedure, id)?.name.clone();
                state.require_group(call.procedure, new_parent)?;
                if state.is_descendant(new_parent, id) {
                    return Err(RegistryError::Remote(format!(
                        "cannot move group {id} under its own descendant"
                    )));
                }
                if state.group_name_taken(&comparer, new_parent, &name, id) {
                    return Err(RegistryError::Remote(format!(
                        "a server group named '{name}' already exists"
                    )));
                }
                if let Some(group) = state.groups.get_mut(&id) {
                    group.parent_id = Some(new_parent);
                }
                Ok(None)
            }
            procedures::ADD_SERVER => {
                let group = int_arg(call, "server_group_id")?;
                let name = text_arg(call, "name")?;
                state.require_group(call.procedure, group)?;
                if state.server_name_taken(&comparer, group, &name, 0) {
                    return Err(RegistryError::Remote(format!(
                        "a registered server named '{name}' already exists"
                    )));
                }
                state.next_id += 1;
                let id = state.next_id;
                state.servers.insert(
                    id,
                    CatalogServer {
                        id,
                        group_id: group,
                        name,
                        server_name: text_arg(call, "server_name")?,
                        description: text_arg(call, "description")?,
                        server_type: int_arg(call, "server_type")?,
                    },
                );
                Ok(Some(id))
            }
            procedures::UPDATE_SERVER => {
                let id = int_arg(call, "server_id")?;
                let server_name = text_arg(call, "server_name")?;
                let description = text_arg(call, "description")?;
                let server = state.servers.get_mut(&id).ok_or_else(|| {
                    RegistryError::Remote(format!("{}: server {id} does not exist", call.procedure))
                })?;
                server.server_name = server_name;
                server.description = description;
                Ok(None)
            }
            procedures::DELETE_SERVER => {
                let id = int_arg(call, "server_id")?;
                state.servers.remove(&id).ok_or_else(|| {
                    RegistryError::Remote(format!("{}: server {id} does not exist", call.procedure))
                })?;
                Ok(None)
            }
            procedures::RENAME_SERVER => {
                let id = int_arg(call, "server_id")?;
                let new_name = text_arg(call, "new_name")?;
                let group = state
                    .servers
                    .get(&id)
                    .map(|s| s.group_id)
                    .ok_or_else(|| {
                        RegistryError::Remote(format!("{}: server {id} does not exist", call.procedure))
                    })?;
                if state.server_name_taken(&comparer, group, &new_name, id) {
                    return Err(RegistryError::Remote(format!(
                        "a registered server named '{new_name}' already exists"
                    )));
                }
                if let Some(server) = state.servers.get_mut(&id) {
                    server.name = new_name;
                }
                Ok(None)
            }
            procedures::MOVE_SERVER => {
                let id = int_arg(call, "server_id")?;
                let new_parent = int_arg(call, "new_parent_id")?;
                state.require_group(call.procedure, new_parent)?;
                let name = state
                    .servers
                    .get(&id)
                    .map(|s| s.name.clone())
                    .ok_or_else(|| {
                        RegistryError::Remote(format!("{}: server {id} does not exist", call.procedure))
                    })?;
                if state.server_name_taken(&comparer, new_parent, &name, id) {
                    return Err(RegistryError::Remote(format!(
                        "a registered server named '{name}' already exists"
                    )));
                }
                if let Some(server) = state.servers.get_mut(&id) {
                    server.group_id = new_parent;
                }
                Ok(None)
            }
            other => Err(RegistryError::Remote(format!("unknown procedure '{other}'"))),
        }
    }

    fn enumerate_groups(&self) -> RegistryResult<Vec<CatalogGroup>> {
        Ok(self.lock().groups.values().cloned().collect())
    }

    fn enumerate_servers(&self) -> RegistryResult<Vec<CatalogServer>> {
        Ok(self.lock().servers.values().cloned().collect())
    }

    fn collation(&self) -> Arc<dyn Collation> {
        Arc::clone(&self.collation)
    }

    fn trust_server_certificate(&self) -> bool {
        self.trust_server_certificate
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}
