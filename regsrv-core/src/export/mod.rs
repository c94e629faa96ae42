//! Export of groups and servers to standalone documents.
//!
//! An export document uses the store schema rooted at the exported group or
//! server. While it is written, every contained server is persisted under the
//! caller's credential policy instead of its own, except that a server which
//! only keeps its login name is never upgraded to keep its password.

use std::fs;
use std::path::Path;

use crate::connection_string::apply_persistence;
use crate::document::{write_document, Document, GroupNode};
use crate::error::{EntityKind, Operation, RegistryError, RegistryResult};
use crate::models::{CredentialPersistenceType, GroupId, RegisteredServer, ServerId};
use crate::secret::CredentialCodec;
use crate::store::RegisteredServersStore;

/// Counts of entities written by an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Groups written, including the exported group itself
    pub groups: usize,
    /// Servers written
    pub servers: usize,
}

impl ExportSummary {
    /// Returns a summary string of the export
    #[must_use]
    pub fn summary(&self) -> String {
        format!("Exported: {} group(s), {} server(s)", self.groups, self.servers)
    }
}

/// Exports a group subtree to `destination`
///
/// # Errors
///
/// Returns `OperationFailed` (Export) wrapping the cause; out-of-memory crypto
/// failures propagate unwrapped.
pub fn export_group(
    store: &mut RegisteredServersStore,
    group: GroupId,
    destination: &Path,
    policy: CredentialPersistenceType,
) -> RegistryResult<ExportSummary> {
    with_override(store, policy, |store| {
        let mut node = store.snapshot_group(group)?;
        project_node(store, &mut node)?;
        let (groups, servers) = node.count();
        write_export(&Document::Group(node), destination)?;
        Ok(ExportSummary { groups, servers })
    })
    .map_err(|e| e.into_operation_failure(Operation::Export))
}

/// Exports a single server to `destination`
///
/// # Errors
///
/// Returns `OperationFailed` (Export) wrapping the cause; out-of-memory crypto
/// failures propagate unwrapped.
pub fn export_server(
    store: &mut RegisteredServersStore,
    server: ServerId,
    destination: &Path,
    policy: CredentialPersistenceType,
) -> RegistryResult<ExportSummary> {
    with_override(store, policy, |store| {
        let source = store.server(server).ok_or_else(|| {
            RegistryError::not_found(EntityKind::RegisteredServer, server.to_string())
        })?;
        let shared = store.shared_connection_string(source);
        let effective = store.effective_persistence(source);
        let projected = project_server(source, shared.as_deref(), store.codec(), effective)?;
        write_export(&Document::Server(projected), destination)?;
        Ok(ExportSummary {
            groups: 0,
            servers: 1,
        })
    })
    .map_err(|e| e.into_operation_failure(Operation::Export))
}

/// Exports a server that does not belong to any store
///
/// # Errors
///
/// Returns `OperationFailed` (Export) wrapping the cause; out-of-memory crypto
/// failures propagate unwrapped.
pub fn export_server_entity(
    server: &RegisteredServer,
    codec: &CredentialCodec,
    destination: &Path,
    policy: CredentialPersistenceType,
) -> RegistryResult<()> {
    let effective =
        CredentialPersistenceType::effective_for_export(server.credential_persistence_type(), policy);
    project_server(server, None, codec, effective)
        .and_then(|projected| write_export(&Document::Server(projected), destination))
        .map_err(|e| e.into_operation_failure(Operation::Export))
}

/// Runs `export` with the store's credential override set, restoring it afterward
fn with_override<T>(
    store: &mut RegisteredServersStore,
    policy: CredentialPersistenceType,
    export: impl FnOnce(&RegisteredServersStore) -> RegistryResult<T>,
) -> RegistryResult<T> {
    let previous = store.credential_persistence_override();
    store.set_credential_persistence_override(Some(policy));
    let result = export(store);
    store.set_credential_persistence_override(previous);
    result
}

fn project_node(store: &RegisteredServersStore, node: &mut GroupNode) -> RegistryResult<()> {
    for server in &mut node.servers {
        let shared = store.shared_connection_string(server);
        let effective = store.effective_persistence(server);
        *server = project_server(server, shared.as_deref(), store.codec(), effective)?;
    }
    for child in &mut node.groups {
        project_node(store, child)?;
    }
    Ok(())
}

/// Copies a server with its persisted form computed under `effective`
fn project_server(
    server: &RegisteredServer,
    shared: Option<&str>,
    codec: &CredentialCodec,
    effective: CredentialPersistenceType,
) -> RegistryResult<RegisteredServer> {
    let mut projected = server.clone();
    projected.encrypted_connection_string = match server.project(effective, codec)? {
        Some(text) => Some(text),
        None => shared
            .map(|text| apply_persistence(text, effective, codec))
            .transpose()?,
    };
    projected.credential_persistence_type = effective;
    projected.connection_string = None;
    projected.projection_stale = false;
    Ok(projected)
}

/// Writes the document, removing a partially written file on failure
fn write_export(document: &Document, destination: &Path) -> RegistryResult<()> {
    let xml = write_document(document)?;
    if let Err(e) = fs::write(destination, xml) {
        if destination.exists() {
            if let Err(cleanup) = fs::remove_file(destination) {
                tracing::warn!(
                    path = %destination.display(),
                    error = %cleanup,
                    "Failed to remove partial export file"
                );
            }
        }
        return Err(e.into());
    }
    tracing::info!(path = %destination.display(), "Exported registered servers");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_document;
    use crate::models::{GroupParent, ServerGroup};
    use crate::secret::MachineProtector;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_codec() -> CredentialCodec {
        CredentialCodec::new(Arc::new(MachineProtector::with_secret(b"export-tests").unwrap()))
    }

    fn store_with_server(
        policy: CredentialPersistenceType,
    ) -> (RegisteredServersStore, GroupId, ServerId, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut store = RegisteredServersStore::new_local(temp_dir.path().join("RegSrvr.xml"), test_codec());
        let engine = store.database_engine_server_group().unwrap();
        let g1 = store
            .create_group(GroupParent::Group(engine), ServerGroup::new("G1"))
            .unwrap();
        let server = RegisteredServer::new("S1")
            .with_connection_string("server=h;user id=sa;password=pw")
            .with_credential_persistence_type(policy);
        let s1 = store.create_server(g1, server).unwrap();
        (store, g1, s1, temp_dir)
    }

    fn read_server(path: &Path) -> RegisteredServer {
        match parse_document(&fs::read_to_string(path).unwrap()).unwrap() {
            Document::Server(server) => server,
            Document::Group(node) => node.servers[0].clone(),
            Document::Store(_) => panic!("unexpected store document"),
        }
    }

    #[test]
    fn test_export_group_applies_override() {
        let (mut store, g1, _, temp) = store_with_server(CredentialPersistenceType::PersistLoginNameAndPassword);
        let path = temp.path().join("g1.regsrvr");
        let summary = export_group(&mut store, g1, &path, CredentialPersistenceType::None).unwrap();
        assert_eq!(summary, ExportSummary { groups: 1, servers: 1 });

        let exported = read_server(&path);
        assert_eq!(exported.credential_persistence_type(), CredentialPersistenceType::None);
        assert_eq!(exported.connection_string_with_encrypted_password(), Some("server=h"));
        assert_eq!(store.credential_persistence_override(), None);
    }

    #[test]
    fn test_projection_follows_store_override() {
        let (mut store, _, s1, _temp) =
            store_with_server(CredentialPersistenceType::PersistLoginNameAndPassword);
        let server = store.server(s1).unwrap().clone();
        assert_eq!(
            store.effective_persistence(&server),
            CredentialPersistenceType::PersistLoginNameAndPassword
        );
        store.set_credential_persistence_override(Some(CredentialPersistenceType::PersistLoginName));
        assert_eq!(
            store.effective_persistence(&server),
            CredentialPersistenceType::PersistLoginName
        );
    }

    #[test]
    fn test_export_restores_session_override() {
        let (mut store, g1, _, temp) =
            store_with_server(CredentialPersistenceType::PersistLoginNameAndPassword);
        store.set_credential_persistence_override(Some(CredentialPersistenceType::PersistLoginName));
        let path = temp.path().join("g1.regsrvr");
        export_group(&mut store, g1, &path, CredentialPersistenceType::None).unwrap();

        let exported = read_server(&path);
        assert_eq!(exported.credential_persistence_type(), CredentialPersistenceType::None);
        assert_eq!(
            store.credential_persistence_override(),
            Some(CredentialPersistenceType::PersistLoginName)
        );
    }

    #[test]
    fn test_login_only_server_is_never_upgraded() {
        let (mut store, _, s1, temp) = store_with_server(CredentialPersistenceType::PersistLoginName);
        let path = temp.path().join("s1.regsrvr");
        export_server(
            &mut store,
            s1,
            &path,
            CredentialPersistenceType::PersistLoginNameAndPassword,
        )
        .unwrap();

        let exported = read_server(&path);
        assert_eq!(
            exported.credential_persistence_type(),
            CredentialPersistenceType::PersistLoginName
        );
        assert_eq!(
            exported.connection_string_with_encrypted_password(),
            Some("server=h;user id=sa")
        );
    }

    #[test]
    fn test_failed_export_is_wrapped_and_override_restored() {
        let (mut store, g1, _, temp) = store_with_server(CredentialPersistenceType::None);
        let path = temp.path().join("missing-dir").join("out.regsrvr");
        let err = export_group(&mut store, g1, &path, CredentialPersistenceType::None).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::OperationFailed {
                operation: Operation::Export,
                ..
            }
        ));
        assert!(!path.exists());
        assert_eq!(store.credential_persistence_override(), None);
    }
}
