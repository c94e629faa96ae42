//! End-to-end scenarios for local stores
//!
//! Each test starts from an empty temporary directory and checks the state
//! read back from disk.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use regsrv_core::connection_string::ConnectionStringBuilder;
use regsrv_core::document::{write_document, Document};
use regsrv_core::import::{
    import_file, migrate_legacy_file, DuplicateAction, DuplicateDecision, DuplicateFound,
};
use regsrv_core::models::{CredentialPersistenceType, GroupParent, RegisteredServer, ServerGroup};
use regsrv_core::{EntityKind, RegisteredServersStore, StoreEvent};
use secrecy::ExposeSecret;
use tempfile::TempDir;

use super::test_codec;

// ============================================================================
// Scenario A: create and reload
// ============================================================================

#[test]
fn test_created_server_reloads_without_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("RegSrvr.xml");

    let mut store = RegisteredServersStore::new_local(&path, test_codec());
    let engine = store.database_engine_server_group().unwrap();
    let g1 = store
        .create_group(GroupParent::Group(engine), ServerGroup::new("G1"))
        .unwrap();
    let server = RegisteredServer::new("S1")
        .with_connection_string("server=host1;trusted_connection=true")
        .with_credential_persistence_type(CredentialPersistenceType::None);
    store.create_server(g1, server).unwrap();

    let reloaded = RegisteredServersStore::open_local(&path, test_codec()).unwrap();
    let s1 = reloaded
        .resolve_server_path("DatabaseEngineServerGroup/G1/S1")
        .expect("S1 should be reloaded");
    let server = reloaded.server(s1).unwrap();
    assert_eq!(server.server_name(), "host1");
    assert_eq!(server.credential_persistence_type(), CredentialPersistenceType::None);

    let effective = reloaded.connection_string(s1).unwrap().unwrap();
    let builder = ConnectionStringBuilder::parse(effective.expose_secret()).unwrap();
    assert_eq!(builder.server_name(), Some("host1"));
    assert!(!builder.has_password());
    assert!(builder.get("user id").is_none());
    assert_eq!(builder.get("trusted_connection"), Some("true"));
}

// ============================================================================
// Scenario B: import with overwrite
// ============================================================================

#[test]
fn test_import_overwrites_duplicate_server() {
    let temp_dir = TempDir::new().unwrap();
    let mut store =
        RegisteredServersStore::new_local(temp_dir.path().join("RegSrvr.xml"), test_codec());
    let engine = store.database_engine_server_group().unwrap();
    let g1 = store
        .create_group(GroupParent::Group(engine), ServerGroup::new("G1"))
        .unwrap();
    store
        .create_server(g1, RegisteredServer::new("S2").with_server_name("old-host"))
        .unwrap();

    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    store.subscribe(move |event| {
        if matches!(event, StoreEvent::Created { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let import_path = temp_dir.path().join("s2.regsrvr");
    let imported = RegisteredServer::new("S2")
        .with_server_name("new-host")
        .with_description("imported");
    fs::write(&import_path, write_document(&Document::Server(imported)).unwrap()).unwrap();

    let mut asked = Vec::new();
    let mut resolver = |conflict: &DuplicateFound| {
        asked.push(conflict.clone());
        DuplicateDecision::once(DuplicateAction::Overwrite)
    };
    let outcome = import_file(&mut store, g1, &import_path, &mut resolver).unwrap();

    assert!(!outcome.is_cancelled());
    assert_eq!(outcome.summary().servers_overwritten, 1);
    assert_eq!(asked.len(), 1);
    assert_eq!(asked[0].kind, EntityKind::RegisteredServer);

    let servers = store.servers_in(g1);
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name(), "S2");
    assert_eq!(servers[0].server_name(), "new-host");
    assert_eq!(servers[0].description, "imported");
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Scenario C: legacy migration
// ============================================================================

const LEGACY_DOCUMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<RegisteredServers>
  <ServerType id="8c91a03d-f9b4-46c0-a305-b5dcc79ff907" name="Database Engine">
    <Group name="Legacy1" description="">
      <Server name="Old1" description="">
        <ConnectionInformation>
          <ServerType>8c91a03d-f9b4-46c0-a305-b5dcc79ff907</ServerType>
          <ServerName>Old1</ServerName>
          <AuthenticationType>0</AuthenticationType>
          <UserName></UserName>
          <AdvancedOptions />
        </ConnectionInformation>
      </Server>
    </Group>
  </ServerType>
</RegisteredServers>"#;

#[test]
fn test_legacy_migration_creates_integrated_server() {
    let temp_dir = TempDir::new().unwrap();
    let store_path = temp_dir.path().join("RegSrvr.xml");
    let legacy_path = temp_dir.path().join("legacy.xml");
    fs::write(&legacy_path, LEGACY_DOCUMENT).unwrap();

    let mut store = RegisteredServersStore::new_local(&store_path, test_codec());
    let report = migrate_legacy_file(&mut store, &legacy_path).unwrap();
    assert_eq!(report.groups_created, 1);
    assert_eq!(report.servers_created, 1);

    let reloaded = RegisteredServersStore::open_local(&store_path, test_codec()).unwrap();
    let engine = reloaded
        .find_server_group(regsrv_core::ServerType::DatabaseEngine)
        .unwrap();
    let legacy1 = reloaded
        .find_child_group(GroupParent::Group(engine), "Legacy1")
        .expect("Legacy1 should exist under the engine group");
    let old1 = reloaded.find_server(legacy1, "Old1").expect("Old1 should exist");
    let server = reloaded.server(old1).unwrap();
    assert_eq!(
        server.credential_persistence_type(),
        CredentialPersistenceType::PersistLoginNameAndPassword
    );

    let effective = reloaded.connection_string(old1).unwrap().unwrap();
    let builder = ConnectionStringBuilder::parse(effective.expose_secret()).unwrap();
    assert_eq!(builder.server_name(), Some("Old1"));
    assert_eq!(builder.get("integrated security"), Some("true"));
    assert!(!builder.has_password());
}

#[test]
fn test_malformed_legacy_document_names_element() {
    let temp_dir = TempDir::new().unwrap();
    let legacy_path = temp_dir.path().join("legacy.xml");
    fs::write(
        &legacy_path,
        LEGACY_DOCUMENT.replace("<ConnectionInformation>", "<Connection>").replace(
            "</ConnectionInformation>",
            "</Connection>",
        ),
    )
    .unwrap();

    let mut store =
        RegisteredServersStore::new_local(temp_dir.path().join("RegSrvr.xml"), test_codec());
    let err = migrate_legacy_file(&mut store, &legacy_path).unwrap_err();
    assert!(matches!(
        err,
        regsrv_core::RegistryError::LegacyFormat { ref element, .. } if element == "Connection"
    ));
    assert_eq!(store.server_count(), 0);
}
