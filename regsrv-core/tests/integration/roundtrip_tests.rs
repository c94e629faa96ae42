//! Export/import round-trips between local stores and shared catalogs

use std::sync::Arc;

use regsrv_core::connection_string::ConnectionStringBuilder;
use regsrv_core::export::{export_group, export_server};
use regsrv_core::import::{import_file, DuplicateDecision, DuplicateFound};
use regsrv_core::models::{
    CredentialPersistenceType, GroupId, GroupParent, RegisteredServer, ServerGroup,
};
use regsrv_core::store::procedures;
use regsrv_core::{InMemoryCatalog, RegisteredServersStore};
use secrecy::ExposeSecret;
use tempfile::TempDir;

use super::test_codec;

const PASSWORD: &str = "Pa;ss'w\"rd";

fn sql_login() -> String {
    let mut builder = ConnectionStringBuilder::new();
    builder.set("server", "db1");
    builder.set("user id", "app");
    builder.set("password", PASSWORD);
    builder.to_string()
}

fn no_conflicts(conflict: &DuplicateFound) -> DuplicateDecision {
    panic!("unexpected conflict for {}", conflict.name);
}

/// Builds `Prod` with one SQL-login server and a nested `Reporting` group
fn populated_store(temp_dir: &TempDir) -> (RegisteredServersStore, GroupId) {
    let mut store =
        RegisteredServersStore::new_local(temp_dir.path().join("source.xml"), test_codec());
    let engine = store.database_engine_server_group().unwrap();
    let prod = store
        .create_group(
            GroupParent::Group(engine),
            ServerGroup::new("Prod").with_description("production"),
        )
        .unwrap();
    let server = RegisteredServer::new("Primary")
        .with_connection_string(&sql_login())
        .with_credential_persistence_type(CredentialPersistenceType::PersistLoginNameAndPassword);
    store.create_server(prod, server).unwrap();
    let reporting = store
        .create_group(GroupParent::Group(prod), ServerGroup::new("Reporting"))
        .unwrap();
    store
        .create_server(reporting, RegisteredServer::new("Replica").with_server_name("db2"))
        .unwrap();
    (store, prod)
}

#[test]
fn test_export_import_keeps_passwords_when_requested() {
    let temp_dir = TempDir::new().unwrap();
    let (mut source, prod) = populated_store(&temp_dir);
    let export_path = temp_dir.path().join("prod.regsrvr");
    let summary = export_group(
        &mut source,
        prod,
        &export_path,
        CredentialPersistenceType::PersistLoginNameAndPassword,
    )
    .unwrap();
    assert_eq!((summary.groups, summary.servers), (2, 2));

    let exported = std::fs::read_to_string(&export_path).unwrap();
    assert!(!exported.contains("Pa;ss"));

    let mut target =
        RegisteredServersStore::new_local(temp_dir.path().join("target.xml"), test_codec());
    let engine = target.database_engine_server_group().unwrap();
    let outcome = import_file(&mut target, engine, &export_path, &mut no_conflicts).unwrap();
    assert_eq!(outcome.summary().groups_created, 2);

    let primary = target
        .resolve_server_path("DatabaseEngineServerGroup/Prod/Primary")
        .unwrap();
    let effective = target.connection_string(primary).unwrap().unwrap();
    let builder = ConnectionStringBuilder::parse(effective.expose_secret()).unwrap();
    assert_eq!(builder.get("user id"), Some("app"));
    assert_eq!(builder.get("password"), Some(PASSWORD));
    assert!(target
        .resolve_server_path("DatabaseEngineServerGroup/Prod/Reporting/Replica")
        .is_some());
}

#[test]
fn test_export_without_credentials_strips_login() {
    let temp_dir = TempDir::new().unwrap();
    let (mut source, prod) = populated_store(&temp_dir);
    let primary = source.find_server(prod, "Primary").unwrap();
    let export_path = temp_dir.path().join("primary.regsrvr");
    export_server(&mut source, primary, &export_path, CredentialPersistenceType::None).unwrap();

    let mut target =
        RegisteredServersStore::new_local(temp_dir.path().join("target.xml"), test_codec());
    let engine = target.database_engine_server_group().unwrap();
    import_file(&mut target, engine, &export_path, &mut no_conflicts).unwrap();

    let imported = target.find_server(engine, "Primary").unwrap();
    let effective = target.connection_string(imported).unwrap().unwrap();
    let builder = ConnectionStringBuilder::parse(effective.expose_secret()).unwrap();
    assert_eq!(builder.server_name(), Some("db1"));
    assert!(builder.get("user id").is_none());
    assert!(!builder.has_password());

    // The source keeps its own policy and password
    let source_cs = source.connection_string(primary).unwrap().unwrap();
    assert!(ConnectionStringBuilder::parse(source_cs.expose_secret())
        .unwrap()
        .has_password());
}

#[test]
fn test_import_into_shared_catalog_strips_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let (mut source, prod) = populated_store(&temp_dir);
    let export_path = temp_dir.path().join("prod.regsrvr");
    export_group(
        &mut source,
        prod,
        &export_path,
        CredentialPersistenceType::PersistLoginNameAndPassword,
    )
    .unwrap();

    let catalog = Arc::new(InMemoryCatalog::new("cms01").with_trust_server_certificate(true));
    let mut shared = RegisteredServersStore::open_remote(catalog.clone(), test_codec()).unwrap();
    let engine = shared.database_engine_server_group().unwrap();
    import_file(&mut shared, engine, &export_path, &mut no_conflicts).unwrap();

    let creates = catalog
        .calls()
        .iter()
        .filter(|call| call.procedure == procedures::ADD_SERVER)
        .count();
    assert_eq!(creates, 2);

    // A fresh mirror of the catalog sees the same tree
    let mirror = RegisteredServersStore::open_remote(catalog, test_codec()).unwrap();
    let primary = mirror
        .resolve_server_path("DatabaseEngineServerGroup/Prod/Primary")
        .unwrap();
    let effective = mirror.connection_string(primary).unwrap().unwrap();
    let builder = ConnectionStringBuilder::parse(effective.expose_secret()).unwrap();
    assert_eq!(builder.server_name(), Some("db1"));
    assert_eq!(builder.get("integrated security"), Some("true"));
    assert_eq!(builder.get("trust server certificate"), Some("true"));
    assert!(!builder.has_password());
}
