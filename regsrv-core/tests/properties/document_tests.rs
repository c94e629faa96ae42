//! Property-based tests for the store document format

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use regsrv_core::document::{parse_document, write_document, Document, GroupNode};
use regsrv_core::models::{CredentialPersistenceType, GroupParent, RegisteredServer, ServerGroup};
use regsrv_core::RegisteredServersStore;
use tempfile::TempDir;

use super::test_codec;

// Names include quotes and markup characters to exercise escaping
fn arb_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 _.'\"<>&-]{0,15}".prop_map(|s| s)
}

fn arb_text() -> impl Strategy<Value = String> {
    "[ -~]{0,30}"
}

fn arb_host() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,10}(\\\\[A-Z]{1,8})?"
}

fn arb_policy() -> impl Strategy<Value = CredentialPersistenceType> {
    prop_oneof![
        Just(CredentialPersistenceType::None),
        Just(CredentialPersistenceType::PersistLoginName),
        Just(CredentialPersistenceType::PersistLoginNameAndPassword),
    ]
}

fn arb_server() -> impl Strategy<Value = RegisteredServer> {
    (arb_name(), arb_host(), arb_text(), arb_policy(), any::<bool>(), any::<i32>()).prop_map(
        |(name, host, description, policy, use_color, argb)| {
            let mut server = RegisteredServer::new(name)
                .with_server_name(&host)
                .with_description(description)
                .with_credential_persistence_type(policy);
            server.use_custom_connection_color = use_color;
            server.custom_connection_color_argb = argb;
            server
        },
    )
}

fn arb_node() -> impl Strategy<Value = GroupNode> {
    let leaf = (arb_name(), arb_text(), prop::collection::vec(arb_server(), 0..3)).prop_map(
        |(name, description, servers)| {
            let mut node = GroupNode::new(ServerGroup::new(name).with_description(description));
            node.servers = servers;
            node
        },
    );
    leaf.prop_recursive(3, 24, 3, |inner| {
        (
            arb_name(),
            arb_text(),
            prop::collection::vec(arb_server(), 0..3),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(name, description, servers, groups)| {
                let mut node = GroupNode::new(ServerGroup::new(name).with_description(description));
                node.servers = servers;
                node.groups = groups;
                node
            })
    })
}

fn assert_same_node(expected: &GroupNode, actual: &GroupNode) -> Result<(), TestCaseError> {
    prop_assert_eq!(expected.group.name(), actual.group.name());
    prop_assert_eq!(&expected.group.description, &actual.group.description);
    prop_assert_eq!(expected.servers.len(), actual.servers.len());
    for (a, b) in expected.servers.iter().zip(&actual.servers) {
        prop_assert_eq!(a.name(), b.name());
        prop_assert_eq!(a.server_name(), b.server_name());
        prop_assert_eq!(&a.description, &b.description);
        prop_assert_eq!(a.credential_persistence_type(), b.credential_persistence_type());
        prop_assert_eq!(a.use_custom_connection_color, b.use_custom_connection_color);
        prop_assert_eq!(a.custom_connection_color_argb, b.custom_connection_color_argb);
    }
    prop_assert_eq!(expected.groups.len(), actual.groups.len());
    for (a, b) in expected.groups.iter().zip(&actual.groups) {
        assert_same_node(a, b)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Writing a group document and parsing it back preserves every
    /// group and server in document order.
    #[test]
    fn group_document_round_trip(node in arb_node()) {
        let xml = write_document(&Document::Group(node.clone())).expect("write document");
        let parsed = parse_document(&xml).expect("parse document");
        let Document::Group(parsed) = parsed else {
            return Err(TestCaseError::fail("expected a group document"));
        };
        assert_same_node(&node, &parsed)?;
    }

    /// A single server document keeps its properties.
    #[test]
    fn server_document_round_trip(server in arb_server()) {
        let xml = write_document(&Document::Server(server.clone())).expect("write document");
        let Document::Server(parsed) = parse_document(&xml).expect("parse document") else {
            return Err(TestCaseError::fail("expected a server document"));
        };
        prop_assert_eq!(server.name(), parsed.name());
        prop_assert_eq!(server.server_name(), parsed.server_name());
        prop_assert_eq!(&server.description, &parsed.description);
    }

    /// Groups and servers created in a local store are found at the same
    /// paths after the file is read again.
    #[test]
    fn local_store_round_trip(
        names in prop::collection::hash_set("[a-z][a-z0-9]{0,8}", 1..6),
        host in arb_host(),
    ) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("RegSrvr.xml");
        let mut store = RegisteredServersStore::new_local(&path, test_codec());
        let engine = store.database_engine_server_group().expect("engine group");
        for name in &names {
            let group = store
                .create_group(GroupParent::Group(engine), ServerGroup::new(name.as_str()))
                .expect("create group");
            store
                .create_server(group, RegisteredServer::new("srv").with_server_name(&host))
                .expect("create server");
        }

        let reopened = RegisteredServersStore::open_local(&path, test_codec()).expect("reopen store");
        prop_assert_eq!(reopened.group_count(), names.len() + 1);
        prop_assert_eq!(reopened.server_count(), names.len());
        for name in &names {
            let server = reopened
                .resolve_server_path(&format!("DatabaseEngineServerGroup/{name}/srv"))
                .and_then(|id| reopened.server(id));
            prop_assert!(server.is_some(), "server under {} should survive", name);
            prop_assert_eq!(server.map(RegisteredServer::server_name), Some(host.as_str()));
        }
    }
}
