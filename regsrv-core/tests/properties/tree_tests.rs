//! Property-based tests for tree invariants of the store

use proptest::prelude::*;
use regsrv_core::error::RegistryError;
use regsrv_core::models::{GroupId, GroupParent, RegisteredServer, ServerGroup, ServerType};
use regsrv_core::RegisteredServersStore;
use tempfile::TempDir;

use super::test_codec;

fn create_test_store() -> (RegisteredServersStore, GroupId, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut store = RegisteredServersStore::new_local(temp_dir.path().join("RegSrvr.xml"), test_codec());
    let engine = store.database_engine_server_group().expect("engine group");
    (store, engine, temp_dir)
}

fn arb_server_type() -> impl Strategy<Value = ServerType> {
    prop::sample::select(ServerType::ALL.to_vec())
}

/// Flips the case of every other letter
fn case_variant(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i % 2 == 0 {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Creates a chain of nested groups under `root`, returning them top-down
fn create_chain(store: &mut RegisteredServersStore, root: GroupId, depth: usize) -> Vec<GroupId> {
    let mut chain = Vec::with_capacity(depth);
    let mut parent = root;
    for level in 0..depth {
        let id = store
            .create_group(GroupParent::Group(parent), ServerGroup::new(format!("level{level}")))
            .expect("create nested group");
        chain.push(id);
        parent = id;
    }
    chain
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Sibling names are unique regardless of letter case, for groups and
    /// servers alike, and a rejected create leaves the tree unchanged.
    #[test]
    fn sibling_names_are_unique(name in "[a-z][a-z0-9]{0,10}") {
        let (mut store, engine, _temp) = create_test_store();
        let group = store
            .create_group(GroupParent::Group(engine), ServerGroup::new(name.as_str()))
            .expect("first group");
        store
            .create_server(group, RegisteredServer::new(name.as_str()).with_server_name("h"))
            .expect("first server");
        let (groups, servers) = (store.group_count(), store.server_count());

        let variant = case_variant(&name);
        let group_clash = store.create_group(GroupParent::Group(engine), ServerGroup::new(variant.as_str()));
        let is_group_clash = matches!(group_clash, Err(RegistryError::AlreadyExists { .. }));
        prop_assert!(is_group_clash);
        let server_clash =
            store.create_server(group, RegisteredServer::new(variant.as_str()).with_server_name("h"));
        let is_server_clash = matches!(server_clash, Err(RegistryError::AlreadyExists { .. }));
        prop_assert!(is_server_clash);
        prop_assert_eq!((store.group_count(), store.server_count()), (groups, servers));
    }

    /// Built-in groups can be neither renamed, dropped nor moved.
    #[test]
    fn builtin_groups_are_reserved(server_type in arb_server_type(), new_name in "[a-z]{1,8}") {
        let (mut store, _engine, _temp) = create_test_store();
        let builtin = store.server_group(server_type).expect("built-in group");
        let other = store
            .create_group(GroupParent::Group(builtin), ServerGroup::new("child"))
            .expect("child group");

        let renamed = store.rename_group(builtin, &new_name);
        prop_assert!(matches!(renamed, Err(RegistryError::ReservedGroup { .. })), "expected ReservedGroup error, got {:?}", renamed);
        let dropped = store.drop_group(builtin);
        prop_assert!(matches!(dropped, Err(RegistryError::ReservedGroup { .. })), "expected ReservedGroup error, got {:?}", dropped);
        let moved = store.move_group(builtin, other);
        prop_assert!(matches!(moved, Err(RegistryError::ReservedGroup { .. })), "expected ReservedGroup error, got {:?}", moved);
        prop_assert_eq!(store.group(builtin).map(ServerGroup::name), Some(server_type.group_name()));
    }

    /// Moving a group under itself or any descendant is rejected and the
    /// hierarchy keeps its shape.
    #[test]
    fn move_under_descendant_is_rejected(depth in 2usize..8, pick in any::<prop::sample::Index>()) {
        let (mut store, engine, _temp) = create_test_store();
        let chain = create_chain(&mut store, engine, depth);
        let paths: Vec<_> = chain.iter().map(|id| store.group_path(*id)).collect();

        let target = chain[1..][pick.index(depth - 1)];
        let result = store.move_group(chain[0], target);
        let is_rejected = matches!(result, Err(RegistryError::InvalidArgument { .. }));
        prop_assert!(is_rejected);
        let after: Vec<_> = chain.iter().map(|id| store.group_path(*id)).collect();
        prop_assert_eq!(paths, after);
    }

    /// The ancestor walk of a nested group lists every group up to the root.
    #[test]
    fn ancestors_follow_the_chain(depth in 1usize..12) {
        let (mut store, engine, _temp) = create_test_store();
        let chain = create_chain(&mut store, engine, depth);
        let deepest = chain[depth - 1];

        let ancestors = store.ancestors(deepest).expect("ancestor walk");
        prop_assert_eq!(ancestors.len(), depth + 1);
        prop_assert!(ancestors.contains(&engine));
        let path = store.group_path(deepest).expect("group path");
        prop_assert_eq!(path.split('/').count(), depth + 1);
    }
}
