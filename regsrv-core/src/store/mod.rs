//! Store tree and its backends
//!
//! This module provides the `RegisteredServersStore`, the remote catalog
//! surface it talks to for shared stores, and the change notifications it
//! raises.

mod events;
mod manager;
mod memory;
mod remote;

pub use events::{StoreEvent, StoreListener};
pub use manager::{RegisteredServersStore, StoreBackend, MAX_TREE_DEPTH};
pub use memory::InMemoryCatalog;
pub use remote::{procedures, CatalogGroup, CatalogServer, RemoteCall, RemoteCatalog, RemoteValue};
