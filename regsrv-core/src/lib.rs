//! Registered servers core library
//!
//! This crate manages a tree of registered servers: server groups and server
//! registrations kept either in a local XML file or in a shared remote
//! catalog. It protects saved passwords, imports and exports subtrees as
//! standalone documents, and migrates legacy registration files.

pub mod config;
pub mod connection_string;
pub mod context;
pub mod document;
pub mod error;
pub mod export;
pub mod import;
pub mod models;
pub mod secret;
pub mod store;

pub use config::{ConfigManager, RegistrySettings, StorePaths};
pub use connection_string::ConnectionStringBuilder;
pub use context::{SharedStore, StoreContext};
pub use document::{Document, GroupNode};
pub use error::{
    ConfigError, ConfigResult, CryptoError, CryptoResult, EntityKind, Operation, RegistryError,
    RegistryResult,
};
pub use export::{export_group, export_server, ExportSummary};
pub use import::{
    import_document, import_file, migrate_legacy_file, DuplicateAction, DuplicateDecision,
    DuplicateFound, DuplicateResolver, ImportOutcome, ImportSummary, MigrationReport,
};
pub use models::{
    CredentialPersistenceType, GroupId, GroupParent, RegisteredServer, ServerGroup, ServerId,
    ServerType, Urn,
};
pub use secret::{CredentialCodec, DataProtector, MachineProtector};
pub use store::{InMemoryCatalog, RegisteredServersStore, RemoteCatalog, StoreEvent};
