//! Core data models for the registered servers store
//!
//! This module defines the entities of the tree (server groups and registered
//! servers), their identity keys, server types and credential policies.

mod credentials;
mod group;
mod key;
mod server;
mod server_type;
mod validation;

pub use credentials::CredentialPersistenceType;
pub use group::{GroupId, GroupParent, ObjectState, ServerGroup};
pub use key::{escape_urn_value, Collation, IdentityKey, NameComparer, OrdinalIgnoreCase, Urn};
pub use server::{RegisteredServer, ServerId};
pub use server_type::{ServerType, CENTRAL_MANAGEMENT_GROUP};
pub use validation::{ValidationIssue, ValidationMode, ValidationState};
