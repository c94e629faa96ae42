//! Remote catalog surface
//!
//! A shared store lives in a remote catalog reached through named procedures.
//! Each mutating store operation maps to exactly one [`RemoteCall`]; create
//! calls return the catalog-generated id.

use std::fmt;
use std::sync::Arc;

use crate::error::RegistryResult;
use crate::models::{Collation, OrdinalIgnoreCase, ServerType};

/// Procedure names understood by the catalog
pub mod procedures {
    /// Creates a group; returns its id
    pub const ADD_GROUP: &str = "msdb.dbo.sp_sysmanagement_add_shared_server_group";
    /// Updates a group's description
    pub const UPDATE_GROUP: &str = "msdb.dbo.sp_sysmanagement_update_shared_server_group";
    /// Deletes a group and its contents
    pub const DELETE_GROUP: &str = "msdb.dbo.sp_sysmanagement_delete_shared_server_group";
    /// Renames a group
    pub const RENAME_GROUP: &str = "msdb.dbo.sp_sysmanagement_rename_shared_server_group";
    /// Moves a group under another group
    pub const MOVE_GROUP: &str = "msdb.dbo.sp_sysmanagement_move_shared_server_group";
    /// Creates a server; returns its id
    pub const ADD_SERVER: &str = "msdb.dbo.sp_sysmanagement_add_shared_registered_server";
    /// Updates a server's target and description
    pub const UPDATE_SERVER: &str = "msdb.dbo.sp_sysmanagement_update_shared_registered_server";
    /// Deletes a server
    pub const DELETE_SERVER: &str = "msdb.dbo.sp_sysmanagement_delete_shared_registered_server";
    /// Renames a server
    pub const RENAME_SERVER: &str = "msdb.dbo.sp_sysmanagement_rename_shared_registered_server";
    /// Moves a server to another group
    pub const MOVE_SERVER: &str = "msdb.dbo.sp_sysmanagement_move_shared_registered_server";
}

/// Argument value of a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteValue {
    /// Integer argument (ids, type codes)
    Int(i32),
    /// Text argument (names, descriptions)
    Text(String),
}

impl RemoteValue {
    /// Returns the integer value, if any
    #[must_use]
    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Returns the text value, if any
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            Self::Int(_) => None,
        }
    }
}

/// One named procedure invocation with its ordered parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Procedure name
    pub procedure: &'static str,
    /// Ordered `(parameter, value)` pairs
    pub args: Vec<(&'static str, RemoteValue)>,
}

impl RemoteCall {
    fn new(procedure: &'static str) -> Self {
        Self {
            procedure,
            args: Vec::new(),
        }
    }

    fn int(mut self, name: &'static str, value: i32) -> Self {
        self.args.push((name, RemoteValue::Int(value)));
        self
    }

    fn text(mut self, name: &'static str, value: &str) -> Self {
        self.args.push((name, RemoteValue::Text(value.to_string())));
        self
    }

    /// Returns the value of a named parameter
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&RemoteValue> {
        self.args.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Builds the group create call
    #[must_use]
    pub fn add_group(parent_id: i32, name: &str, description: &str, server_type: ServerType) -> Self {
        Self::new(procedures::ADD_GROUP)
            .int("parent_id", parent_id)
            .text("name", name)
            .text("description", description)
            .int("server_type", server_type.catalog_code())
    }

    /// Builds the group alter call
    #[must_use]
    pub fn update_group(id: i32, description: &str) -> Self {
        Self::new(procedures::UPDATE_GROUP)
            .int("server_group_id", id)
            .text("description", description)
    }

    /// Builds the group drop call
    #[must_use]
    pub fn delete_group(id: i32) -> Self {
        Self::new(procedures::DELETE_GROUP).int("server_group_id", id)
    }

    /// Builds the group rename call
    #[must_use]
    pub fn rename_group(id: i32, new_name: &str) -> Self {
        Self::new(procedures::RENAME_GROUP)
            .int("server_group_id", id)
            .text("new_name", new_name)
    }

    /// Builds the group move call
    #[must_use]
    pub fn move_group(id: i32, new_parent_id: i32) -> Self {
        Self::new(procedures::MOVE_GROUP)
            .int("server_group_id", id)
            .int("new_parent_id", new_parent_id)
    }

    /// Builds the server create call
    #[must_use]
    pub fn add_server(
        group_id: i32,
        name: &str,
        server_name: &str,
        description: &str,
        server_type: ServerType,
    ) -> Self {
        Self::new(procedures::ADD_SERVER)
            .int("server_group_id", group_id)
            .text("name", name)
            .text("server_name", server_name)
            .text("description", description)
            .int("server_type", server_type.catalog_code())
    }

    /// Builds the server alter call
    #[must_use]
    pub fn update_server(id: i32, server_name: &str, description: &str) -> Self {
        Self::new(procedures::UPDATE_SERVER)
            .int("server_id", id)
            .text("server_name", server_name)
            .text("description", description)
    }

    /// Builds the server drop call
    #[must_use]
    pub fn delete_server(id: i32) -> Self {
        Self::new(procedures::DELETE_SERVER).int("server_id", id)
    }

    /// Builds the server rename call
    #[must_use]
    pub fn rename_server(id: i32, new_name: &str) -> Self {
        Self::new(procedures::RENAME_SERVER)
            .int("server_id", id)
            .text("new_name", new_name)
    }

    /// Builds the server move call
    #[must_use]
    pub fn move_server(id: i32, new_parent_id: i32) -> Self {
        Self::new(procedures::MOVE_SERVER)
            .int("server_id", id)
            .int("new_parent_id", new_parent_id)
    }
}

/// A group row as enumerated from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogGroup {
    /// Catalog id
    pub id: i32,
    /// Parent group id; `None` for the built-in top-level groups
    pub parent_id: Option<i32>,
    /// Group name
    pub name: String,
    /// Description
    pub description: String,
    /// Server type code
    pub server_type: i32,
}

/// A server row as enumerated from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogServer {
    /// Catalog id
    pub id: i32,
    /// Owning group id
    pub group_id: i32,
    /// Display name
    pub name: String,
    /// Target server name
    pub server_name: String,
    /// Description
    pub description: String,
    /// Server type code
    pub server_type: i32,
}

/// Shared catalog backing a remote store
pub trait RemoteCatalog: Send + Sync + fmt::Debug {
    /// Executes one procedure call, returning the generated id for creates
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the catalog rejects the call.
    fn execute(&self, call: &RemoteCall) -> RegistryResult<Option<i32>>;

    /// Enumerates every group
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the catalog cannot be read.
    fn enumerate_groups(&self) -> RegistryResult<Vec<CatalogGroup>>;

    /// Enumerates every server
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the catalog cannot be read.
    fn enumerate_servers(&self) -> RegistryResult<Vec<CatalogServer>>;

    /// Name comparison rule of the catalog
    fn collation(&self) -> Arc<dyn Collation> {
        Arc::new(OrdinalIgnoreCase)
    }

    /// Whether the connection to the catalog trusts the server certificate
    fn trust_server_certificate(&self) -> bool {
        false
    }

    /// Human-readable name of the catalog host
    fn display_name(&self) -> String;
}
