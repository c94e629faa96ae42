//! Server group model for hierarchical organization.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use super::server::ServerId;
use super::server_type::{ServerType, CENTRAL_MANAGEMENT_GROUP};
use super::validation::{ValidationMode, ValidationState};

/// In-memory handle of a server group within a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Uuid);

impl GroupId {
    /// Allocates a fresh handle
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parent of a server group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupParent {
    /// The group sits directly under the store root
    Store,
    /// The group is nested in another group
    Group(GroupId),
}

/// Lifecycle state of a group or server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectState {
    /// Constructed but not yet created against a backend
    #[default]
    Pending,
    /// Created and attached to a store
    Existing,
    /// Removed from its store; no further mutation is allowed
    Dropped,
}

/// A named node of the registered server tree
#[derive(Debug, Clone)]
pub struct ServerGroup {
    pub(crate) handle: GroupId,
    pub(crate) name: String,
    /// Free-form description
    pub description: String,
    pub(crate) server_type: ServerType,
    pub(crate) id: i32,
    pub(crate) parent: Option<GroupParent>,
    pub(crate) state: ObjectState,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) servers: Vec<ServerId>,
    /// Unrecognized document attributes, preserved on round-trip
    pub extra: BTreeMap<String, String>,
}

impl ServerGroup {
    /// Creates a pending group with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: GroupId::new(),
            name: name.into(),
            description: String::new(),
            server_type: ServerType::default(),
            id: 0,
            parent: None,
            state: ObjectState::Pending,
            groups: Vec::new(),
            servers: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Sets the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the in-memory handle
    #[must_use]
    pub const fn handle(&self) -> GroupId {
        self.handle
    }

    /// Returns the group name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the server type inherited from the parent at creation
    #[must_use]
    pub const fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Returns the backend-assigned numeric id (0 for local stores)
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Returns the parent, if attached
    #[must_use]
    pub const fn parent(&self) -> Option<GroupParent> {
        self.parent
    }

    /// Returns the lifecycle state
    #[must_use]
    pub const fn state(&self) -> ObjectState {
        self.state
    }

    /// Child groups in insertion order
    #[must_use]
    pub fn child_groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Child servers in insertion order
    #[must_use]
    pub fn servers(&self) -> &[ServerId] {
        &self.servers
    }

    /// Returns true for a top-level built-in group of one of the five server types
    #[must_use]
    pub fn is_system_group(&self) -> bool {
        self.parent == Some(GroupParent::Store) && ServerType::from_group_name(&self.name).is_some()
    }

    /// Returns true for the top-level central management group
    #[must_use]
    pub fn is_central_management_group(&self) -> bool {
        self.parent == Some(GroupParent::Store)
            && self.name.eq_ignore_ascii_case(CENTRAL_MANAGEMENT_GROUP)
    }

    /// Checks required properties
    #[must_use]
    pub fn validate(&self, mode: ValidationMode) -> ValidationState {
        let mut state = ValidationState::new(mode);
        state.require("Name", &self.name);
        state
    }

    /// Returns a pending copy with a fresh handle and no children
    pub(crate) fn detached_copy(&self) -> Self {
        Self {
            handle: GroupId::new(),
            name: self.name.clone(),
            description: self.description.clone(),
            server_type: self.server_type,
            id: 0,
            parent: None,
            state: ObjectState::Pending,
            groups: Vec::new(),
            servers: Vec::new(),
            extra: self.extra.clone(),
        }
    }
}
