//! Registered server model.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::credentials::CredentialPersistenceType;
use super::group::{GroupId, ObjectState};
use super::server_type::ServerType;
use super::validation::{ValidationMode, ValidationState};
use crate::connection_string::{self, ConnectionStringBuilder, SERVER_NAME_KEYS};
use crate::error::RegistryResult;
use crate::secret::CredentialCodec;

/// In-memory handle of a registered server within a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(Uuid);

impl ServerId {
    /// Allocates a fresh handle
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A saved connection endpoint
///
/// The full connection string, including any password, lives only in memory
/// as a `SecretString`. What reaches durable storage is
/// `connection_string_with_encrypted_password`, recomputed from the in-memory
/// string whenever the string or the credential policy changes.
#[derive(Debug, Clone)]
pub struct RegisteredServer {
    pub(crate) handle: ServerId,
    pub(crate) name: String,
    pub(crate) server_name: String,
    /// Free-form description
    pub description: String,
    pub(crate) credential_persistence_type: CredentialPersistenceType,
    pub(crate) connection_string: Option<SecretString>,
    pub(crate) encrypted_connection_string: Option<String>,
    pub(crate) projection_stale: bool,
    /// The server name key was added to the connection string, not supplied
    pub(crate) server_name_key_added: bool,
    /// Additional connection parameters
    pub other_params: String,
    /// Authentication method code used by the owning tool
    pub authentication_type: Option<i32>,
    /// Directory authentication user id
    pub active_directory_user_id: String,
    /// Directory authentication tenant
    pub active_directory_tenant: String,
    /// Whether the custom connection color is shown
    pub use_custom_connection_color: bool,
    /// Custom connection color as ARGB
    pub custom_connection_color_argb: i32,
    /// Free-form tag managed by the owning tool
    pub tag: String,
    pub(crate) id: i32,
    pub(crate) server_type: ServerType,
    pub(crate) parent: Option<GroupId>,
    pub(crate) state: ObjectState,
    /// Unrecognized document attributes, preserved on round-trip
    pub extra: BTreeMap<String, String>,
}

impl RegisteredServer {
    /// Creates a pending server with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            handle: ServerId::new(),
            name: name.into(),
            server_name: String::new(),
            description: String::new(),
            credential_persistence_type: CredentialPersistenceType::default(),
            connection_string: None,
            encrypted_connection_string: None,
            projection_stale: false,
            server_name_key_added: false,
            other_params: String::new(),
            authentication_type: None,
            active_directory_user_id: String::new(),
            active_directory_tenant: String::new(),
            use_custom_connection_color: false,
            custom_connection_color_argb: 0,
            tag: String::new(),
            id: 0,
            server_type: ServerType::default(),
            parent: None,
            state: ObjectState::Pending,
            extra: BTreeMap::new(),
        }
    }

    /// Sets the target server name
    #[must_use]
    pub fn with_server_name(mut self, server_name: &str) -> Self {
        self.set_server_name(server_name);
        self
    }

    /// Sets the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the in-memory connection string
    #[must_use]
    pub fn with_connection_string(mut self, connection_string: &str) -> Self {
        self.set_connection_string(connection_string);
        self
    }

    /// Sets the credential persistence policy
    #[must_use]
    pub fn with_credential_persistence_type(mut self, policy: CredentialPersistenceType) -> Self {
        self.set_credential_persistence_type(policy);
        self
    }

    /// Returns the in-memory handle
    #[must_use]
    pub const fn handle(&self) -> ServerId {
        self.handle
    }

    /// Returns the server's display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target server name
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns the credential persistence policy
    #[must_use]
    pub const fn credential_persistence_type(&self) -> CredentialPersistenceType {
        self.credential_persistence_type
    }

    /// Returns the persisted connection string form
    #[must_use]
    pub fn connection_string_with_encrypted_password(&self) -> Option<&str> {
        self.encrypted_connection_string.as_deref()
    }

    /// Returns the server type inherited from the parent group
    #[must_use]
    pub const fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Returns the backend-assigned numeric id (0 for local stores)
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Returns the parent group, if attached
    #[must_use]
    pub const fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    /// Returns the lifecycle state
    #[must_use]
    pub const fn state(&self) -> ObjectState {
        self.state
    }

    /// Sets the target server name and mirrors it into the connection string
    pub fn set_server_name(&mut self, server_name: &str) {
        if let Some(current) = &self.connection_string {
            if let Ok(mut builder) = ConnectionStringBuilder::parse(current.expose_secret()) {
                let differs = builder
                    .server_name()
                    .is_none_or(|existing| !existing.eq_ignore_ascii_case(server_name));
                if differs {
                    if !SERVER_NAME_KEYS.iter().any(|key| builder.contains_key(key)) {
                        self.server_name_key_added = true;
                    }
                    builder.set_server_name(self.server_type, server_name);
                    self.connection_string = Some(SecretString::from(builder.to_string()));
                    self.projection_stale = true;
                }
            }
        }
        self.server_name = server_name.to_string();
    }

    /// Sets the in-memory connection string
    ///
    /// The server name is taken from the string when it names one; otherwise
    /// the current server name is written into it. An empty value clears the
    /// stored string.
    pub fn set_connection_string(&mut self, connection_string: &str) {
        if connection_string.trim().is_empty() {
            self.connection_string = None;
            self.encrypted_connection_string = None;
            self.projection_stale = false;
            self.server_name_key_added = false;
            return;
        }

        self.server_name_key_added = false;
        let mut text = connection_string.to_string();
        if let Ok(mut builder) = ConnectionStringBuilder::parse(connection_string) {
            match builder.server_name().map(str::to_string) {
                Some(found) => self.server_name = found,
                None if !self.server_name.is_empty() => {
                    self.server_name_key_added =
                        !SERVER_NAME_KEYS.iter().any(|key| builder.contains_key(key));
                    builder.set_server_name(self.server_type, &self.server_name);
                    text = builder.to_string();
                }
                None => {}
            }
        }
        self.connection_string = Some(SecretString::from(text));
        self.projection_stale = true;
    }

    /// Sets the credential persistence policy
    pub fn set_credential_persistence_type(&mut self, policy: CredentialPersistenceType) {
        if self.credential_persistence_type != policy {
            self.credential_persistence_type = policy;
            self.projection_stale = true;
        }
    }

    /// Returns the full connection string, unprotecting a stored password if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the stored password cannot be unprotected.
    pub fn connection_string(&self, codec: &CredentialCodec) -> RegistryResult<Option<SecretString>> {
        if let Some(plain) = &self.connection_string {
            return Ok(Some(plain.clone()));
        }
        match &self.encrypted_connection_string {
            Some(persisted) => Ok(Some(SecretString::from(connection_string::reveal_password(
                persisted, codec,
            )?))),
            None => Ok(None),
        }
    }

    /// Computes the persisted form under `policy` without changing the server
    ///
    /// # Errors
    ///
    /// Returns an error if password protection or unprotection fails.
    pub fn project(
        &self,
        policy: CredentialPersistenceType,
        codec: &CredentialCodec,
    ) -> RegistryResult<Option<String>> {
        let stored_is_current = !self.projection_stale
            && (policy == self.credential_persistence_type
                || self.encrypted_connection_string.is_none());
        if stored_is_current && self.connection_string.is_none() {
            return Ok(self.encrypted_connection_string.clone());
        }
        match self.connection_string(codec)? {
            Some(plain) => Ok(Some(connection_string::apply_persistence(
                plain.expose_secret(),
                policy,
                codec,
            )?)),
            None => Ok(None),
        }
    }

    /// Recomputes the persisted form if the string or policy changed
    ///
    /// # Errors
    ///
    /// Returns an error if password protection fails.
    pub fn refresh_projection(&mut self, codec: &CredentialCodec) -> RegistryResult<()> {
        if self.projection_stale {
            self.encrypted_connection_string =
                self.project(self.credential_persistence_type, codec)?;
            self.projection_stale = false;
        }
        Ok(())
    }

    /// Drops any in-memory password, keeping integrated authentication only
    pub(crate) fn strip_to_shared(&mut self) {
        self.connection_string = None;
        self.encrypted_connection_string = None;
        self.projection_stale = false;
    }

    /// Checks required properties
    #[must_use]
    pub fn validate(&self, mode: ValidationMode) -> ValidationState {
        let mut state = ValidationState::new(mode);
        state.require("Name", &self.name);
        state.require("ServerName", &self.server_name);
        state
    }

    /// Takes the server type of the owning group
    ///
    /// A server name key added to the connection string under the previous
    /// type is moved to the key of the new one.
    pub(crate) fn adopt_server_type(&mut self, server_type: ServerType) {
        let previous = std::mem::replace(&mut self.server_type, server_type);
        if !self.server_name_key_added || previous.server_name_key() == server_type.server_name_key() {
            return;
        }
        let Some(current) = &self.connection_string else {
            return;
        };
        if let Ok(mut builder) = ConnectionStringBuilder::parse(current.expose_secret()) {
            builder.remove(previous.server_name_key());
            builder.set_server_name(server_type, &self.server_name);
            self.connection_string = Some(SecretString::from(builder.to_string()));
            self.projection_stale = true;
        }
    }

    /// Returns a pending copy with a fresh handle
    pub(crate) fn detached_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.handle = ServerId::new();
        copy.id = 0;
        copy.parent = None;
        copy.state = ObjectState::Pending;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::MachineProtector;
    use std::sync::Arc;

    fn test_codec() -> CredentialCodec {
        CredentialCodec::new(Arc::new(MachineProtector::with_secret(b"server-tests").unwrap()))
    }

    #[test]
    fn test_adopted_type_moves_added_server_name_key() {
        let mut server = RegisteredServer::new("R1")
            .with_server_name("http://rs")
            .with_connection_string("integrated security=true");
        server.adopt_server_type(ServerType::ReportingServices);
        let plain = server.connection_string(&test_codec()).unwrap().unwrap();
        let builder = ConnectionStringBuilder::parse(plain.expose_secret()).unwrap();
        assert_eq!(builder.get("address"), Some("http://rs"));
        assert!(builder.get("data source").is_none());
    }

    #[test]
    fn test_adopted_type_keeps_supplied_server_name_key() {
        let mut server = RegisteredServer::new("R1").with_connection_string("data source=rs1");
        server.adopt_server_type(ServerType::ReportingServices);
        let plain = server.connection_string(&test_codec()).unwrap().unwrap();
        assert_eq!(plain.expose_secret(), "data source=rs1");
    }

    #[test]
    fn test_connection_string_sets_server_name() {
        let server = RegisteredServer::new("S1").with_connection_string("server=host1;trusted_connection=true");
        assert_eq!(server.server_name(), "host1");
    }

    #[test]
    fn test_server_name_is_written_into_connection_string() {
        let server = RegisteredServer::new("S1")
            .with_server_name("host2")
            .with_connection_string("integrated security=true");
        let codec = test_codec();
        let plain = server.connection_string(&codec).unwrap().unwrap();
        assert_eq!(
            plain.expose_secret(),
            "integrated security=true;data source=host2"
        );
    }

    #[test]
    fn test_set_server_name_rewrites_existing_key() {
        let mut server = RegisteredServer::new("S1").with_connection_string("Server=old;uid=sa");
        server.set_server_name("new");
        let codec = test_codec();
        let plain = server.connection_string(&codec).unwrap().unwrap();
        assert_eq!(plain.expose_secret(), "server=new;uid=sa");
        assert_eq!(server.server_name(), "new");
    }

    #[test]
    fn test_refresh_projection_applies_policy() {
        let codec = test_codec();
        let mut server = RegisteredServer::new("S1")
            .with_connection_string("server=h;user id=sa;password=pw")
            .with_credential_persistence_type(CredentialPersistenceType::PersistLoginName);
        server.refresh_projection(&codec).unwrap();
        assert_eq!(
            server.connection_string_with_encrypted_password(),
            Some("server=h;user id=sa")
        );

        server.set_credential_persistence_type(CredentialPersistenceType::None);
        server.refresh_projection(&codec).unwrap();
        assert_eq!(server.connection_string_with_encrypted_password(), Some("server=h"));
    }

    #[test]
    fn test_loaded_server_reveals_password() {
        let codec = test_codec();
        let mut server = RegisteredServer::new("S1")
            .with_connection_string("server=h;user id=sa;password=pw")
            .with_credential_persistence_type(CredentialPersistenceType::PersistLoginNameAndPassword);
        server.refresh_projection(&codec).unwrap();

        let mut loaded = server.clone();
        loaded.connection_string = None;
        let plain = loaded.connection_string(&codec).unwrap().unwrap();
        assert_eq!(plain.expose_secret(), "server=h;user id=sa;password=pw");
    }

    #[test]
    fn test_validation_requires_server_name() {
        let server = RegisteredServer::new("S1");
        let state = server.validate(ValidationMode::Batch);
        assert_eq!(state.issues().len(), 1);
        assert_eq!(state.issues()[0].property, "ServerName");
    }

    #[test]
    fn test_empty_connection_string_clears_projection() {
        let codec = test_codec();
        let mut server = RegisteredServer::new("S1").with_connection_string("server=h");
        server.refresh_projection(&codec).unwrap();
        server.set_connection_string("");
        assert_eq!(server.connection_string_with_encrypted_password(), None);
        assert!(server.connection_string(&codec).unwrap().is_none());
    }
}
