//! Credential persistence policy for registered servers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Policy controlling which credentials survive into durable storage
///
/// The in-memory connection string may carry a plaintext password for the
/// current session; this policy decides what is kept when it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CredentialPersistenceType {
    /// Neither login name nor password are stored
    #[default]
    None,
    /// The login name is stored, the password is stripped
    PersistLoginName,
    /// Both are stored; the password is protected
    PersistLoginNameAndPassword,
}

impl CredentialPersistenceType {
    /// All policies
    pub const ALL: [Self; 3] = [
        Self::None,
        Self::PersistLoginName,
        Self::PersistLoginNameAndPassword,
    ];

    /// Returns the identifier used in documents
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::PersistLoginName => "PersistLoginName",
            Self::PersistLoginNameAndPassword => "PersistLoginNameAndPassword",
        }
    }

    /// Returns true if the login name is kept
    #[must_use]
    pub const fn keeps_login_name(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true if the password is kept (protected)
    #[must_use]
    pub const fn keeps_password(self) -> bool {
        matches!(self, Self::PersistLoginNameAndPassword)
    }

    /// Resolves the policy written for a server during export
    ///
    /// The export override wins, except that a server which only persists its
    /// login name is never upgraded to also persist its password.
    #[must_use]
    pub const fn effective_for_export(own: Self, export_override: Self) -> Self {
        match (own, export_override) {
            (Self::PersistLoginName, Self::PersistLoginNameAndPassword) => Self::PersistLoginName,
            (_, other) => other,
        }
    }
}

impl fmt::Display for CredentialPersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialPersistenceType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RegistryError::InvalidArgument {
                argument: "CredentialPersistenceType".to_string(),
                reason: format!("unknown policy '{s}'"),
            })
    }
}
