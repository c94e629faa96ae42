//! Error types for the registered servers store
//!
//! This module defines the error types used throughout the crate, providing
//! descriptive messages for tree validation, credential protection, document
//! parsing, remote catalog calls and configuration file operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::ValidationState;

/// Kind of entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// The store root
    Store,
    /// A server group
    ServerGroup,
    /// A registered server
    RegisteredServer,
}

impl EntityKind {
    /// Returns the element/type name used in locators and documents
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "RegisteredServersStore",
            Self::ServerGroup => "ServerGroup",
            Self::RegisteredServer => "RegisteredServer",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "Store"),
            Self::ServerGroup => write!(f, "Server group"),
            Self::RegisteredServer => write!(f, "Registered server"),
        }
    }
}

/// Store-level operation named in wrapped failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Writing a subtree to a standalone document
    Export,
    /// Grafting a standalone document into a group
    Import,
    /// Converting a legacy schema document
    Migrate,
    /// Loading the local store file
    Load,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Export => "Export",
            Self::Import => "Import",
            Self::Migrate => "Migration",
            Self::Load => "Load",
        };
        f.write_str(name)
    }
}

/// Action refused on a reserved built-in group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedAction {
    /// Renaming the group
    Rename,
    /// Dropping the group
    Drop,
    /// Moving the group
    Move,
    /// Creating a child group under it
    CreateUnder,
}

impl fmt::Display for ReservedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Rename => "rename",
            Self::Drop => "drop",
            Self::Move => "move",
            Self::CreateUnder => "create a server group under",
        };
        f.write_str(verb)
    }
}

/// Top-level error type for store operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A required property is missing or invalid
    #[error("Invalid value for property '{property}': {reason}")]
    Validation {
        /// The property that failed validation
        property: String,
        /// The reason for validation failure
        reason: String,
    },

    /// Batch validation reported one or more issues
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationState),

    /// Attempt to modify a reserved built-in group
    #[error("Cannot {action} system server group '{name}'")]
    ReservedGroup {
        /// Name of the reserved group
        name: String,
        /// The refused action
        action: ReservedAction,
    },

    /// A sibling with the same name already exists
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the conflicting entity
        kind: EntityKind,
        /// Conflicting name
        name: String,
    },

    /// A targeted object does not exist
    #[error("{kind} '{name}' was not found")]
    NotFound {
        /// Kind of the missing entity
        kind: EntityKind,
        /// Name or handle of the missing entity
        name: String,
    },

    /// An argument is out of its accepted domain
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument {
        /// Argument name
        argument: String,
        /// Why it was rejected
        reason: String,
    },

    /// The entity is not in a state that allows the operation
    #[error("Invalid object state: {0}")]
    InvalidState(String),

    /// Malformed legacy migration document
    #[error("Invalid legacy format in element '{element}': {reason}")]
    LegacyFormat {
        /// Offending element name
        element: String,
        /// What was wrong with it
        reason: String,
    },

    /// Credential protection failed
    #[error("Credential protection error: {0}")]
    Crypto(#[from] CryptoError),

    /// Store document could not be read or written as XML
    #[error("XML error: {0}")]
    Xml(String),

    /// The local store file could not be deserialized
    #[error("Failed to deserialize registered servers store {path}: {reason}")]
    Deserialize {
        /// File that failed to load
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// The remote catalog rejected a call
    #[error("Remote catalog error: {0}")]
    Remote(String),

    /// A store-level operation failed; wraps the underlying cause
    #[error("{operation} operation failed: {source}")]
    OperationFailed {
        /// The operation that failed
        operation: Operation,
        /// Underlying cause
        source: Box<RegistryError>,
    },

    /// The caller cancelled the whole operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Returns true for failures that must never be wrapped or swallowed
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::ResourceExhausted))
    }

    /// Wraps this error as a failed store-level operation
    ///
    /// Fatal errors pass through unchanged.
    #[must_use]
    pub fn into_operation_failure(self, operation: Operation) -> Self {
        if self.is_fatal() {
            return self;
        }
        Self::OperationFailed {
            operation,
            source: Box::new(self),
        }
    }

    pub(crate) fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn legacy(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LegacyFormat {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while protecting or unprotecting credential material
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A failure that may succeed when retried
    #[error("Transient protection failure: {0}")]
    Transient(String),

    /// Memory could not be allocated for the operation
    #[error("Out of memory while protecting data")]
    ResourceExhausted,

    /// A failure that will not succeed on retry
    #[error("Protection failed: {0}")]
    Terminal(String),

    /// The protected text is not valid encoded data
    #[error("Protected data is malformed: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// Returns true if the retry policy applies to this failure
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ResourceExhausted)
    }
}

/// Errors related to configuration file operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration file
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// The reason for validation failure
        reason: String,
    },

    /// Configuration directory could not be determined
    #[error("Configuration directory not found: {0}")]
    NotFound(PathBuf),

    /// Failed to write configuration file
    #[error("Failed to write configuration: {0}")]
    Write(String),

    /// Failed to serialize configuration
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    /// Failed to deserialize configuration
    #[error("Failed to deserialize configuration: {0}")]
    Deserialize(String),
}

/// Result type alias for store operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Result type alias for credential protection
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_failure_wraps_source() {
        let err = RegistryError::not_found(EntityKind::ServerGroup, "G1")
            .into_operation_failure(Operation::Export);
        assert!(matches!(
            err,
            RegistryError::OperationFailed {
                operation: Operation::Export,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "Export operation failed: Server group 'G1' was not found"
        );
    }

    #[test]
    fn test_resource_exhaustion_is_never_wrapped() {
        let err = RegistryError::Crypto(CryptoError::ResourceExhausted)
            .into_operation_failure(Operation::Import);
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RegistryError::Crypto(CryptoError::ResourceExhausted)
        ));
    }

    #[test]
    fn test_reserved_group_message() {
        let err = RegistryError::ReservedGroup {
            name: "DatabaseEngineServerGroup".to_string(),
            action: ReservedAction::Drop,
        };
        assert_eq!(
            err.to_string(),
            "Cannot drop system server group 'DatabaseEngineServerGroup'"
        );
    }

    #[test]
    fn test_retryable_crypto_errors() {
        assert!(CryptoError::Transient("busy".into()).is_retryable());
        assert!(CryptoError::ResourceExhausted.is_retryable());
        assert!(!CryptoError::Terminal("bad key".into()).is_retryable());
        assert!(!CryptoError::Encoding("bad base64".into()).is_retryable());
    }
}
