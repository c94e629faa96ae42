//! Identity keys and name comparison rules.
//!
//! Every group and server is identified among its siblings by its name. Local
//! stores compare names case-insensitively; remote stores use the catalog's
//! own collation, supplied through the [`Collation`] trait.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::EntityKind;

/// Name normalization rule used for identity comparison
pub trait Collation: Send + Sync + fmt::Debug {
    /// Returns the comparison form of `name`
    fn normalize(&self, name: &str) -> String;
}

/// Case-insensitive ordinal comparison used by local stores
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdinalIgnoreCase;

impl Collation for OrdinalIgnoreCase {
    fn normalize(&self, name: &str) -> String {
        name.to_lowercase()
    }
}

/// Shared handle to the active name comparison rule
#[derive(Debug, Clone)]
pub struct NameComparer(Arc<dyn Collation>);

impl NameComparer {
    /// Creates a comparer from a collation
    #[must_use]
    pub fn new(collation: Arc<dyn Collation>) -> Self {
        Self(collation)
    }

    /// Builds the identity key for an entity name
    #[must_use]
    pub fn key(&self, kind: EntityKind, name: &str) -> IdentityKey {
        IdentityKey {
            kind,
            name: name.to_string(),
            normalized: self.0.normalize(name),
        }
    }

    /// Returns true if both names identify the same sibling
    #[must_use]
    pub fn same_name(&self, a: &str, b: &str) -> bool {
        self.0.normalize(a) == self.0.normalize(b)
    }
}

impl Default for NameComparer {
    fn default() -> Self {
        Self(Arc::new(OrdinalIgnoreCase))
    }
}

/// Identity of a group or server among its siblings
///
/// Equality, hashing and ordering use the normalized name only; the original
/// spelling is kept for display and locators.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    kind: EntityKind,
    name: String,
    normalized: String,
}

impl IdentityKey {
    /// Returns the entity kind
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the name as spelled by the entity
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the locator segment, e.g. `ServerGroup[@Name='G1']`
    #[must_use]
    pub fn urn_segment(&self) -> String {
        format!(
            "{}[@Name='{}']",
            self.kind.as_str(),
            escape_urn_value(&self.name)
        )
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.normalized == other.normalized
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.normalized.hash(state);
    }
}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind as u8)
            .cmp(&(other.kind as u8))
            .then_with(|| self.normalized.cmp(&other.normalized))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn_segment())
    }
}

/// Escapes a value for use inside a single-quoted locator predicate
#[must_use]
pub fn escape_urn_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Path-like locator of an entity within the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Urn(String);

impl Urn {
    /// Builds a locator from the root down through `segments`
    #[must_use]
    pub fn from_keys<'a>(segments: impl IntoIterator<Item = &'a IdentityKey>) -> Self {
        let mut urn = EntityKind::Store.as_str().to_string();
        for key in segments {
            urn.push('/');
            urn.push_str(&key.urn_segment());
        }
        Self(urn)
    }

    /// Returns the locator text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
