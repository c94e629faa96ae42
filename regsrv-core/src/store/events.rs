//! Change notifications raised by a store.

use crate::error::EntityKind;
use crate::models::Urn;

/// A committed change to the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// An entity (and any grafted subtree) was added
    Created {
        /// Kind of the new entity
        kind: EntityKind,
        /// Locator of the new entity
        urn: Urn,
    },
    /// An entity's properties changed
    Altered {
        /// Kind of the altered entity
        kind: EntityKind,
        /// Locator of the altered entity
        urn: Urn,
    },
    /// An entity was renamed
    Renamed {
        /// Kind of the renamed entity
        kind: EntityKind,
        /// Locator before the rename
        old_urn: Urn,
        /// Locator after the rename
        urn: Urn,
    },
    /// An entity moved to another parent
    Moved {
        /// Kind of the moved entity
        kind: EntityKind,
        /// Locator before the move
        old_urn: Urn,
        /// Locator after the move
        urn: Urn,
    },
    /// An entity (and its descendants) was removed
    Dropped {
        /// Kind of the removed entity
        kind: EntityKind,
        /// Locator the entity had before removal
        urn: Urn,
    },
}

impl StoreEvent {
    /// Returns the kind of entity the event refers to
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Created { kind, .. }
            | Self::Altered { kind, .. }
            | Self::Renamed { kind, .. }
            | Self::Moved { kind, .. }
            | Self::Dropped { kind, .. } => *kind,
        }
    }

    /// Returns the current (or last) locator of the entity
    #[must_use]
    pub const fn urn(&self) -> &Urn {
        match self {
            Self::Created { urn, .. }
            | Self::Altered { urn, .. }
            | Self::Renamed { urn, .. }
            | Self::Moved { urn, .. }
            | Self::Dropped { urn, .. } => urn,
        }
    }
}

/// Callback invoked for each committed change
pub type StoreListener = Box<dyn Fn(&StoreEvent) + Send + Sync>;
