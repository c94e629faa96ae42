//! Import engine for standalone documents and legacy registrations.
//!
//! This module grafts exported documents (a single group subtree or a single
//! server) under a target group, asking a caller-supplied resolver what to do
//! when a group or server name is already taken. Legacy registration files are handled
//! by the [`legacy`] submodule.

pub mod legacy;

use std::fs;
use std::path::Path;

use crate::document::{parse_document, Document, GroupNode};
use crate::error::{EntityKind, Operation, RegistryError, RegistryResult};
use crate::models::{GroupId, GroupParent, RegisteredServer, ServerType};
use crate::store::RegisteredServersStore;

pub use legacy::{
    migrate_legacy, migrate_legacy_file, parse_legacy_document, LegacyConnection, LegacyDocument,
    LegacyGroup, LegacyServer, LegacyServerType, MigrationReport,
};

/// What to do with an imported entity whose name is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateAction {
    /// Drop the existing entity and create the imported one
    Overwrite,
    /// Keep the existing entity and ignore the imported one
    Skip,
    /// Stop the whole import
    CancelAll,
}

/// A name clash reported to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateFound {
    /// The conflicting name
    pub name: String,
    /// Kind of the conflicting entity
    pub kind: EntityKind,
}

/// The resolver's answer to a clash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateDecision {
    /// Action for this clash
    pub action: DuplicateAction,
    /// Reuse the action for every remaining clash without asking again
    pub apply_to_all: bool,
}

impl DuplicateDecision {
    /// Applies `action` to this clash only
    #[must_use]
    pub const fn once(action: DuplicateAction) -> Self {
        Self {
            action,
            apply_to_all: false,
        }
    }

    /// Applies `action` to this and every remaining clash
    #[must_use]
    pub const fn for_all(action: DuplicateAction) -> Self {
        Self {
            action,
            apply_to_all: true,
        }
    }
}

/// Decides how an import treats name clashes
pub trait DuplicateResolver {
    /// Returns the decision for one clash
    fn resolve(&mut self, conflict: &DuplicateFound) -> DuplicateDecision;
}

impl<F> DuplicateResolver for F
where
    F: FnMut(&DuplicateFound) -> DuplicateDecision,
{
    fn resolve(&mut self, conflict: &DuplicateFound) -> DuplicateDecision {
        self(conflict)
    }
}

/// Counts of what an import did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Groups created, including every group of a grafted subtree
    pub groups_created: usize,
    /// Servers created
    pub servers_created: usize,
    /// Existing servers replaced by imported ones
    pub servers_overwritten: usize,
    /// Imported servers ignored because of a clash
    pub servers_skipped: Vec<String>,
    /// Existing groups replaced by imported ones
    pub groups_overwritten: usize,
    /// Imported groups ignored because of a clash
    pub groups_skipped: Vec<String>,
}

impl ImportSummary {
    /// Returns a summary string of the import
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Groups: {}, Servers: {}, Overwritten: {}, Skipped: {}",
            self.groups_created,
            self.servers_created,
            self.servers_overwritten + self.groups_overwritten,
            self.servers_skipped.len() + self.groups_skipped.len()
        )
    }
}

/// How an import ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Every entity was processed
    Completed(ImportSummary),
    /// The resolver cancelled; changes made before cancellation are kept
    Cancelled(ImportSummary),
}

impl ImportOutcome {
    /// Returns the summary of work done
    #[must_use]
    pub const fn summary(&self) -> &ImportSummary {
        match self {
            Self::Completed(summary) | Self::Cancelled(summary) => summary,
        }
    }

    /// Returns true if the resolver cancelled the import
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Imports a standalone document file under `target`
///
/// # Errors
///
/// Returns `OperationFailed` (Import) wrapping the cause; out-of-memory
/// crypto failures propagate unwrapped.
pub fn import_file(
    store: &mut RegisteredServersStore,
    target: GroupId,
    path: &Path,
    resolver: &mut dyn DuplicateResolver,
) -> RegistryResult<ImportOutcome> {
    let document = fs::read_to_string(path)
        .map_err(RegistryError::from)
        .and_then(|text| parse_document(&text))
        .map_err(|e| e.into_operation_failure(Operation::Import))?;
    tracing::info!(path = %path.display(), root = %document.root_kind(), "Importing registered servers");
    import_document(store, target, document, resolver)
}

/// Imports a parsed document under `target`
///
/// A server is created in `target`. A group named like one of the built-in
/// groups has its content merged into `target`; any other group is created
/// under `target` together with its descendants.
///
/// # Errors
///
/// Returns `OperationFailed` (Import) wrapping the cause; out-of-memory
/// crypto failures propagate unwrapped.
pub fn import_document(
    store: &mut RegisteredServersStore,
    target: GroupId,
    document: Document,
    resolver: &mut dyn DuplicateResolver,
) -> RegistryResult<ImportOutcome> {
    let mut session = ImportSession {
        resolver,
        remembered: None,
        summary: ImportSummary::default(),
    };

    let result = match document {
        Document::Server(server) => session.import_server(store, target, server),
        Document::Group(node) if ServerType::from_group_name(node.group.name()).is_some() => {
            session.merge_children(store, target, node)
        }
        Document::Group(node) => session.import_group(store, target, node),
        Document::Store(_) => Err(RegistryError::InvalidArgument {
            argument: "document".to_string(),
            reason: "a whole store cannot be imported into a group".to_string(),
        }),
    };

    match result {
        Ok(()) => Ok(ImportOutcome::Completed(session.summary)),
        Err(RegistryError::Cancelled) => {
            tracing::info!("Import cancelled");
            Ok(ImportOutcome::Cancelled(session.summary))
        }
        Err(e) => Err(e.into_operation_failure(Operation::Import)),
    }
}

/// State threaded through one import
struct ImportSession<'a> {
    resolver: &'a mut dyn DuplicateResolver,
    remembered: Option<DuplicateAction>,
    summary: ImportSummary,
}

impl ImportSession<'_> {
    fn decide(&mut self, conflict: &DuplicateFound) -> DuplicateAction {
        if let Some(action) = self.remembered {
            return action;
        }
        let decision = self.resolver.resolve(conflict);
        if decision.apply_to_all {
            self.remembered = Some(decision.action);
        }
        decision.action
    }

    fn import_server(
        &mut self,
        store: &mut RegisteredServersStore,
        target: GroupId,
        server: RegisteredServer,
    ) -> RegistryResult<()> {
        let server = server.detached_copy();
        if let Some(existing) = store.find_server(target, server.name()) {
            let conflict = DuplicateFound {
                name: server.name().to_string(),
                kind: EntityKind::RegisteredServer,
            };
            match self.decide(&conflict) {
                DuplicateAction::Overwrite => {
                    store.drop_server(existing)?;
                    self.summary.servers_overwritten += 1;
                }
                DuplicateAction::Skip => {
                    tracing::debug!(server = %conflict.name, "Skipping duplicate server");
                    self.summary.servers_skipped.push(conflict.name);
                    return Ok(());
                }
                DuplicateAction::CancelAll => return Err(RegistryError::Cancelled),
            }
        }
        store.create_server(target, server)?;
        self.summary.servers_created += 1;
        Ok(())
    }

    /// Imports the servers and groups of `node` directly into `target`
    fn merge_children(
        &mut self,
        store: &mut RegisteredServersStore,
        target: GroupId,
        node: GroupNode,
    ) -> RegistryResult<()> {
        for server in node.servers {
            self.import_server(store, target, server)?;
        }
        for child in node.groups {
            self.import_group(store, target, child)?;
        }
        Ok(())
    }

    fn import_group(
        &mut self,
        store: &mut RegisteredServersStore,
        target: GroupId,
        node: GroupNode,
    ) -> RegistryResult<()> {
        if let Some(existing) = store.find_child_group(GroupParent::Group(target), node.group.name()) {
            let conflict = DuplicateFound {
                name: node.group.name().to_string(),
                kind: EntityKind::ServerGroup,
            };
            match self.decide(&conflict) {
                DuplicateAction::Overwrite => {
                    store.drop_group(existing)?;
                    self.summary.groups_overwritten += 1;
                }
                DuplicateAction::Skip => {
                    tracing::debug!(group = %conflict.name, "Skipping duplicate group");
                    self.summary.groups_skipped.push(conflict.name);
                    return Ok(());
                }
                DuplicateAction::CancelAll => return Err(RegistryError::Cancelled),
            }
        }

        let (groups, servers) = node.count();
        if store.is_local() {
            store.graft_group(target, node)?;
            self.summary.groups_created += groups;
            self.summary.servers_created += servers;
            Ok(())
        } else {
            self.deep_create(store, target, node)
        }
    }

    /// Creates the group, then its servers, then each child group recursively
    fn deep_create(
        &mut self,
        store: &mut RegisteredServersStore,
        parent: GroupId,
        node: GroupNode,
    ) -> RegistryResult<()> {
        let GroupNode {
            group,
            groups,
            servers,
        } = node;
        let created = store.create_group(GroupParent::Group(parent), group.detached_copy())?;
        self.summary.groups_created += 1;
        for server in servers {
            store.create_server(created, server.detached_copy())?;
            self.summary.servers_created += 1;
        }
        for child in groups {
            self.deep_create(store, created, child)?;
        }
        Ok(())
    }
}
