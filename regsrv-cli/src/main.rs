//! `regsrv` CLI - Command-line interface for the registered servers store
//!
//! Provides commands for listing, creating, renaming, moving and removing
//! groups and servers, exporting and importing documents, and migrating
//! legacy registration files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use clap::{Parser, Subcommand, ValueEnum};
use regsrv_core::config::{ConfigManager, RegistrySettings};
use regsrv_core::export::{export_group, export_server};
use regsrv_core::import::{
    import_file, migrate_legacy_file, DuplicateAction, DuplicateDecision, DuplicateFound,
};
use regsrv_core::models::{
    CredentialPersistenceType, GroupId, GroupParent, RegisteredServer, ServerGroup, ServerId,
    ServerType,
};
use regsrv_core::{CredentialCodec, RegisteredServersStore, RegistryError, StoreContext};
use tracing_subscriber::EnvFilter;

/// Command-line interface for the registered servers store
#[derive(Parser)]
#[command(name = "regsrv")]
#[command(author, version, about = "Registered servers command-line interface")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration directory
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the store file, overriding the configured location
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List groups and servers
    #[command(about = "List the groups and servers of the store")]
    List {
        /// Output format
        #[arg(short, long, default_value = "table", value_enum)]
        format: OutputFormat,

        /// Only list below this group path
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Create a server group
    #[command(about = "Create a server group under an existing group")]
    AddGroup {
        /// Parent group path, e.g. DatabaseEngineServerGroup/Prod
        #[arg(short, long, default_value = "DatabaseEngineServerGroup")]
        parent: String,

        /// Name of the new group
        name: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Register a server
    #[command(about = "Register a server in a group")]
    AddServer {
        /// Group path
        #[arg(short, long, default_value = "DatabaseEngineServerGroup")]
        group: String,

        /// Display name of the registration
        name: String,

        /// Server to connect to (defaults to the display name)
        #[arg(short = 'S', long)]
        server_name: Option<String>,

        /// Full connection string
        #[arg(long)]
        connection_string: Option<String>,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Credentials kept in the store
        #[arg(long, default_value = "None", value_parser = parse_policy)]
        credentials: CredentialPersistenceType,
    },

    /// Remove a server or a group with everything below it
    #[command(about = "Remove a server or group by path")]
    Remove {
        /// Server or group path
        path: String,
    },

    /// Rename a server or group
    #[command(about = "Rename a server or group")]
    Rename {
        /// Server or group path
        path: String,

        /// New name
        new_name: String,
    },

    /// Move a server or group to another group
    #[command(about = "Move a server or group to another group")]
    Move {
        /// Server or group path
        path: String,

        /// Destination group path
        to: String,
    },

    /// Export a server or group subtree
    #[command(about = "Export a server or group to a document")]
    Export {
        /// Server or group path
        path: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Credentials written to the document (defaults to the configured policy)
        #[arg(long, value_parser = parse_policy)]
        credentials: Option<CredentialPersistenceType>,
    },

    /// Import an exported document
    #[command(about = "Import a server or group document")]
    Import {
        /// Input file path
        file: PathBuf,

        /// Target group path
        #[arg(short, long, default_value = "DatabaseEngineServerGroup")]
        into: String,

        /// What to do with servers whose name is already taken
        #[arg(long, default_value = "skip", value_enum)]
        on_conflict: ConflictArg,
    },

    /// Migrate a legacy registration file
    #[command(about = "Migrate servers from a legacy registration file")]
    Migrate {
        /// Legacy file (defaults to the first legacy location found)
        file: Option<PathBuf>,
    },

    /// Show file locations
    #[command(about = "Show the configuration and store file locations")]
    ShowPath,
}

/// Output format for the list command
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Indented tree
    #[default]
    Table,
    /// JSON array of entries
    Json,
}

/// Duplicate handling for the import command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConflictArg {
    /// Replace the existing server
    Overwrite,
    /// Keep the existing server
    Skip,
    /// Stop at the first duplicate
    Cancel,
}

impl From<ConflictArg> for DuplicateAction {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Overwrite => Self::Overwrite,
            ConflictArg::Skip => Self::Skip,
            ConflictArg::Cancel => Self::CancelAll,
        }
    }
}

/// Parse a credential persistence policy name
fn parse_policy(s: &str) -> Result<CredentialPersistenceType, String> {
    s.parse().map_err(|e: RegistryError| e.to_string())
}

fn main() {
    let cli = Cli::parse();

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_manager = match cli.config {
        Some(dir) => ConfigManager::with_config_dir(dir),
        None => ConfigManager::new()
            .map_err(|e| CliError::Config(format!("Failed to initialize config: {e}")))?,
    };
    let mut settings = config_manager
        .load_settings()
        .map_err(|e| CliError::Config(format!("Failed to load settings: {e}")))?;
    if let Some(store) = cli.store {
        settings.store.file = Some(store);
    }

    init_logging(&settings, cli.verbose);

    let cli_context = CliContext::new(config_manager, settings)?;

    match cli.command {
        Commands::List { format, group } => cmd_list(&cli_context, format, group.as_deref()),
        Commands::AddGroup {
            parent,
            name,
            description,
        } => cmd_add_group(&cli_context, &parent, &name, description),
        Commands::AddServer {
            group,
            name,
            server_name,
            connection_string,
            description,
            credentials,
        } => cmd_add_server(
            &cli_context,
            &group,
            NewServer {
                name,
                server_name,
                connection_string,
                description,
                credentials,
            },
        ),
        Commands::Remove { path } => cmd_remove(&cli_context, &path),
        Commands::Rename { path, new_name } => cmd_rename(&cli_context, &path, &new_name),
        Commands::Move { path, to } => cmd_move(&cli_context, &path, &to),
        Commands::Export {
            path,
            output,
            credentials,
        } => cmd_export(&cli_context, &path, &output, credentials),
        Commands::Import {
            file,
            into,
            on_conflict,
        } => cmd_import(&cli_context, &file, &into, on_conflict),
        Commands::Migrate { file } => cmd_migrate(&cli_context, file),
        Commands::ShowPath => {
            cmd_show_path(&cli_context);
            Ok(())
        }
    }
}

/// Initializes tracing, preferring `RUST_LOG` over the configured level
fn init_logging(settings: &RegistrySettings, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.as_str()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Store access
// ============================================================================

/// Loaded configuration plus the store context built from it
pub struct CliContext {
    config_manager: ConfigManager,
    settings: RegistrySettings,
    context: StoreContext,
}

impl CliContext {
    fn new(config_manager: ConfigManager, settings: RegistrySettings) -> Result<Self, CliError> {
        let paths = config_manager
            .store_paths(&settings)
            .map_err(|e| CliError::Config(format!("Failed to resolve store location: {e}")))?;
        tracing::debug!(store = %paths.current().display(), "Resolved store location");
        let codec = CredentialCodec::machine().map_err(|e| {
            CliError::Config(format!("Failed to initialize credential protection: {e}"))
        })?;
        Ok(Self {
            config_manager,
            settings,
            context: StoreContext::new(paths, codec),
        })
    }

    /// Runs `f` against the local store
    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut RegisteredServersStore) -> Result<T, CliError>,
    ) -> Result<T, CliError> {
        let shared = self.context.local_store()?;
        let mut store = shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

/// A server or group found by path
#[derive(Debug, Clone, Copy)]
enum Target {
    Group(GroupId),
    Server(ServerId),
}

/// Resolves a group path, creating a missing built-in top-level group
fn resolve_group(store: &mut RegisteredServersStore, path: &str) -> Result<GroupId, CliError> {
    if let Some(id) = store.resolve_group_path(path) {
        return Ok(id);
    }
    let trimmed = path.trim_matches('/');
    if let Some(server_type) = ServerType::from_group_name(trimmed) {
        return Ok(store.server_group(server_type)?);
    }
    Err(CliError::NotFound(format!("Group not found: {path}")))
}

/// Resolves a path to a server first, then to a group
fn resolve_target(store: &RegisteredServersStore, path: &str) -> Result<Target, CliError> {
    if let Some(id) = store.resolve_server_path(path) {
        return Ok(Target::Server(id));
    }
    store
        .resolve_group_path(path)
        .map(Target::Group)
        .ok_or_else(|| CliError::NotFound(format!("No server or group at: {path}")))
}

// ============================================================================
// List command
// ============================================================================

/// One line of the list output
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EntryOutput {
    pub path: String,
    pub kind: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

fn cmd_list(cli: &CliContext, format: OutputFormat, group: Option<&str>) -> Result<(), CliError> {
    let entries = cli.with_store(|store| {
        let roots: Vec<GroupId> = match group {
            Some(path) => vec![store
                .resolve_group_path(path)
                .ok_or_else(|| CliError::NotFound(format!("Group not found: {path}")))?],
            None => store.root_groups().iter().map(|g| g.handle()).collect(),
        };
        let mut entries = Vec::new();
        for root in roots {
            collect_entries(store, root, 0, &mut entries);
        }
        Ok(entries)
    })?;

    match format {
        OutputFormat::Table => println!("{}", format_tree(&entries)),
        OutputFormat::Json => println!("{}", format_json(&entries)?),
    }
    Ok(())
}

fn collect_entries(
    store: &RegisteredServersStore,
    id: GroupId,
    depth: usize,
    entries: &mut Vec<EntryOutput>,
) {
    let Some(group) = store.group(id) else {
        return;
    };
    let path = store.group_path(id).unwrap_or_else(|| group.name().to_string());
    entries.push(EntryOutput {
        path: path.clone(),
        kind: "group".to_string(),
        depth,
        server_name: None,
        description: group.description.clone(),
    });
    for server in store.servers_in(id) {
        entries.push(EntryOutput {
            path: format!("{path}/{}", server.name()),
            kind: "server".to_string(),
            depth: depth + 1,
            server_name: Some(server.server_name().to_string()),
            description: server.description.clone(),
        });
    }
    let children: Vec<GroupId> = store.child_groups(id).iter().map(|g| g.handle()).collect();
    for child in children {
        collect_entries(store, child, depth + 1, entries);
    }
}

/// Format entries as an indented tree
#[must_use]
pub fn format_tree(entries: &[EntryOutput]) -> String {
    if entries.is_empty() {
        return "No groups found.".to_string();
    }

    let mut output = String::new();
    for entry in entries {
        let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
        let indent = "  ".repeat(entry.depth);
        match &entry.server_name {
            Some(server_name) => {
                let _ = writeln!(output, "{indent}{name}  ({server_name})");
            }
            None => {
                let _ = writeln!(output, "{indent}{name}/");
            }
        }
    }
    output.trim_end().to_string()
}

/// Format entries as a JSON array
///
/// # Errors
///
/// Returns `CliError::Config` if JSON serialization fails.
pub fn format_json(entries: &[EntryOutput]) -> Result<String, CliError> {
    serde_json::to_string_pretty(entries)
        .map_err(|e| CliError::Config(format!("Failed to serialize to JSON: {e}")))
}

// ============================================================================
// Create, rename, move and remove commands
// ============================================================================

fn cmd_add_group(
    cli: &CliContext,
    parent: &str,
    name: &str,
    description: Option<String>,
) -> Result<(), CliError> {
    cli.with_store(|store| {
        let parent_id = resolve_group(store, parent)?;
        let mut group = ServerGroup::new(name);
        if let Some(description) = description {
            group = group.with_description(description);
        }
        store.create_group(GroupParent::Group(parent_id), group)?;
        Ok(())
    })?;
    println!("Created group '{name}' in '{parent}'");
    Ok(())
}

/// Arguments of the add-server command
struct NewServer {
    name: String,
    server_name: Option<String>,
    connection_string: Option<String>,
    description: Option<String>,
    credentials: CredentialPersistenceType,
}

fn cmd_add_server(cli: &CliContext, group: &str, new: NewServer) -> Result<(), CliError> {
    let mut server = RegisteredServer::new(new.name.as_str());
    server = match (&new.connection_string, &new.server_name) {
        (Some(connection_string), _) => server.with_connection_string(connection_string),
        (None, Some(server_name)) => server.with_server_name(server_name),
        (None, None) => server.with_server_name(&new.name),
    };
    if let (Some(_), Some(server_name)) = (&new.connection_string, &new.server_name) {
        server.set_server_name(server_name);
    }
    if let Some(description) = new.description {
        server = server.with_description(description);
    }
    server = server.with_credential_persistence_type(new.credentials);

    cli.with_store(|store| {
        let group_id = resolve_group(store, group)?;
        store.create_server(group_id, server)?;
        Ok(())
    })?;
    println!("Registered server '{}' in '{group}'", new.name);
    Ok(())
}

fn cmd_remove(cli: &CliContext, path: &str) -> Result<(), CliError> {
    let removed = cli.with_store(|store| match resolve_target(store, path)? {
        Target::Server(id) => Ok(format!("server '{}'", store.drop_server(id)?.name())),
        Target::Group(id) => Ok(format!("group '{}'", store.drop_group(id)?.name())),
    })?;
    println!("Removed {removed}");
    Ok(())
}

fn cmd_rename(cli: &CliContext, path: &str, new_name: &str) -> Result<(), CliError> {
    cli.with_store(|store| match resolve_target(store, path)? {
        Target::Server(id) => Ok(store.rename_server(id, new_name)?),
        Target::Group(id) => Ok(store.rename_group(id, new_name)?),
    })?;
    println!("Renamed '{path}' to '{new_name}'");
    Ok(())
}

fn cmd_move(cli: &CliContext, path: &str, to: &str) -> Result<(), CliError> {
    cli.with_store(|store| {
        let target = resolve_target(store, path)?;
        let destination = resolve_group(store, to)?;
        match target {
            Target::Server(id) => store.move_server(id, destination)?,
            Target::Group(id) => store.move_group(id, destination)?,
        }
        Ok(())
    })?;
    println!("Moved '{path}' to '{to}'");
    Ok(())
}

// ============================================================================
// Export, import and migrate commands
// ============================================================================

fn cmd_export(
    cli: &CliContext,
    path: &str,
    output: &Path,
    credentials: Option<CredentialPersistenceType>,
) -> Result<(), CliError> {
    let policy = credentials.unwrap_or(cli.settings.export.credential_persistence);
    let summary = cli.with_store(|store| {
        let summary = match resolve_target(store, path)? {
            Target::Server(id) => export_server(store, id, output, policy)?,
            Target::Group(id) => export_group(store, id, output, policy)?,
        };
        Ok(summary)
    })?;
    println!("{} to {}", summary.summary(), output.display());
    Ok(())
}

fn cmd_import(
    cli: &CliContext,
    file: &Path,
    into: &str,
    on_conflict: ConflictArg,
) -> Result<(), CliError> {
    let mut resolver = |conflict: &DuplicateFound| {
        eprintln!("{} '{}' already exists", conflict.kind, conflict.name);
        DuplicateDecision::for_all(on_conflict.into())
    };
    let outcome = cli.with_store(|store| {
        let target = resolve_group(store, into)?;
        Ok(import_file(store, target, file, &mut resolver)?)
    })?;

    let summary = outcome.summary();
    if outcome.is_cancelled() {
        println!("Import cancelled. {}", summary.summary());
        return Err(CliError::Cancelled);
    }
    println!("Import complete. {}", summary.summary());
    for name in summary.groups_skipped.iter().chain(&summary.servers_skipped) {
        println!("  Skipped: {name}");
    }
    Ok(())
}

fn cmd_migrate(cli: &CliContext, file: Option<PathBuf>) -> Result<(), CliError> {
    let source = match file {
        Some(file) => file,
        None => cli
            .context
            .paths()
            .legacy()
            .iter()
            .find(|candidate| candidate.exists())
            .cloned()
            .ok_or_else(|| CliError::NotFound("No legacy registration file found".to_string()))?,
    };

    let report = cli.with_store(|store| Ok(migrate_legacy_file(store, &source)?))?;
    println!("Migrated {}. {}", source.display(), report.summary());
    for name in &report.passwords_dropped {
        println!("  Password dropped: {name}");
    }
    Ok(())
}

fn cmd_show_path(cli: &CliContext) {
    println!("Config directory: {}", cli.config_manager.config_dir().display());
    println!("Store file: {}", cli.context.paths().current().display());
    for candidate in cli.context.paths().legacy() {
        let marker = if candidate.exists() { "*" } else { " " };
        println!("  {marker} legacy: {}", candidate.display());
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Exit codes for CLI operations
pub mod exit_codes {
    /// Success - operation completed successfully
    pub const SUCCESS: i32 = 0;
    /// General error - configuration, validation, or store errors
    pub const GENERAL_ERROR: i32 = 1;
    /// A server or group path did not resolve
    pub const NOT_FOUND: i32 = 2;
    /// An import was cancelled on a duplicate
    pub const CANCELLED: i32 = 3;
}

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path did not resolve
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store operation failed
    #[error(transparent)]
    Store(#[from] RegistryError),

    /// Import stopped on a duplicate
    #[error("Import cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Returns the appropriate exit code for this error type.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) | Self::Store(RegistryError::NotFound { .. }) => exit_codes::NOT_FOUND,
            Self::Cancelled => exit_codes::CANCELLED,
            Self::Config(_) | Self::Store(_) | Self::Io(_) => exit_codes::GENERAL_ERROR,
        }
    }
}
