//! Migration of legacy registration files.
//!
//! Legacy files have a `RegisteredServers` root holding one `ServerType`
//! element per server type (keyed by a fixed GUID). Each contains nested
//! `Group` and `Server` elements; a server carries its connection details in a
//! `ConnectionInformation` child:
//!
//! ```xml
//! <RegisteredServers>
//!   <ServerType id="8c91a03d-f9b4-46c0-a305-b5dcc79ff907" name="Database Engine">
//!     <Group name="Legacy1" description="">
//!       <Server name="Old1" description="">
//!         <ConnectionInformation>
//!           <ServerName>Old1</ServerName>
//!           <AuthenticationType>0</AuthenticationType>
//!           <UserName />
//!           <AdvancedOptions>
//!             <CONNECTION_TIMEOUT>15</CONNECTION_TIMEOUT>
//!           </AdvancedOptions>
//!         </ConnectionInformation>
//!       </Server>
//!     </Group>
//!   </ServerType>
//! </RegisteredServers>
//! ```

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::connection_string::ConnectionStringBuilder;
use crate::error::{CryptoError, Operation, RegistryError, RegistryResult};
use crate::models::{
    CredentialPersistenceType, GroupId, GroupParent, RegisteredServer, ServerGroup, ServerType,
};
use crate::secret::CredentialCodec;
use crate::store::RegisteredServersStore;

const ROOT_ELEMENT: &str = "RegisteredServers";
const SERVER_TYPE_ELEMENT: &str = "ServerType";
const GROUP_ELEMENT: &str = "Group";
const SERVER_ELEMENT: &str = "Server";
const CONNECTION_ELEMENT: &str = "ConnectionInformation";
const ADVANCED_OPTIONS_ELEMENT: &str = "AdvancedOptions";

/// Authentication type value meaning integrated security
pub const INTEGRATED_AUTHENTICATION: i32 = 0;

/// Advanced option names mapped to connection string keys
const ADVANCED_OPTION_KEYS: [(&str, &str); 9] = [
    ("CONNECTION_TIMEOUT", "connect timeout"),
    ("EXEC_TIMEOUT", "command timeout"),
    ("DATABASE", "initial catalog"),
    ("PACKET_SIZE", "packet size"),
    ("ENCRYPT_CONNECTION", "encrypt"),
    ("TRUST_SERVER_CERTIFICATE", "trust server certificate"),
    ("APP_NAME", "application name"),
    ("WORKSTATION_ID", "workstation id"),
    ("NETWORK_PROTOCOL", "network library"),
];

/// Analysis Services uses its own keys for some options
const ANALYSIS_SERVICES_OPTION_KEYS: [(&str, &str); 5] = [
    ("CONNECTION_TIMEOUT", "connect timeout"),
    ("EXEC_TIMEOUT", "timeout"),
    ("DATABASE", "catalog"),
    ("PACKET_SIZE", "packet size"),
    ("APP_NAME", "application name"),
];

const USE_CUSTOM_COLOR_OPTION: &str = "USE_CUSTOM_CONNECTION_COLOR";
const CUSTOM_COLOR_OPTION: &str = "CUSTOM_CONNECTION_COLOR";

/// A parsed legacy file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyDocument {
    /// One entry per `ServerType` block, in document order
    pub server_types: Vec<LegacyServerType>,
}

/// Groups and servers registered for one server type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyServerType {
    /// Type named by the block's `id` attribute
    pub server_type: ServerType,
    /// Top-level groups of the block
    pub groups: Vec<LegacyGroup>,
    /// Servers registered outside any group
    pub servers: Vec<LegacyServer>,
}

/// A `Group` element with its nested groups and servers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyGroup {
    /// Group name
    pub name: String,
    /// Group description
    pub description: String,
    /// Nested groups, in document order
    pub groups: Vec<LegacyGroup>,
    /// Servers in this group, in document order
    pub servers: Vec<LegacyServer>,
}

/// A `Server` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyServer {
    /// Display name of the registration
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Connection settings of the registration
    pub connection: LegacyConnection,
}

/// Contents of a `ConnectionInformation` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyConnection {
    /// Target server name
    pub server_name: String,
    /// Name shown by the owning tool, often empty
    pub display_name: String,
    /// 0 for integrated authentication, otherwise a login
    pub authentication_type: i32,
    /// Login name for non-integrated authentication
    pub user_name: String,
    /// Protected password text, if one was saved
    pub password: Option<String>,
    /// Advanced option elements as (name, value) in document order
    pub advanced_options: Vec<(String, String)>,
}

/// What a migration did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Groups that did not exist before
    pub groups_created: usize,
    /// Existing groups the legacy content was added to
    pub groups_reused: usize,
    /// Servers created
    pub servers_created: usize,
    /// Servers not migrated because the name was already taken
    pub servers_skipped: Vec<String>,
    /// Servers whose saved password could not be unprotected
    pub passwords_dropped: Vec<String>,
}

impl MigrationReport {
    /// Returns a summary string of the migration
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Groups: {} created, {} reused; Servers: {} created, {} skipped; Passwords dropped: {}",
            self.groups_created,
            self.groups_reused,
            self.servers_created,
            self.servers_skipped.len(),
            self.passwords_dropped.len()
        )
    }
}

// ========== Parsing ==========

enum Frame {
    Root(Vec<LegacyServerType>),
    ServerType(LegacyServerType),
    Group(LegacyGroup),
    Server {
        server: LegacyServer,
        has_connection: bool,
    },
    Connection(LegacyConnection),
    Field {
        name: String,
        text: String,
    },
    Options(Vec<(String, String)>),
    AdvancedOption {
        name: String,
        text: String,
    },
    /// Unrecognised `ConnectionInformation` child, skipped with its content
    Ignored,
}

/// Parses a legacy registration document
///
/// # Errors
///
/// Returns `LegacyFormat` naming the offending element for a wrong root, an
/// unexpected element, a missing required attribute, an unknown server type
/// or a server without connection information; `Xml` for malformed XML.
pub fn parse_legacy_document(xml: &str) -> RegistryResult<LegacyDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Frame> = Vec::new();
    let mut document: Option<LegacyDocument> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let frame = open_frame(&e, stack.last(), document.is_some())?;
                stack.push(frame);
            }
            Ok(Event::Empty(e)) => {
                let frame = open_frame(&e, stack.last(), document.is_some())?;
                close_frame(frame, &mut stack, &mut document)?;
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| RegistryError::Xml("unbalanced end tag".into()))?;
                close_frame(frame, &mut stack, &mut document)?;
            }
            Ok(Event::Text(e)) => append_text(&mut stack, &String::from_utf8_lossy(&e)),
            Ok(Event::CData(e)) => append_text(&mut stack, &String::from_utf8_lossy(&e)),
            Ok(Event::GeneralRef(e)) => {
                let entity = String::from_utf8_lossy(&e).to_string();
                let resolved = resolve_entity(&entity).ok_or_else(|| {
                    RegistryError::Xml(format!("unknown entity reference '&{entity};'"))
                })?;
                append_text(&mut stack, &resolved.to_string());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RegistryError::Xml(format!(
                    "parse error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(RegistryError::Xml("document ended inside an element".into()));
    }
    document.ok_or_else(|| RegistryError::legacy(ROOT_ELEMENT, "document has no root element"))
}

fn open_frame(e: &BytesStart<'_>, parent: Option<&Frame>, finished: bool) -> RegistryResult<Frame> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let unexpected = |inside: &str| {
        RegistryError::legacy(&name, format!("unexpected element inside {inside}"))
    };

    match parent {
        None if finished => Err(RegistryError::legacy(&name, "document has more than one root element")),
        None if name == ROOT_ELEMENT => Ok(Frame::Root(Vec::new())),
        None => Err(RegistryError::legacy(
            &name,
            format!("expected root element {ROOT_ELEMENT}"),
        )),
        Some(Frame::Root(_)) if name == SERVER_TYPE_ELEMENT => {
            let id = required_attribute(e, &name, "id")?;
            let server_type = ServerType::from_legacy_id(&id).ok_or_else(|| {
                RegistryError::legacy(&name, format!("unknown server type id '{id}'"))
            })?;
            Ok(Frame::ServerType(LegacyServerType {
                server_type,
                groups: Vec::new(),
                servers: Vec::new(),
            }))
        }
        Some(Frame::Root(_)) => Err(unexpected(ROOT_ELEMENT)),
        Some(Frame::ServerType(_) | Frame::Group(_)) => match name.as_str() {
            GROUP_ELEMENT => Ok(Frame::Group(LegacyGroup {
                name: required_attribute(e, &name, "name")?,
                description: optional_attribute(e, "description")?,
                ..LegacyGroup::default()
            })),
            SERVER_ELEMENT => Ok(Frame::Server {
                server: LegacyServer {
                    name: required_attribute(e, &name, "name")?,
                    description: optional_attribute(e, "description")?,
                    connection: LegacyConnection::default(),
                },
                has_connection: false,
            }),
            _ => Err(unexpected(GROUP_ELEMENT)),
        },
        Some(Frame::Server { .. }) if name == CONNECTION_ELEMENT => {
            Ok(Frame::Connection(LegacyConnection::default()))
        }
        Some(Frame::Server { .. }) => Err(unexpected(SERVER_ELEMENT)),
        Some(Frame::Connection(_)) => match name.as_str() {
            ADVANCED_OPTIONS_ELEMENT => Ok(Frame::Options(Vec::new())),
            "ServerType" | "ServerName" | "DisplayName" | "AuthenticationType" | "UserName"
            | "Password" => Ok(Frame::Field {
                name,
                text: String::new(),
            }),
            _ => {
                tracing::debug!(element = %name, "Ignoring unknown connection information element");
                Ok(Frame::Ignored)
            }
        },
        Some(Frame::Options(_)) => Ok(Frame::AdvancedOption {
            name,
            text: String::new(),
        }),
        Some(Frame::Field { name: field, .. } | Frame::AdvancedOption { name: field, .. }) => {
            Err(unexpected(field))
        }
        Some(Frame::Ignored) => Ok(Frame::Ignored),
    }
}

fn close_frame(
    frame: Frame,
    stack: &mut [Frame],
    document: &mut Option<LegacyDocument>,
) -> RegistryResult<()> {
    match (stack.last_mut(), frame) {
        (None, Frame::Root(server_types)) => *document = Some(LegacyDocument { server_types }),
        (Some(Frame::Root(types)), Frame::ServerType(block)) => types.push(block),
        (Some(Frame::ServerType(block)), Frame::Group(group)) => block.groups.push(group),
        (Some(Frame::Group(parent)), Frame::Group(group)) => parent.groups.push(group),
        (Some(parent), Frame::Server {
            server,
            has_connection,
        }) => {
            if !has_connection {
                return Err(RegistryError::legacy(
                    SERVER_ELEMENT,
                    format!("server '{}' has no {CONNECTION_ELEMENT}", server.name),
                ));
            }
            match parent {
                Frame::ServerType(block) => block.servers.push(server),
                Frame::Group(group) => group.servers.push(server),
                _ => return Err(RegistryError::legacy(SERVER_ELEMENT, "misplaced server")),
            }
        }
        (
            Some(Frame::Server {
                server,
                has_connection,
            }),
            Frame::Connection(connection),
        ) => {
            if *has_connection {
                return Err(RegistryError::legacy(
                    CONNECTION_ELEMENT,
                    format!("server '{}' has more than one {CONNECTION_ELEMENT}", server.name),
                ));
            }
            server.connection = connection;
            *has_connection = true;
        }
        (Some(Frame::Connection(connection)), Frame::Field { name, text }) => {
            set_field(connection, &name, text.trim())?;
        }
        (Some(Frame::Connection(connection)), Frame::Options(options)) => {
            connection.advanced_options.extend(options);
        }
        (Some(Frame::Options(options)), Frame::AdvancedOption { name, text }) => {
            options.push((name, text.trim().to_string()));
        }
        (Some(Frame::Connection(_) | Frame::Ignored), Frame::Ignored) => {}
        (_, frame) => {
            return Err(RegistryError::legacy(frame.element(), "misplaced element"));
        }
    }
    Ok(())
}

impl Frame {
    fn element(&self) -> &str {
        match self {
            Self::Root(_) => ROOT_ELEMENT,
            Self::ServerType(_) => SERVER_TYPE_ELEMENT,
            Self::Group(_) => GROUP_ELEMENT,
            Self::Server { .. } => SERVER_ELEMENT,
            Self::Connection(_) => CONNECTION_ELEMENT,
            Self::Options(_) => ADVANCED_OPTIONS_ELEMENT,
            Self::Field { name, .. } | Self::AdvancedOption { name, .. } => name,
            Self::Ignored => "unknown",
        }
    }
}

fn set_field(connection: &mut LegacyConnection, field: &str, value: &str) -> RegistryResult<()> {
    match field {
        "ServerName" => connection.server_name = value.to_string(),
        "DisplayName" => connection.display_name = value.to_string(),
        "UserName" => connection.user_name = value.to_string(),
        "Password" => connection.password = (!value.is_empty()).then(|| value.to_string()),
        "AuthenticationType" => {
            connection.authentication_type = if value.is_empty() {
                INTEGRATED_AUTHENTICATION
            } else {
                value.parse().map_err(|_| {
                    RegistryError::legacy(field, format!("'{value}' is not a number"))
                })?
            };
        }
        // The enclosing ServerType block decides the type.
        _ => {}
    }
    Ok(())
}

fn append_text(stack: &mut [Frame], text: &str) {
    if let Some(Frame::Field { text: buffer, .. } | Frame::AdvancedOption { text: buffer, .. }) =
        stack.last_mut()
    {
        buffer.push_str(text);
    }
}

fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn optional_attribute(e: &BytesStart<'_>, key: &str) -> RegistryResult<String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| RegistryError::Xml(err.to_string()))?;
        if attr.key.as_ref().eq_ignore_ascii_case(key.as_bytes()) {
            return Ok(attr
                .unescape_value()
                .map_err(|err| RegistryError::Xml(err.to_string()))?
                .into_owned());
        }
    }
    Ok(String::new())
}

fn required_attribute(e: &BytesStart<'_>, element: &str, key: &str) -> RegistryResult<String> {
    let value = optional_attribute(e, key)?;
    if value.trim().is_empty() {
        return Err(RegistryError::legacy(
            element,
            format!("missing required attribute '{key}'"),
        ));
    }
    Ok(value)
}

// ========== Migration ==========

/// Migrates a legacy registration file into `store`
///
/// # Errors
///
/// Returns `LegacyFormat` or `Xml` for a malformed document and
/// `OperationFailed` (Migrate) for read and store failures.
pub fn migrate_legacy_file(
    store: &mut RegisteredServersStore,
    path: &Path,
) -> RegistryResult<MigrationReport> {
    let xml = fs::read_to_string(path)
        .map_err(|e| RegistryError::from(e).into_operation_failure(Operation::Migrate))?;
    let document = parse_legacy_document(&xml)?;
    tracing::info!(
        path = %path.display(),
        blocks = document.server_types.len(),
        "Migrating legacy registered servers"
    );
    migrate_legacy(store, &document)
}

/// Converts a parsed legacy document into groups and servers of `store`
///
/// Automatic serialization is suspended while the tree is converted and the
/// store is written once at the end.
///
/// # Errors
///
/// Returns `OperationFailed` (Migrate) wrapping the cause; out-of-memory
/// crypto failures propagate unwrapped.
pub fn migrate_legacy(
    store: &mut RegisteredServersStore,
    document: &LegacyDocument,
) -> RegistryResult<MigrationReport> {
    let previous = store.serialize_on_creation();
    store.set_serialize_on_creation(false);
    let result = convert(store, document);
    store.set_serialize_on_creation(previous);

    let report = result.map_err(|e| e.into_operation_failure(Operation::Migrate))?;
    if previous && store.is_local() {
        store
            .serialize()
            .map_err(|e| e.into_operation_failure(Operation::Migrate))?;
    }
    tracing::info!(summary = %report.summary(), "Legacy migration finished");
    Ok(report)
}

fn convert(
    store: &mut RegisteredServersStore,
    document: &LegacyDocument,
) -> RegistryResult<MigrationReport> {
    let mut report = MigrationReport::default();
    for block in &document.server_types {
        let root = store.server_group(block.server_type)?;
        migrate_servers(store, root, block.server_type, &block.servers, &mut report)?;
        for group in &block.groups {
            migrate_group(store, root, block.server_type, group, &mut report)?;
        }
    }
    Ok(report)
}

fn migrate_group(
    store: &mut RegisteredServersStore,
    parent: GroupId,
    server_type: ServerType,
    legacy: &LegacyGroup,
    report: &mut MigrationReport,
) -> RegistryResult<()> {
    let group = match store.find_child_group(GroupParent::Group(parent), &legacy.name) {
        Some(existing) => {
            report.groups_reused += 1;
            existing
        }
        None => {
            let created = store.create_group(
                GroupParent::Group(parent),
                ServerGroup::new(&legacy.name).with_description(&legacy.description),
            )?;
            report.groups_created += 1;
            created
        }
    };
    migrate_servers(store, group, server_type, &legacy.servers, report)?;
    for child in &legacy.groups {
        migrate_group(store, group, server_type, child, report)?;
    }
    Ok(())
}

fn migrate_servers(
    store: &mut RegisteredServersStore,
    group: GroupId,
    server_type: ServerType,
    servers: &[LegacyServer],
    report: &mut MigrationReport,
) -> RegistryResult<()> {
    for legacy in servers {
        if store.find_server(group, &legacy.name).is_some() {
            tracing::warn!(server = %legacy.name, "Skipping legacy server with a duplicate name");
            report.servers_skipped.push(legacy.name.clone());
            continue;
        }
        let server = convert_server(legacy, server_type, store.codec(), report)?;
        store.create_server(group, server)?;
        report.servers_created += 1;
    }
    Ok(())
}

/// Builds a server with a best-effort connection string from legacy fields
fn convert_server(
    legacy: &LegacyServer,
    server_type: ServerType,
    codec: &CredentialCodec,
    report: &mut MigrationReport,
) -> RegistryResult<RegisteredServer> {
    let connection = &legacy.connection;
    let server_name = if connection.server_name.is_empty() {
        legacy.name.as_str()
    } else {
        connection.server_name.as_str()
    };

    let mut server = RegisteredServer::new(&legacy.name).with_description(&legacy.description);
    server.server_type = server_type;
    server.authentication_type = Some(connection.authentication_type);

    let mut builder = ConnectionStringBuilder::new();
    builder.set_server_name(server_type, server_name);
    if connection.authentication_type == INTEGRATED_AUTHENTICATION {
        builder.set("integrated security", "true");
    } else {
        if !connection.user_name.is_empty() {
            builder.set("user id", connection.user_name.as_str());
        }
        if let Some(protected) = &connection.password {
            match codec.unprotect(protected) {
                Ok(password) => builder.set("password", password),
                Err(CryptoError::ResourceExhausted) => {
                    return Err(CryptoError::ResourceExhausted.into());
                }
                Err(e) => {
                    tracing::warn!(server = %legacy.name, error = %e, "Dropping legacy password that cannot be unprotected");
                    report.passwords_dropped.push(legacy.name.clone());
                }
            }
        }
    }

    for (option, value) in &connection.advanced_options {
        match option.as_str() {
            USE_CUSTOM_COLOR_OPTION => server.use_custom_connection_color = is_true(value),
            CUSTOM_COLOR_OPTION => match value.parse() {
                Ok(argb) => server.custom_connection_color_argb = argb,
                Err(_) => tracing::warn!(server = %legacy.name, value = %value, "Ignoring invalid legacy color"),
            },
            _ => match map_advanced_option(server_type, option, value) {
                Some((key, mapped)) => builder.set(key, mapped),
                None => tracing::debug!(option = %option, "Ignoring unmapped legacy option"),
            },
        }
    }

    server.set_connection_string(&builder.to_string());
    server.set_credential_persistence_type(CredentialPersistenceType::PersistLoginNameAndPassword);
    Ok(server)
}

/// Maps one legacy advanced option to a connection string key and value
fn map_advanced_option(
    server_type: ServerType,
    option: &str,
    value: &str,
) -> Option<(&'static str, String)> {
    if value.is_empty() {
        return None;
    }
    if server_type == ServerType::AnalysisServices {
        if option == "ENCRYPT_CONNECTION" {
            return is_true(value).then(|| ("protection level", "PktPrivacy".to_string()));
        }
        return ANALYSIS_SERVICES_OPTION_KEYS
            .iter()
            .find(|(name, _)| *name == option)
            .map(|(_, key)| (*key, value.to_string()));
    }
    ADVANCED_OPTION_KEYS
        .iter()
        .find(|(name, _)| *name == option)
        .map(|(_, key)| {
            let value = match value.to_ascii_lowercase().as_str() {
                "true" | "false" => value.to_ascii_lowercase(),
                _ => value.to_string(),
            };
            (*key, value)
        })
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::MachineProtector;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ENGINE_ID: &str = "8c91a03d-f9b4-46c0-a305-b5dcc79ff907";

    fn test_codec() -> CredentialCodec {
        CredentialCodec::new(Arc::new(MachineProtector::with_secret(b"legacy-tests").unwrap()))
    }

    fn create_test_store() -> (RegisteredServersStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RegisteredServersStore::new_local(temp_dir.path().join("RegSrvr.xml"), test_codec());
        (store, temp_dir)
    }

    fn legacy_xml(servers: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<RegisteredServers>
  <ServerType id="{{{ENGINE_ID}}}" name="Database Engine">
    <Group name="Legacy1" description="old &amp; gold">
      {servers}
    </Group>
  </ServerType>
</RegisteredServers>"#
        )
    }

    const INTEGRATED_SERVER: &str = r"
      <Server name='Old1' description=''>
        <ConnectionInformation>
          <ServerType>8c91a03d-f9b4-46c0-a305-b5dcc79ff907</ServerType>
          <ServerName>Old1</ServerName>
          <DisplayName>Old1</DisplayName>
          <AuthenticationType>0</AuthenticationType>
          <UserName />
          <AdvancedOptions>
            <CONNECTION_TIMEOUT>15</CONNECTION_TIMEOUT>
            <EXEC_TIMEOUT>30</EXEC_TIMEOUT>
            <USE_CUSTOM_CONNECTION_COLOR>True</USE_CUSTOM_CONNECTION_COLOR>
          </AdvancedOptions>
        </ConnectionInformation>
      </Server>";

    #[test]
    fn test_parse_legacy_document() {
        let document = parse_legacy_document(&legacy_xml(INTEGRATED_SERVER)).unwrap();
        assert_eq!(document.server_types.len(), 1);
        let block = &document.server_types[0];
        assert_eq!(block.server_type, ServerType::DatabaseEngine);
        let group = &block.groups[0];
        assert_eq!(group.name, "Legacy1");
        assert_eq!(group.description, "old & gold");
        let server = &group.servers[0];
        assert_eq!(server.connection.server_name, "Old1");
        assert_eq!(server.connection.authentication_type, 0);
        assert_eq!(server.connection.password, None);
        assert_eq!(
            server.connection.advanced_options[0],
            ("CONNECTION_TIMEOUT".to_string(), "15".to_string())
        );
    }

    #[test]
    fn test_wrong_root_names_element() {
        let err = parse_legacy_document("<RegisteredServersStore/>").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::LegacyFormat { ref element, .. } if element == "RegisteredServersStore"
        ));
    }

    #[test]
    fn test_unknown_element_names_element() {
        let xml = legacy_xml("<Folder name='x'/>");
        let err = parse_legacy_document(&xml).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::LegacyFormat { ref element, .. } if element == "Folder"
        ));
    }

    #[test]
    fn test_missing_attribute_and_connection() {
        let err = parse_legacy_document(&legacy_xml("<Server description='x'/>")).unwrap_err();
        assert!(matches!(err, RegistryError::LegacyFormat { ref element, .. } if element == "Server"));

        let err = parse_legacy_document(&legacy_xml("<Server name='x'/>")).unwrap_err();
        assert!(matches!(err, RegistryError::LegacyFormat { ref element, .. } if element == "Server"));
    }

    #[test]
    fn test_unknown_server_type_id() {
        let xml = "<RegisteredServers><ServerType id='00000000-0000-0000-0000-000000000000'/></RegisteredServers>";
        let err = parse_legacy_document(xml).unwrap_err();
        assert!(matches!(err, RegistryError::LegacyFormat { ref element, .. } if element == "ServerType"));
    }

    #[test]
    fn test_migrate_integrated_server() {
        let (mut store, _temp) = create_test_store();
        let document = parse_legacy_document(&legacy_xml(INTEGRATED_SERVER)).unwrap();
        let report = migrate_legacy(&mut store, &document).unwrap();
        assert_eq!(report.groups_created, 1);
        assert_eq!(report.servers_created, 1);

        let id = store
            .resolve_server_path("DatabaseEngineServerGroup/Legacy1/Old1")
            .unwrap();
        let server = store.server(id).unwrap();
        assert_eq!(
            server.credential_persistence_type(),
            CredentialPersistenceType::PersistLoginNameAndPassword
        );
        assert!(server.use_custom_connection_color);
        let text = server.connection_string_with_encrypted_password().unwrap();
        let builder = ConnectionStringBuilder::parse(text).unwrap();
        assert_eq!(builder.server_name(), Some("Old1"));
        assert_eq!(builder.get("integrated security"), Some("true"));
        assert_eq!(builder.get("connect timeout"), Some("15"));
        assert_eq!(builder.get("command timeout"), Some("30"));
    }

    #[test]
    fn test_migrate_sql_login_with_password() {
        let (mut store, _temp) = create_test_store();
        let protected = store.codec().protect("s3cret").unwrap();
        let server_xml = format!(
            "<Server name='Sql1'><ConnectionInformation>\
             <ServerName>host1</ServerName><AuthenticationType>1</AuthenticationType>\
             <UserName>sa</UserName><Password>{protected}</Password>\
             </ConnectionInformation></Server>"
        );
        let document = parse_legacy_document(&legacy_xml(&server_xml)).unwrap();
        migrate_legacy(&mut store, &document).unwrap();

        let id = store
            .resolve_server_path("DatabaseEngineServerGroup/Legacy1/Sql1")
            .unwrap();
        let plain = store.connection_string(id).unwrap().unwrap();
        let builder = ConnectionStringBuilder::parse(secrecy::ExposeSecret::expose_secret(&plain)).unwrap();
        assert_eq!(builder.get("user id"), Some("sa"));
        assert_eq!(builder.get("password"), Some("s3cret"));
        assert_eq!(store.server(id).unwrap().server_name(), "host1");
    }

    #[test]
    fn test_undecryptable_password_is_dropped() {
        let (mut store, _temp) = create_test_store();
        let server_xml = "<Server name='Sql1'><ConnectionInformation>\
             <ServerName>host1</ServerName><AuthenticationType>1</AuthenticationType>\
             <UserName>sa</UserName><Password>not-protected</Password>\
             </ConnectionInformation></Server>";
        let document = parse_legacy_document(&legacy_xml(server_xml)).unwrap();
        let report = migrate_legacy(&mut store, &document).unwrap();
        assert_eq!(report.passwords_dropped, vec!["Sql1".to_string()]);
        assert_eq!(report.servers_created, 1);
    }

    #[test]
    fn test_rerun_reuses_groups_and_skips_servers() {
        let (mut store, _temp) = create_test_store();
        let document = parse_legacy_document(&legacy_xml(INTEGRATED_SERVER)).unwrap();
        migrate_legacy(&mut store, &document).unwrap();
        let report = migrate_legacy(&mut store, &document).unwrap();
        assert_eq!(report.groups_reused, 1);
        assert_eq!(report.servers_skipped, vec!["Old1".to_string()]);
    }

    #[test]
    fn test_migrate_file_writes_store_once() {
        let (mut store, temp) = create_test_store();
        let path = temp.path().join("legacy.xml");
        fs::write(&path, legacy_xml(INTEGRATED_SERVER)).unwrap();
        migrate_legacy_file(&mut store, &path).unwrap();
        assert!(store.serialize_on_creation());

        let reopened =
            RegisteredServersStore::open_local(temp.path().join("RegSrvr.xml"), test_codec()).unwrap();
        assert!(reopened
            .resolve_server_path("DatabaseEngineServerGroup/Legacy1/Old1")
            .is_some());
    }

    #[test]
    fn test_analysis_services_options() {
        assert_eq!(
            map_advanced_option(ServerType::AnalysisServices, "DATABASE", "Cube"),
            Some(("catalog", "Cube".to_string()))
        );
        assert_eq!(
            map_advanced_option(ServerType::AnalysisServices, "ENCRYPT_CONNECTION", "True"),
            Some(("protection level", "PktPrivacy".to_string()))
        );
        assert_eq!(
            map_advanced_option(ServerType::DatabaseEngine, "ENCRYPT_CONNECTION", "True"),
            Some(("encrypt", "true".to_string()))
        );
        assert_eq!(map_advanced_option(ServerType::DatabaseEngine, "UNKNOWN", "1"), None);
    }
}
