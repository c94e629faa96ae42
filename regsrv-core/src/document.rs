//! XML document format for stores and exported subtrees
//!
//! A store document has a `RegisteredServersStore` root holding the
//! top-level `ServerGroup` elements. Export documents use the same schema but
//! are rooted at the exported `ServerGroup` or `RegisteredServer`. Entity
//! properties are written as attributes; unknown attributes are kept in each
//! entity's `extra` map so they survive a round-trip.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{EntityKind, RegistryError, RegistryResult};
use crate::models::{RegisteredServer, ServerGroup};

const STORE_ELEMENT: &str = "RegisteredServersStore";
const GROUP_ELEMENT: &str = "ServerGroup";
const SERVER_ELEMENT: &str = "RegisteredServer";
const DOCUMENT_VERSION: &str = "1";

const GROUP_ATTRIBUTES: [&str; 4] = ["Name", "Description", "ServerType", "Id"];
const SERVER_ATTRIBUTES: [&str; 14] = [
    "Name",
    "ServerName",
    "Description",
    "ServerType",
    "Id",
    "CredentialPersistenceType",
    "ConnectionStringWithEncryptedPassword",
    "OtherParams",
    "AuthenticationType",
    "ActiveDirectoryUserId",
    "ActiveDirectoryTenant",
    "UseCustomConnectionColor",
    "CustomConnectionColorArgb",
    "Tag",
];

/// A detached group together with its descendants
#[derive(Debug, Clone)]
pub struct GroupNode {
    /// The group itself
    pub group: ServerGroup,
    /// Child groups in document order
    pub groups: Vec<GroupNode>,
    /// Child servers in document order
    pub servers: Vec<RegisteredServer>,
}

impl GroupNode {
    /// Creates a node without children
    #[must_use]
    pub const fn new(group: ServerGroup) -> Self {
        Self {
            group,
            groups: Vec::new(),
            servers: Vec::new(),
        }
    }

    /// Counts the groups and servers in this subtree, including itself
    #[must_use]
    pub fn count(&self) -> (usize, usize) {
        self.groups.iter().fold((1, self.servers.len()), |(g, s), child| {
            let (cg, cs) = child.count();
            (g + cg, s + cs)
        })
    }
}

/// Parsed content of a document
#[derive(Debug, Clone)]
pub enum Document {
    /// A whole store: its top-level groups
    Store(Vec<GroupNode>),
    /// A single exported group subtree
    Group(GroupNode),
    /// A single exported server
    Server(RegisteredServer),
}

impl Document {
    /// Returns the kind of the root entity
    #[must_use]
    pub const fn root_kind(&self) -> EntityKind {
        match self {
            Self::Store(_) => EntityKind::Store,
            Self::Group(_) => EntityKind::ServerGroup,
            Self::Server(_) => EntityKind::RegisteredServer,
        }
    }
}

// ========== Writing ==========

fn xml_error(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Xml(e.to_string())
}

/// Serializes a document to XML text
///
/// # Errors
///
/// Returns `Xml` if the writer fails.
pub fn write_document(document: &Document) -> RegistryResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_error)?;

    match document {
        Document::Store(groups) => {
            let mut root = BytesStart::new(STORE_ELEMENT);
            root.push_attribute(("Version", DOCUMENT_VERSION));
            if groups.is_empty() {
                writer.write_event(Event::Empty(root)).map_err(xml_error)?;
            } else {
                writer.write_event(Event::Start(root)).map_err(xml_error)?;
                for node in groups {
                    write_group(&mut writer, node)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(STORE_ELEMENT)))
                    .map_err(xml_error)?;
            }
        }
        Document::Group(node) => write_group(&mut writer, node)?,
        Document::Server(server) => write_server(&mut writer, server)?,
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(xml_error)
}

fn write_group<W: std::io::Write>(writer: &mut Writer<W>, node: &GroupNode) -> RegistryResult<()> {
    let group = &node.group;
    let mut elem = BytesStart::new(GROUP_ELEMENT);
    elem.push_attribute(("Name", group.name()));
    elem.push_attribute(("Description", group.description.as_str()));
    elem.push_attribute(("ServerType", group.server_type().as_str()));
    elem.push_attribute(("Id", group.id().to_string().as_str()));
    push_extra(&mut elem, &group.extra, &GROUP_ATTRIBUTES);

    if node.groups.is_empty() && node.servers.is_empty() {
        writer.write_event(Event::Empty(elem)).map_err(xml_error)?;
        return Ok(());
    }

    writer.write_event(Event::Start(elem)).map_err(xml_error)?;
    for child in &node.groups {
        write_group(writer, child)?;
    }
    for server in &node.servers {
        write_server(writer, server)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(GROUP_ELEMENT)))
        .map_err(xml_error)?;
    Ok(())
}

fn write_server<W: std::io::Write>(
    writer: &mut Writer<W>,
    server: &RegisteredServer,
) -> RegistryResult<()> {
    let mut elem = BytesStart::new(SERVER_ELEMENT);
    elem.push_attribute(("Name", server.name()));
    elem.push_attribute(("ServerName", server.server_name()));
    elem.push_attribute(("Description", server.description.as_str()));
    elem.push_attribute(("ServerType", server.server_type().as_str()));
    elem.push_attribute(("Id", server.id().to_string().as_str()));
    elem.push_attribute((
        "CredentialPersistenceType",
        server.credential_persistence_type().as_str(),
    ));
    if let Some(persisted) = server.connection_string_with_encrypted_password() {
        elem.push_attribute(("ConnectionStringWithEncryptedPassword", persisted));
    }
    elem.push_attribute(("OtherParams", server.other_params.as_str()));
    if let Some(auth) = server.authentication_type {
        elem.push_attribute(("AuthenticationType", auth.to_string().as_str()));
    }
    elem.push_attribute((
        "ActiveDirectoryUserId",
        server.active_directory_user_id.as_str(),
    ));
    elem.push_attribute((
        "ActiveDirectoryTenant",
        server.active_directory_tenant.as_str(),
    ));
    elem.push_attribute((
        "UseCustomConnectionColor",
        if server.use_custom_connection_color {
            "true"
        } else {
            "false"
        },
    ));
    elem.push_attribute((
        "CustomConnectionColorArgb",
        server.custom_connection_color_argb.to_string().as_str(),
    ));
    elem.push_attribute(("Tag", server.tag.as_str()));
    push_extra(&mut elem, &server.extra, &SERVER_ATTRIBUTES);
    writer.write_event(Event::Empty(elem)).map_err(xml_error)?;
    Ok(())
}

/// Writes preserved attributes, leaving out names the entity already owns
fn push_extra(elem: &mut BytesStart<'_>, extra: &BTreeMap<String, String>, known: &[&str]) {
    for (key, value) in extra {
        if known.contains(&key.as_str()) {
            tracing::warn!(attribute = %key, "Ignoring extra attribute that shadows a known one");
            continue;
        }
        elem.push_attribute((key.as_str(), value.as_str()));
    }
}

// ========== Reading ==========

enum Frame {
    Store(Vec<GroupNode>),
    Group(GroupNode),
    Server(RegisteredServer),
}

/// Parses XML text into a document
///
/// # Errors
///
/// Returns `Xml` for malformed XML, unknown elements, misplaced elements,
/// invalid attribute values, or a document without a root element.
pub fn parse_document(xml: &str) -> RegistryResult<Document> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Document> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let frame = open_frame(&e, stack.is_empty())?;
                if root.is_some() {
                    return Err(RegistryError::Xml("document has more than one root element".into()));
                }
                stack.push(frame);
            }
            Ok(Event::Empty(e)) => {
                let frame = open_frame(&e, stack.is_empty())?;
                if root.is_some() {
                    return Err(RegistryError::Xml("document has more than one root element".into()));
                }
                close_frame(frame, &mut stack, &mut root)?;
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| RegistryError::Xml("unbalanced end tag".into()))?;
                close_frame(frame, &mut stack, &mut root)?;
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
    root.ok_or_else(|| RegistryError::Xml("document has no root element".into()))
}

fn open_frame(e: &BytesStart<'_>, is_root: bool) -> RegistryResult<Frame> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    match name.as_str() {
        STORE_ELEMENT if is_root => Ok(Frame::Store(Vec::new())),
        STORE_ELEMENT => Err(RegistryError::Xml(format!(
            "{STORE_ELEMENT} must be the root element"
        ))),
        GROUP_ELEMENT => Ok(Frame::Group(GroupNode::new(read_group(e)?))),
        SERVER_ELEMENT => Ok(Frame::Server(read_server(e)?)),
        other => Err(RegistryError::Xml(format!("unexpected element '{other}'"))),
    }
}

fn close_frame(
    frame: Frame,
    stack: &mut [Frame],
    root: &mut Option<Document>,
) -> RegistryResult<()> {
    match (stack.last_mut(), frame) {
        (None, Frame::Store(groups)) => *root = Some(Document::Store(groups)),
        (None, Frame::Group(node)) => *root = Some(Document::Group(node)),
        (None, Frame::Server(server)) => *root = Some(Document::Server(server)),
        (Some(Frame::Store(groups)), Frame::Group(node)) => groups.push(node),
        (Some(Frame::Group(parent)), Frame::Group(node)) => parent.groups.push(node),
        (Some(Frame::Group(parent)), Frame::Server(server)) => parent.servers.push(server),
        (Some(Frame::Store(_)), Frame::Server(server)) => {
            return Err(RegistryError::Xml(format!(
                "server '{}' must be inside a server group",
                server.name()
            )));
        }
        (Some(Frame::Server(parent)), _) => {
            return Err(RegistryError::Xml(format!(
                "server '{}' cannot have child elements",
                parent.name()
            )));
        }
        (Some(_), Frame::Store(_)) => {
            return Err(RegistryError::Xml(format!(
                "{STORE_ELEMENT} must be the root element"
            )));
        }
    }
    Ok(())
}

fn read_attributes(e: &BytesStart<'_>) -> RegistryResult<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

fn parse_number(element: &str, key: &str, value: &str) -> RegistryResult<i32> {
    value.trim().parse().map_err(|_| {
        RegistryError::Xml(format!("{element} attribute {key} is not a number: '{value}'"))
    })
}

fn parse_bool(element: &str, key: &str, value: &str) -> RegistryResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(RegistryError::Xml(format!(
            "{element} attribute {key} is not a boolean: '{value}'"
        ))),
    }
}

fn read_group(e: &BytesStart<'_>) -> RegistryResult<ServerGroup> {
    let mut group = ServerGroup::new(String::new());
    for (key, value) in read_attributes(e)? {
        match key.as_str() {
            "Name" => group.name = value,
            "Description" => group.description = value,
            "ServerType" => group.server_type = value.parse()?,
            "Id" => group.id = parse_number(GROUP_ELEMENT, &key, &value)?,
            _ => {
                group.extra.insert(key, value);
            }
        }
    }
    Ok(group)
}

fn read_server(e: &BytesStart<'_>) -> RegistryResult<RegisteredServer> {
    let mut server = RegisteredServer::new(String::new());
    for (key, value) in read_attributes(e)? {
        match key.as_str() {
            "Name" => server.name = value,
            "ServerName" => server.server_name = value,
            "Description" => server.description = value,
            "ServerType" => server.server_type = value.parse()?,
            "Id" => server.id = parse_number(SERVER_ELEMENT, &key, &value)?,
            "CredentialPersistenceType" => server.credential_persistence_type = value.parse()?,
            "ConnectionStringWithEncryptedPassword" => {
                server.encrypted_connection_string = (!value.is_empty()).then_some(value);
            }
            "OtherParams" => server.other_params = value,
            "AuthenticationType" => {
                server.authentication_type = if value.trim().is_empty() {
                    None
                } else {
                    Some(parse_number(SERVER_ELEMENT, &key, &value)?)
                };
            }
            "ActiveDirectoryUserId" => server.active_directory_user_id = value,
            "ActiveDirectoryTenant" => server.active_directory_tenant = value,
            "UseCustomConnectionColor" => {
                server.use_custom_connection_color = parse_bool(SERVER_ELEMENT, &key, &value)?;
            }
            "CustomConnectionColorArgb" => {
                server.custom_connection_color_argb = parse_number(SERVER_ELEMENT, &key, &value)?;
            }
            "Tag" => server.tag = value,
            _ => {
                server.extra.insert(key, value);
            }
        }
    }
    Ok(server)
}
