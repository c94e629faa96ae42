//! Connection string parsing and credential persistence projections
//!
//! Connection strings are `key=value` pairs separated by semicolons. Keys are
//! compared case-insensitively and kept in lowercase; values may be quoted
//! with single or double quotes, with a doubled quote standing for a literal
//! one. A literal `=` inside a key is written as `==`.

use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, RegistryResult};
use crate::models::{CredentialPersistenceType, ServerType};
use crate::secret::CredentialCodec;

/// Keys that carry the target server, in lookup priority order
pub const SERVER_NAME_KEYS: [&str; 3] = ["server", "data source", "address"];

/// Keys that carry the password
pub const PASSWORD_KEYS: [&str; 2] = ["password", "pwd"];

/// Keys that carry the login name
pub const LOGIN_KEYS: [&str; 2] = ["user id", "uid"];

/// Ordered, case-insensitive connection string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    entries: Vec<(String, String)>,
}

impl ConnectionStringBuilder {
    /// Creates an empty connection string
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parses connection string text
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a segment has no `=`, an empty key, or an
    /// unterminated quoted value.
    pub fn parse(text: &str) -> RegistryResult<Self> {
        let mut builder = Self::new();
        let mut chars = text.chars().peekable();

        loop {
            while chars.next_if(|c| c.is_whitespace() || *c == ';').is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('=') => {
                        if chars.next_if_eq(&'=').is_some() {
                            key.push('=');
                        } else {
                            break;
                        }
                    }
                    Some(';') | None => {
                        return Err(malformed(format!("segment '{}' has no value", key.trim())));
                    }
                    Some(c) => key.push(c),
                }
            }

            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return Err(malformed("empty key"));
            }

            while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}

            let value = match chars.peek().copied() {
                Some(quote @ ('"' | '\'')) => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => {
                                if chars.next_if_eq(&quote).is_some() {
                                    value.push(quote);
                                } else {
                                    break;
                                }
                            }
                            Some(c) => value.push(c),
                            None => {
                                return Err(malformed(format!("unterminated value for '{key}'")));
                            }
                        }
                    }
                    while chars.next_if(|c| c.is_whitespace()).is_some() {}
                    match chars.next() {
                        Some(';') | None => {}
                        Some(c) => {
                            return Err(malformed(format!(
                                "unexpected '{c}' after quoted value for '{key}'"
                            )));
                        }
                    }
                    value
                }
                _ => {
                    let mut value = String::new();
                    while let Some(c) = chars.next_if(|c| *c != ';') {
                        value.push(c);
                    }
                    value.trim_end().to_string()
                }
            };

            builder.set(&key, value);
        }

        Ok(builder)
    }

    /// Returns the value of `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if `key` is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key`, replacing an existing value in place
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_lowercase();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Removes `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Returns true if there are no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(key, value)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the server name, looking at `server`, `data source`, `address` in turn
    #[must_use]
    pub fn server_name(&self) -> Option<&str> {
        SERVER_NAME_KEYS
            .iter()
            .find_map(|key| self.get(key))
            .filter(|value| !value.is_empty())
    }

    /// Writes the server name back
    ///
    /// Replaces the first candidate key present; otherwise adds the key
    /// appropriate for `server_type`.
    pub fn set_server_name(&mut self, server_type: ServerType, server_name: &str) {
        let key = SERVER_NAME_KEYS
            .iter()
            .find(|key| self.contains_key(key))
            .copied()
            .unwrap_or_else(|| server_type.server_name_key());
        self.set(key, server_name);
    }

    /// Returns true if a non-empty password is present
    #[must_use]
    pub fn has_password(&self) -> bool {
        PASSWORD_KEYS
            .iter()
            .any(|key| self.get(key).is_some_and(|v| !v.is_empty()))
    }

    fn remove_all(&mut self, keys: &[&str]) {
        for key in keys {
            self.remove(key);
        }
    }

    fn map_passwords(
        &mut self,
        mut transform: impl FnMut(&str) -> RegistryResult<String>,
    ) -> RegistryResult<()> {
        for key in PASSWORD_KEYS {
            if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
                let mapped = transform(value)?;
                self.set(key, mapped);
            }
        }
        Ok(())
    }
}

impl FromStr for ConnectionStringBuilder {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", key.replace('=', "=="), quote_value(value))?;
        }
        Ok(())
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.contains(';')
        || value.starts_with(['"', '\''])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn malformed(reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidArgument {
        argument: "ConnectionString".to_string(),
        reason: reason.into(),
    }
}

/// Projects an in-memory connection string into its persisted form
///
/// # Errors
///
/// Returns an error if the text cannot be parsed or password protection fails.
pub fn apply_persistence(
    connection_string: &str,
    policy: CredentialPersistenceType,
    codec: &CredentialCodec,
) -> RegistryResult<String> {
    let mut builder = ConnectionStringBuilder::parse(connection_string)?;
    match policy {
        CredentialPersistenceType::None => {
            builder.remove_all(&PASSWORD_KEYS);
            builder.remove_all(&LOGIN_KEYS);
        }
        CredentialPersistenceType::PersistLoginName => {
            builder.remove_all(&PASSWORD_KEYS);
        }
        CredentialPersistenceType::PersistLoginNameAndPassword => {
            builder.map_passwords(|plain| Ok(codec.protect(plain)?))?;
        }
    }
    Ok(builder.to_string())
}

/// Reverses [`apply_persistence`]: unprotects any stored password
///
/// # Errors
///
/// Returns an error if the text cannot be parsed or unprotection fails.
pub fn reveal_password(persisted: &str, codec: &CredentialCodec) -> RegistryResult<String> {
    let mut builder = ConnectionStringBuilder::parse(persisted)?;
    builder.map_passwords(|protected| Ok(codec.unprotect(protected)?))?;
    Ok(builder.to_string())
}

/// Computed connection string for a shared server with no stored string
#[must_use]
pub fn shared_server_connection_string(server_name: &str, trust_server_certificate: bool) -> String {
    let mut builder = ConnectionStringBuilder::new();
    builder.set("server", server_name);
    builder.set("integrated security", "true");
    if trust_server_certificate {
        builder.set("trust server certificate", "true");
    }
    builder.to_string()
}
