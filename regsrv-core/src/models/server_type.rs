//! Server type model and the well-known group names derived from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Name of the local-only central management group
pub const CENTRAL_MANAGEMENT_GROUP: &str = "CentralManagementServerGroup";

/// Kind of database service a group or server targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServerType {
    /// Relational database engine
    #[default]
    DatabaseEngine,
    /// Analysis services
    AnalysisServices,
    /// Reporting services
    ReportingServices,
    /// Integration services
    IntegrationServices,
    /// Legacy compact edition
    SqlServerCompactEdition,
}

impl ServerType {
    /// All server types in well-known group order
    pub const ALL: [Self; 5] = [
        Self::DatabaseEngine,
        Self::AnalysisServices,
        Self::ReportingServices,
        Self::IntegrationServices,
        Self::SqlServerCompactEdition,
    ];

    /// Returns the identifier used in documents
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DatabaseEngine => "DatabaseEngine",
            Self::AnalysisServices => "AnalysisServices",
            Self::ReportingServices => "ReportingServices",
            Self::IntegrationServices => "IntegrationServices",
            Self::SqlServerCompactEdition => "SqlServerCompactEdition",
        }
    }

    /// Returns the reserved name of this type's built-in group
    #[must_use]
    pub const fn group_name(self) -> &'static str {
        match self {
            Self::DatabaseEngine => "DatabaseEngineServerGroup",
            Self::AnalysisServices => "AnalysisServicesServerGroup",
            Self::ReportingServices => "ReportingServicesServerGroup",
            Self::IntegrationServices => "IntegrationServicesServerGroup",
            Self::SqlServerCompactEdition => "SqlServerCompactEditionServerGroup",
        }
    }

    /// Looks up the server type whose built-in group has this name
    #[must_use]
    pub fn from_group_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.group_name().eq_ignore_ascii_case(name))
    }

    /// Returns the type identifier used by the legacy schema
    #[must_use]
    pub const fn legacy_id(self) -> &'static str {
        match self {
            Self::DatabaseEngine => "8c91a03d-f9b4-46c0-a305-b5dcc79ff907",
            Self::AnalysisServices => "1396ffcb-10d7-4f8c-aaef-4696d541f554",
            Self::ReportingServices => "3a0f2e46-847b-4332-9b7e-fc78e43a49b0",
            Self::IntegrationServices => "19d20860-9e9a-4aff-a80d-f72b41b5e931",
            Self::SqlServerCompactEdition => "6b04a4a7-9b37-4028-ac2d-f0a39e50fb57",
        }
    }

    /// Looks up a server type by its legacy identifier
    #[must_use]
    pub fn from_legacy_id(id: &str) -> Option<Self> {
        let id = id.trim().trim_start_matches('{').trim_end_matches('}');
        Self::ALL
            .into_iter()
            .find(|t| t.legacy_id().eq_ignore_ascii_case(id))
    }

    /// Returns the numeric code the remote catalog stores for this type
    #[must_use]
    pub const fn catalog_code(self) -> i32 {
        match self {
            Self::DatabaseEngine => 0,
            Self::AnalysisServices => 1,
            Self::ReportingServices => 2,
            Self::IntegrationServices => 3,
            Self::SqlServerCompactEdition => 4,
        }
    }

    /// Looks up a server type by its remote catalog code
    #[must_use]
    pub fn from_catalog_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.catalog_code() == code)
    }

    /// Connection string key used when writing a server name that has no key yet
    #[must_use]
    pub const fn server_name_key(self) -> &'static str {
        match self {
            Self::IntegrationServices => "server",
            Self::ReportingServices => "address",
            _ => "data source",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RegistryError::InvalidArgument {
                argument: "ServerType".to_string(),
                reason: format!("unknown server type '{s}'"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_names_round_trip() {
        for server_type in ServerType::ALL {
            assert_eq!(
                ServerType::from_group_name(server_type.group_name()),
                Some(server_type)
            );
        }
        assert_eq!(ServerType::from_group_name(CENTRAL_MANAGEMENT_GROUP), None);
    }

    #[test]
    fn test_legacy_ids_accept_braces_and_case() {
        assert_eq!(
            ServerType::from_legacy_id("{8C91A03D-F9B4-46C0-A305-B5DCC79FF907}"),
            Some(ServerType::DatabaseEngine)
        );
        assert_eq!(ServerType::from_legacy_id("not-a-guid"), None);
    }

    #[test]
    fn test_server_name_keys() {
        assert_eq!(ServerType::IntegrationServices.server_name_key(), "server");
        assert_eq!(ServerType::ReportingServices.server_name_key(), "address");
        assert_eq!(ServerType::AnalysisServices.server_name_key(), "data source");
    }

    #[test]
    fn test_parse_server_type() {
        assert_eq!(
            "reportingservices".parse::<ServerType>().unwrap(),
            ServerType::ReportingServices
        );
        assert!("Oracle".parse::<ServerType>().is_err());
    }
}
