use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseProvider {
    #[serde(alias = "sqlserver", alias = "mssql")]
    SqlServer,
    #[serde(alias = "postgres", alias = "postgresql")]
    Postgres,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub provider: DatabaseProvider,
    /// ADO-style for SQL Server, key/value or URL for PostgreSQL.
    pub connection_string: String,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

/// Named connections and the alias units of work use by default.
///
/// ```json
/// {
///   "default_alias": "Main",
///   "connections": {
///     "Main": { "provider": "SqlServer", "connection_string": "server=tcp:localhost,1433;..." },
///     "Reports": { "provider": "Postgres", "connection_string": "host=localhost user=app", "command_timeout_secs": 60 }
///   }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolkitOptions {
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
    #[serde(default)]
    pub default_alias: Option<String>,
}

impl ToolkitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(
        mut self,
        alias: impl Into<String>,
        connection_string: impl Into<String>,
        provider: DatabaseProvider,
    ) -> Self {
        self.connections.insert(
            alias.into(),
            ConnectionConfig {
                provider,
                connection_string: connection_string.into(),
                command_timeout_secs: None,
            },
        );
        self
    }

    pub fn with_command_timeout(mut self, alias: &str, secs: u64) -> Self {
        if let Some(config) = self.connections.get_mut(alias) {
            config.command_timeout_secs = Some(secs);
        }
        self
    }

    pub fn with_default_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = Some(alias.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DataError::Configuration(format!("invalid toolkit options: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DataError::Configuration(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Aliases match case-insensitively.
    pub fn connection(&self, alias: &str) -> Option<(&str, &ConnectionConfig)> {
        self.connections
            .get_key_value(alias)
            .or_else(|| {
                self.connections
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(alias))
            })
            .map(|(name, config)| (name.as_str(), config))
    }

    /// The configured default, or the only alias when exactly one exists.
    pub fn default_alias(&self) -> Option<&str> {
        match &self.default_alias {
            Some(alias) => Some(alias.as_str()),
            None if self.connections.len() == 1 => self.connections.keys().next().map(String::as_str),
            None => None,
        }
    }
}
