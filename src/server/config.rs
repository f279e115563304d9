//! Server configuration
//!
//! Network settings for the server and the JSON configuration file that
//! bundles them with runtime settings and a schema to load at startup.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::{Column, Schema};
use crate::config::RuntimeConfig;
use crate::cursor::{CursorDefinition, CursorParam};
use crate::error::{Error, Result};
use crate::package::PackageDefinition;
use crate::session::Runtime;
use crate::storage::{Tuple, Value};

/// Default server port
pub const DEFAULT_PORT: u16 = 7171;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 100,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host address
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Get the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Contents of a server configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigFile {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub schema: SchemaDecl,
}

impl ServerConfigFile {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Relations and packages to create at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDecl {
    pub tables: Vec<TableDecl>,
    pub views: Vec<ViewDecl>,
    pub packages: Vec<PackageDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDecl {
    pub name: String,
    pub columns: Vec<Column>,
    /// Seed rows, positional in column order
    #[serde(default)]
    pub rows: Vec<Tuple>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDecl {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDecl {
    pub name: String,
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub cursors: Vec<CursorDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorDecl {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub params: Vec<CursorParam>,
    #[serde(default)]
    pub for_update: bool,
}

impl CursorDecl {
    fn build(&self) -> Result<CursorDefinition> {
        let mut builder =
            CursorDefinition::builder(&self.name, &self.query).params(self.params.clone());
        if self.for_update {
            builder = builder.for_update();
        }
        builder.build()
    }
}

impl SchemaDecl {
    /// Create every table, view and package, then load and commit seed rows
    pub fn apply(&self, runtime: &Runtime) -> Result<()> {
        for table in &self.tables {
            runtime.create_table(&table.name, Schema::from_columns(table.columns.clone()))?;
        }
        for view in &self.views {
            runtime.create_view(&view.name, &view.query)?;
        }
        for package in &self.packages {
            let mut definition = PackageDefinition::new(&package.name);
            for (name, initial) in &package.variables {
                definition = definition.variable(name, initial.clone());
            }
            for cursor in &package.cursors {
                definition = definition.cursor(cursor.build()?);
            }
            runtime.create_package(definition)?;
        }

        let mut session = runtime.connect_default();
        for table in self.tables.iter().filter(|t| !t.rows.is_empty()) {
            session.insert(&table.name, table.rows.clone())?;
        }
        session.commit()?;
        session.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::LockAcquisition;
    use std::io::Write;

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new().host("0.0.0.0").port(5500).max_connections(8);

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5500);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.bind_address(), "0.0.0.0:5500");
    }

    #[test]
    fn test_config_file_with_schema() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{ "port": 7300 }},
                "runtime": {{ "lock_acquisition": "on_open" }},
                "schema": {{
                    "tables": [{{
                        "name": "emp",
                        "columns": [
                            {{ "name": "empno", "type": "integer", "primary_key": true }},
                            {{ "name": "sal", "type": "integer" }}
                        ],
                        "rows": [[1, 800], [2, 1600]]
                    }}],
                    "packages": [{{
                        "name": "payroll",
                        "variables": {{ "raise": 100 }},
                        "cursors": [{{
                            "name": "c_low",
                            "query": "SELECT * FROM emp WHERE sal < :cap",
                            "params": [{{ "name": "cap", "default": 1000 }}],
                            "for_update": true
                        }}]
                    }}]
                }}
            }}"#
        )
        .unwrap();

        let file = ServerConfigFile::from_json_file(file.path()).unwrap();
        assert_eq!(file.server.port, 7300);
        assert_eq!(file.server.host, "127.0.0.1");
        assert_eq!(file.runtime.lock_acquisition, LockAcquisition::OnOpen);

        let runtime = Runtime::new(file.runtime.clone());
        file.schema.apply(&runtime).unwrap();
        assert_eq!(runtime.database().row_count("emp").unwrap(), 2);

        let mut session = runtime.connect("SCOTT");
        assert_eq!(session.get_var("payroll", "raise").unwrap(), Value::Integer(100));
        let cursor = session.package_cursor("payroll", "c_low").unwrap();
        session.open(cursor, &[]).unwrap();
        assert_eq!(session.fetch_batch(cursor, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_cursor_in_schema() {
        let schema: SchemaDecl = serde_json::from_str(
            r#"{ "packages": [{ "name": "p", "cursors": [{ "name": "c", "query": "SELECT * FROM t WHERE a = :x" }] }] }"#,
        )
        .unwrap();
        assert!(matches!(
            schema.apply(&Runtime::default()),
            Err(Error::UnknownBindParameter(_))
        ));
    }
}
