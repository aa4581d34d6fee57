//! Configuration for layerstore
//!
//! Centralized configuration with sensible defaults.
//!
//! Connection parameters may be given explicitly, as a libpq connection
//! string, or completed from a `.pgpass` file
//! (`hostname:port:database:username:password`, `*` matches anything).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LayerStoreError, Result};

/// Main configuration for a layerstore instance
///
/// Deserializable (missing fields take their defaults); the password is
/// never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Database host
    pub host: Option<String>,

    /// Database port
    pub port: Option<u16>,

    /// Database name
    pub dbname: Option<String>,

    /// Login user
    pub user: Option<String>,

    /// Login password
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Password file used to complete missing connection parameters
    pub pgpass_file: Option<PathBuf>,

    /// libpq style connection string; takes precedence over the fields above
    pub connection_string: Option<String>,

    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,

    // -------------------------------------------------------------------------
    // Schema Configuration
    // -------------------------------------------------------------------------
    /// Schema holding the collections registry and all collection tables
    pub schema: String,

    /// Role to assume after connecting (`SET ROLE`)
    pub role: Option<String>,

    /// Create the schema and the registry table if they are missing
    pub create_schema_if_missing: bool,

    // -------------------------------------------------------------------------
    // Iteration / Insert Configuration
    // -------------------------------------------------------------------------
    /// Rows fetched per server-side cursor round trip
    pub itersize: usize,

    /// Max buffered rows before an insert flush
    pub insert_buffer_size: usize,

    /// Approximate max insert statement length (characters) before a flush
    pub query_length_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            dbname: None,
            user: None,
            password: None,
            pgpass_file: None,
            connection_string: None,
            connect_timeout_secs: 10,
            schema: "public".to_string(),
            role: None,
            create_schema_if_missing: false,
            itersize: 50,
            insert_buffer_size: 10_000,
            query_length_limit: 5_000_000,
        }
    }
}

/// Fully resolved connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Config from a libpq key=value or URL connection string
    pub fn from_connection_string(conn: impl Into<String>) -> Self {
        Self {
            connection_string: Some(conn.into()),
            ..Self::default()
        }
    }

    /// Build the driver configuration
    pub fn to_postgres_config(&self) -> Result<postgres::Config> {
        let mut pg_config = match &self.connection_string {
            Some(conn) => conn
                .parse::<postgres::Config>()
                .map_err(|e| LayerStoreError::Config(format!("invalid connection string: {}", e)))?,
            None => {
                let params = self.resolve()?;
                let mut pg_config = postgres::Config::new();
                pg_config
                    .host(&params.host)
                    .port(params.port)
                    .dbname(&params.dbname)
                    .user(&params.user)
                    .password(&params.password);
                pg_config
            }
        };
        pg_config.connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        Ok(pg_config)
    }

    /// Resolve explicit parameters, completing them from the pgpass file if needed
    pub fn resolve(&self) -> Result<ConnectionParams> {
        if let (Some(host), Some(port), Some(dbname), Some(user), Some(password)) = (
            &self.host,
            self.port,
            &self.dbname,
            &self.user,
            &self.password,
        ) {
            return Ok(ConnectionParams {
                host: host.clone(),
                port,
                dbname: dbname.clone(),
                user: user.clone(),
                password: password.clone(),
            });
        }

        let pgpass = self.pgpass_file.as_ref().ok_or_else(|| {
            LayerStoreError::Config(
                "host, port, dbname, user or password is missing and no pgpass file was given"
                    .to_string(),
            )
        })?;
        self.resolve_from_pgpass(pgpass)
    }

    fn resolve_from_pgpass(&self, path: &Path) -> Result<ConnectionParams> {
        if !path.is_file() {
            return Err(LayerStoreError::Config(format!(
                "pgpass file {} not found",
                path.display()
            )));
        }
        let contents = fs::read_to_string(path)?;
        let port = self.port.map(|p| p.to_string());

        for line in contents.lines() {
            let line = line.trim_end();
            if line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 5 {
                continue;
            }

            let host = match match_field(self.host.as_deref(), fields[0]) {
                Some(v) => v,
                None => continue,
            };
            let port = match match_field(port.as_deref(), fields[1]) {
                Some(v) => v,
                None => continue,
            };
            let dbname = match match_field(self.dbname.as_deref(), fields[2]) {
                Some(v) => v,
                None => continue,
            };
            let user = match match_field(self.user.as_deref(), fields[3]) {
                Some(v) => v,
                None => continue,
            };
            let password = self
                .password
                .clone()
                .unwrap_or_else(|| fields[4].to_string());

            let port = port
                .parse::<u16>()
                .map_err(|_| LayerStoreError::Config(format!("invalid port {:?} in pgpass", port)))?;

            return Ok(ConnectionParams {
                host,
                port,
                dbname,
                user,
                password,
            });
        }

        Err(LayerStoreError::Config(format!(
            "no password found for host: {:?}, port: {:?}, dbname: {:?}, user: {:?}",
            self.host, self.port, self.dbname, self.user
        )))
    }
}

/// Match one pgpass field against a requested value.
///
/// A wildcard entry cannot supply a value that was not requested.
fn match_field(requested: Option<&str>, entry: &str) -> Option<String> {
    match requested {
        None if entry == "*" => None,
        None => Some(entry.to_string()),
        Some(value) if entry == "*" || entry == value => Some(value.to_string()),
        Some(_) => None,
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = Some(host.into());
        self
    }

    /// Set the database port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Set the database name
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.config.dbname = Some(dbname.into());
        self
    }

    /// Set the login user
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Set the login password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the pgpass file used to complete missing parameters
    pub fn pgpass_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pgpass_file = Some(path.into());
        self
    }

    /// Set a libpq connection string
    pub fn connection_string(mut self, conn: impl Into<String>) -> Self {
        self.config.connection_string = Some(conn.into());
        self
    }

    /// Set the connection timeout (in seconds)
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Set the schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = schema.into();
        self
    }

    /// Set the role assumed after connecting
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.config.role = Some(role.into());
        self
    }

    /// Create schema and registry when missing
    pub fn create_schema_if_missing(mut self, create: bool) -> Self {
        self.config.create_schema_if_missing = create;
        self
    }

    /// Set the cursor batch size
    pub fn itersize(mut self, itersize: usize) -> Self {
        self.config.itersize = itersize.max(1);
        self
    }

    /// Set the insert buffer size (in rows)
    pub fn insert_buffer_size(mut self, rows: usize) -> Self {
        self.config.insert_buffer_size = rows.max(1);
        self
    }

    /// Set the approximate insert statement length limit (in characters)
    pub fn query_length_limit(mut self, limit: usize) -> Self {
        self.config.query_length_limit = limit;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
