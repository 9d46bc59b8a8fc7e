//! Declarative table and database configuration.
//!
//! A [`TableConfig`] describes everything needed to provision one table:
//! connection parameters, the column schema, pointer-map relationships,
//! bootstrap data files and the create/delete/wait lifecycle flags. The
//! schema contract is strict: unrecognized keys are rejected and every
//! optional field has a documented default, so an empty database config
//! resolves to `postgres/postgres @ localhost:5432`.
//!
//! Deserialization only checks shape; the cross-field rules live in
//! [`crate::validate`].

use std::fmt;

use config::{Config, ConfigError as SettingsError, Environment, File};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Database connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Always-present database used for CREATE/DROP DATABASE and
    /// database-level existence probes.
    #[serde(default = "default_maintenance_db")]
    pub maintenance_db: String,
    /// Number of re-attempts after a failed initial connection. 0 means a
    /// single attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_password() -> String {
    "postgres".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_maintenance_db() -> String {
    "postgres".to_string()
}

fn default_retries() -> u32 {
    3
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            dbname: default_dbname(),
            host: default_host(),
            user: default_user(),
            password: default_password(),
            port: default_port(),
            maintenance_db: default_maintenance_db(),
            retries: default_retries(),
        }
    }
}

impl DatabaseConfig {
    /// Load the database configuration from `config/config.toml`, falling
    /// back to `TABLEKEEPER__`-prefixed environment variables.
    pub fn load() -> Result<Self, SettingsError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/config.toml").required(false))
            .add_source(Environment::with_prefix("TABLEKEEPER").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // If the file existed but was unreadable, log and retry with env only
                if std::path::Path::new("config/config.toml").exists() {
                    log::warn!(
                        "Failed to load config file, falling back to env. Error: {}",
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix("TABLEKEEPER").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        SettingsError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        settings.get::<DatabaseConfig>("database").map_err(|e| {
            SettingsError::Message(format!(
                "Database configuration could not be loaded from file or environment: {}",
                e
            ))
        })
    }
}

/// Secondary index access methods a column may request.
///
/// PRIMARY KEY and UNIQUE columns already carry an implicit btree index, so
/// an explicit method is only valid on plain columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Btree,
    Hash,
    Gist,
    Gin,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Btree => "btree",
            IndexKind::Hash => "hash",
            IndexKind::Gist => "gist",
            IndexKind::Gin => "gin",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a table schema.
///
/// `sql_type` and `default` are raw SQL text carried verbatim into the
/// generated DDL; no sanitization is performed on them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    /// SQL type expression, e.g. `INTEGER` or `TIMESTAMP WITH TIME ZONE`
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// Marks a column whose value may be changed by other processes; carried
    /// through for callers that cache rows.
    #[serde(default)]
    pub volatile: bool,
    #[serde(default)]
    pub index: Option<IndexKind>,
    /// Raw SQL inserted as a `DEFAULT <expr>` fragment
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Insertion-ordered column map; the order defines the column order of the
/// generated CREATE TABLE statement.
pub type TableSchema = IndexMap<String, ColumnConfig>;

/// Pure per-column value transform applied to bootstrap data.
pub type ConvertFn = fn(Value) -> Result<Value, String>;

fn identity(value: Value) -> Result<Value, String> {
    Ok(value)
}

/// Encode/decode transform pair registered for one column.
///
/// `encode` is applied to raw data-file values before insertion; `decode` is
/// the inverse for callers reading rows back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub column: &'static str,
    pub encode: ConvertFn,
    pub decode: ConvertFn,
}

impl Conversion {
    pub fn new(column: &'static str, encode: ConvertFn, decode: ConvertFn) -> Self {
        Conversion {
            column,
            encode,
            decode,
        }
    }

    /// A conversion that passes values through unchanged in both directions.
    pub fn passthrough(column: &'static str) -> Self {
        Conversion::new(column, identity, identity)
    }
}

/// Full declarative configuration for one provisioned table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    pub table: String,
    pub schema: TableSchema,
    /// Pointer-map edges for graph-structured tables: each entry maps a
    /// source column holding a reference to the target column it points at.
    #[serde(default)]
    pub ptr_map: IndexMap<String, String>,
    #[serde(default)]
    pub data_file_folder: String,
    /// Bootstrap data files, loaded in listed order after table creation
    #[serde(default)]
    pub data_files: Vec<String>,
    #[serde(default)]
    pub delete_db: bool,
    #[serde(default)]
    pub delete_table: bool,
    #[serde(default)]
    pub create_db: bool,
    #[serde(default)]
    pub create_table: bool,
    #[serde(default)]
    pub wait_for_db: bool,
    #[serde(default)]
    pub wait_for_table: bool,
    /// Registered programmatically; data files cannot carry functions
    #[serde(skip)]
    pub conversions: Vec<Conversion>,
}

impl TableConfig {
    /// The primary key column name, if the schema declares one.
    pub fn primary_key(&self) -> Option<&str> {
        self.schema
            .iter()
            .find(|(_, c)| c.primary_key)
            .map(|(name, _)| name.as_str())
    }
}
