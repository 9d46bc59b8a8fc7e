//! Error types for configuration validation, connection handling and
//! lifecycle reconciliation.

use std::fmt;

/// Configuration validation error
///
/// Raised before any database I/O occurs. Carries the offending field path
/// and the rule that was violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Shape error: wrong type, missing required field or unrecognized key
    Schema { field: String, message: String },
    /// A per-field or cross-field rule was violated
    Invalid { field: String, rule: String },
    /// PRIMARY KEY / UNIQUE / index co-declaration conflict
    Conflict { field: String, rule: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, rule: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            rule: rule.into(),
        }
    }

    pub(crate) fn conflict(field: impl Into<String>, rule: impl Into<String>) -> Self {
        ConfigError::Conflict {
            field: field.into(),
            rule: rule.into(),
        }
    }

    /// The field path this error refers to
    pub fn field(&self) -> &str {
        match self {
            ConfigError::Schema { field, .. }
            | ConfigError::Invalid { field, .. }
            | ConfigError::Conflict { field, .. } => field,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Schema { field, message } => {
                write!(f, "Configuration error at '{}': {}", field, message)
            }
            ConfigError::Invalid { field, rule } => {
                write!(f, "Configuration error at '{}': {}", field, rule)
            }
            ConfigError::Conflict { field, rule } => {
                write!(f, "Configuration conflict at '{}': {}", field, rule)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Connection establishment error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Connection parameters failed validation
    InvalidParams(String),
    /// All connection attempts failed; `attempts` counts the initial attempt
    /// plus retries
    Failed { attempts: u32, message: String },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::InvalidParams(s) => {
                write!(f, "Invalid connection parameters: {}", s)
            }
            ConnectionError::Failed { attempts, message } => {
                write!(
                    f,
                    "Connection failed after {} attempt(s): {}",
                    attempts, message
                )
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// SQL execution error surfaced by an executor implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        ExecError {
            message: message.into(),
        }
    }

    /// True if the error reports a lost CREATE TABLE race
    pub(crate) fn is_duplicate_object(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("already exists") || msg.contains("duplicate table")
    }

    /// True if the error reports missing CREATE privileges
    pub(crate) fn is_insufficient_privilege(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("permission denied") || msg.contains("insufficient privilege")
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQL execution error: {}", self.message)
    }
}

impl std::error::Error for ExecError {}

/// Bootstrap data loading error, including file and row context
#[derive(Debug)]
pub enum LoadError {
    /// The data file could not be read
    Io { file: String, message: String },
    /// The data file is not a JSON array of row objects
    Parse { file: String, message: String },
    /// A row in the data file is malformed
    Row {
        file: String,
        row: usize,
        message: String,
    },
    /// Inserting a batch of rows failed
    Insert { file: String, source: ExecError },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io { file, message } => {
                write!(f, "Failed to read data file {}: {}", file, message)
            }
            LoadError::Parse { file, message } => {
                write!(f, "Data file {} is invalid: {}", file, message)
            }
            LoadError::Row { file, row, message } => {
                write!(f, "Data file {} row {} is invalid: {}", file, row, message)
            }
            LoadError::Insert { file, source } => {
                write!(f, "Failed to insert rows from data file {}: {}", file, source)
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// The two kinds of reconciliation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Database,
    Table,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Database => write!(f, "database"),
            TargetKind::Table => write!(f, "table"),
        }
    }
}

/// Crate-level error type
#[derive(Debug)]
pub enum Error {
    /// Configuration validation failed; no database I/O was performed
    Config(ConfigError),
    /// Connection establishment failed after the configured retries
    Connection(ConnectionError),
    /// A SQL statement failed during reconciliation
    Exec(ExecError),
    /// Target does not exist and neither the create nor the wait flag is set
    MissingTarget { target: TargetKind, name: String },
    /// The wait deadline expired before the target appeared
    WaitTimeout { target: TargetKind, name: String },
    /// The provisioning lock could not be acquired within the timeout
    LockTimeout { table: String },
    /// An existing table has columns the configured schema does not declare
    SchemaMismatch {
        table: String,
        unmatched: Vec<String>,
    },
    /// The table was created but loading bootstrap data failed.
    ///
    /// The created table is left in place; whether to drop and retry is the
    /// caller's decision.
    DataLoad { table: String, source: LoadError },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{}", e),
            Error::Connection(e) => write!(f, "{}", e),
            Error::Exec(e) => write!(f, "{}", e),
            Error::MissingTarget { target, name } => {
                write!(
                    f,
                    "The {} '{}' does not exist and neither the create nor the wait flag is set",
                    target, name
                )
            }
            Error::WaitTimeout { target, name } => {
                write!(f, "Timed out waiting for {} '{}' to appear", target, name)
            }
            Error::LockTimeout { table } => {
                write!(
                    f,
                    "Failed to acquire the provisioning lock for table '{}'. \
                     Another process may be reconciling the same table.",
                    table
                )
            }
            Error::SchemaMismatch { table, unmatched } => {
                write!(
                    f,
                    "Existing table '{}' has columns not present in the configured schema: {:?}",
                    table, unmatched
                )
            }
            Error::DataLoad { table, source } => {
                write!(
                    f,
                    "Table '{}' was created but loading bootstrap data failed: {}",
                    table, source
                )
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Connection(e) => Some(e),
            Error::Exec(e) => Some(e),
            Error::DataLoad { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        Error::Exec(err)
    }
}
