//! Configuration validation.
//!
//! Shape checks (types, defaults, unknown-key rejection) happen during
//! deserialization in [`crate::config`]; this module applies everything a
//! schema document cannot express: regex/range checks per field and the
//! cross-field dependency rules between the lifecycle flags. Checks run in a
//! fixed order and fail fast on the first violated rule, reporting the field
//! path and the rule text.
//!
//! Validation is a pure transform: validating an already-validated
//! configuration yields the same result and performs no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::{ColumnConfig, DatabaseConfig, TableConfig};
use crate::error::ConfigError;
use crate::provision::ptr_map;

/// PostgreSQL identifier: letter or underscore, then letters, digits or
/// underscores, at most 63 bytes.
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex"));

/// RFC952-style hostname; also accepts dotted-quad IPv4 addresses.
static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)*[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
        .expect("hostname regex")
});

const MAX_COLUMNS: usize = 1600;
const MAX_DEFAULT_LEN: usize = 256;
const MIN_PORT: u16 = 1024;
const MAX_RETRIES: u32 = i32::MAX as u32;

/// Deserialize a raw configuration mapping and validate it.
///
/// Unknown keys are rejected, defaults are filled for absent optional
/// fields, then the cross-field rules are applied.
pub fn validate_raw(raw: Value) -> Result<TableConfig, ConfigError> {
    let cfg: TableConfig = serde_json::from_value(raw).map_err(|e| ConfigError::Schema {
        field: "config".to_string(),
        message: e.to_string(),
    })?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate an already-typed configuration.
pub fn validate(cfg: &TableConfig) -> Result<(), ConfigError> {
    check_database(&cfg.database)?;
    check_table_name(&cfg.table)?;
    check_schema(cfg)?;
    ptr_map::resolve(&cfg.ptr_map, &cfg.schema).map(|_| ())?;
    check_data_files(cfg)?;
    check_conversions(cfg)?;
    check_lifecycle_flags(cfg)?;
    Ok(())
}

fn check_database(db: &DatabaseConfig) -> Result<(), ConfigError> {
    if !HOST_RE.is_match(&db.host) {
        return Err(ConfigError::invalid(
            "database.host",
            format!("'{}' is not a valid hostname or IPv4 address", db.host),
        ));
    }
    if db.port < MIN_PORT {
        return Err(ConfigError::invalid(
            "database.port",
            format!("port {} is below the non-privileged minimum {}", db.port, MIN_PORT),
        ));
    }
    if db.retries > MAX_RETRIES {
        return Err(ConfigError::invalid(
            "database.retries",
            format!("retries {} exceeds the maximum {}", db.retries, MAX_RETRIES),
        ));
    }
    for (field, name) in [
        ("database.dbname", &db.dbname),
        ("database.maintenance_db", &db.maintenance_db),
    ] {
        if !IDENT_RE.is_match(name) {
            return Err(ConfigError::invalid(
                field,
                format!("'{}' is not a valid database name", name),
            ));
        }
    }
    if db.user.is_empty() {
        return Err(ConfigError::invalid("database.user", "user must not be empty"));
    }
    Ok(())
}

fn check_table_name(table: &str) -> Result<(), ConfigError> {
    if !IDENT_RE.is_match(table) {
        return Err(ConfigError::invalid(
            "table",
            format!("'{}' is not a valid table name (1-63 identifier characters)", table),
        ));
    }
    Ok(())
}

fn check_schema(cfg: &TableConfig) -> Result<(), ConfigError> {
    if cfg.schema.is_empty() || cfg.schema.len() > MAX_COLUMNS {
        return Err(ConfigError::invalid(
            "schema",
            format!(
                "schema must define between 1 and {} columns, found {}",
                MAX_COLUMNS,
                cfg.schema.len()
            ),
        ));
    }
    let mut primary_keys = 0usize;
    for (name, column) in &cfg.schema {
        let field = format!("schema.{}", name);
        if !IDENT_RE.is_match(name) {
            return Err(ConfigError::invalid(
                field,
                format!("'{}' is not a valid column name", name),
            ));
        }
        check_column(&field, column)?;
        if column.primary_key {
            primary_keys += 1;
        }
    }
    if primary_keys > 1 {
        return Err(ConfigError::invalid(
            "schema",
            format!(
                "there are {} primary keys defined, there can only be 0 or 1",
                primary_keys
            ),
        ));
    }
    Ok(())
}

fn check_column(field: &str, column: &ColumnConfig) -> Result<(), ConfigError> {
    if column.sql_type.trim().is_empty() {
        return Err(ConfigError::invalid(field, "column type must not be empty"));
    }
    if let Some(default) = &column.default {
        if default.len() > MAX_DEFAULT_LEN {
            return Err(ConfigError::invalid(
                field,
                format!(
                    "default expression exceeds {} characters",
                    MAX_DEFAULT_LEN
                ),
            ));
        }
    }
    if column.primary_key && column.nullable {
        return Err(ConfigError::invalid(
            field,
            "a column cannot be both NULL and the PRIMARY KEY",
        ));
    }
    if column.primary_key && column.unique {
        return Err(ConfigError::conflict(
            field,
            "a column cannot be both UNIQUE and the PRIMARY KEY",
        ));
    }
    if column.index.is_some() && (column.primary_key || column.unique) {
        return Err(ConfigError::conflict(
            field,
            "an explicit index cannot be combined with PRIMARY KEY or UNIQUE, \
             which already imply one",
        ));
    }
    Ok(())
}

fn check_data_files(cfg: &TableConfig) -> Result<(), ConfigError> {
    if !cfg.data_files.is_empty() && cfg.data_file_folder.is_empty() {
        return Err(ConfigError::invalid(
            "data_files",
            "data_files requires data_file_folder to be set",
        ));
    }
    Ok(())
}

fn check_conversions(cfg: &TableConfig) -> Result<(), ConfigError> {
    for conversion in &cfg.conversions {
        if !cfg.schema.contains_key(conversion.column) {
            return Err(ConfigError::invalid(
                "conversions",
                format!("column '{}' is not a schema field", conversion.column),
            ));
        }
    }
    Ok(())
}

/// Cross-field rules between the create/delete/wait flags.
///
/// Creating and waiting are mutually exclusive strategies for the same
/// target: one expects it absent, the other expects another process to
/// provide it. Deleting only makes sense when this configuration also
/// recreates the target.
fn check_lifecycle_flags(cfg: &TableConfig) -> Result<(), ConfigError> {
    if cfg.delete_db && (!cfg.create_db || cfg.wait_for_db) {
        return Err(ConfigError::invalid(
            "delete_db",
            "delete_db requires create_db == true and wait_for_db == false",
        ));
    }
    if cfg.delete_db && !(cfg.create_table || cfg.wait_for_table) {
        return Err(ConfigError::invalid(
            "delete_db",
            "delete_db requires either create_table == true or wait_for_table == true",
        ));
    }
    if cfg.delete_table && (!cfg.create_table || cfg.wait_for_table) {
        return Err(ConfigError::invalid(
            "delete_table",
            "delete_table requires create_table == true and wait_for_table == false",
        ));
    }
    if cfg.create_db && cfg.wait_for_db {
        return Err(ConfigError::invalid(
            "create_db",
            "create_db requires wait_for_db == false",
        ));
    }
    if cfg.create_db && !(cfg.create_table || cfg.wait_for_table) {
        return Err(ConfigError::invalid(
            "create_db",
            "create_db requires either create_table == true or wait_for_table == true",
        ));
    }
    if cfg.create_table && cfg.wait_for_table {
        return Err(ConfigError::invalid(
            "create_table",
            "create_table requires wait_for_table == false",
        ));
    }
    if cfg.wait_for_db && !(cfg.create_table || cfg.wait_for_table) {
        return Err(ConfigError::invalid(
            "wait_for_db",
            "wait_for_db requires either create_table == true or wait_for_table == true",
        ));
    }
    Ok(())
}
