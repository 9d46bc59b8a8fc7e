//! Database execution seam.
//!
//! Provides the [`PgExecutor`] trait the core drives all SQL through, a
//! minimal row/value representation the probes read back, and the
//! [`Connector`] trait that opens executors by database name. The core never
//! depends on a specific driver beyond these traits; [`MayPostgresExecutor`]
//! and [`MayConnector`] are the shipped implementations over `may_postgres`,
//! and tests substitute in-memory fakes.

use may_postgres::{Client, Row};

use crate::config::DatabaseConfig;
use crate::error::{ConnectionError, ExecError};

/// A single value read back from the database.
///
/// Only the types the provisioning probes consume are represented; anything
/// else is surfaced as text by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// One row of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct PgRow {
    values: Vec<PgValue>,
}

impl PgRow {
    pub fn new(values: Vec<PgValue>) -> Self {
        PgRow { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool, ExecError> {
        match self.values.get(idx) {
            Some(PgValue::Bool(b)) => Ok(*b),
            other => Err(ExecError::new(format!(
                "expected boolean at column {}, found {:?}",
                idx, other
            ))),
        }
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64, ExecError> {
        match self.values.get(idx) {
            Some(PgValue::Int(i)) => Ok(*i),
            other => Err(ExecError::new(format!(
                "expected integer at column {}, found {:?}",
                idx, other
            ))),
        }
    }

    pub fn get_text(&self, idx: usize) -> Result<&str, ExecError> {
        match self.values.get(idx) {
            Some(PgValue::Text(s)) => Ok(s),
            other => Err(ExecError::new(format!(
                "expected text at column {}, found {:?}",
                idx, other
            ))),
        }
    }
}

/// Trait for executing fully-rendered SQL statements.
///
/// Statements are rendered to complete strings before execution (identifiers
/// validated and quoted, literals escaped), so implementations never see
/// separate parameters and every statement is loggable as-is.
pub trait PgExecutor {
    /// Execute a statement and return the number of rows affected.
    fn execute(&self, sql: &str) -> Result<u64, ExecError>;

    /// Execute a query expected to return exactly one row.
    fn query_one(&self, sql: &str) -> Result<PgRow, ExecError>;

    /// Execute a query and return all rows.
    fn query_all(&self, sql: &str) -> Result<Vec<PgRow>, ExecError>;
}

impl std::fmt::Debug for dyn PgExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PgExecutor")
    }
}

/// Opens executors by database name.
///
/// Database-level reconciliation needs two connections with identical
/// parameters except the database: the maintenance database for
/// CREATE/DROP DATABASE and the target database for table work. Implementing
/// this trait is also the seam tests use to substitute fakes.
pub trait Connector {
    fn connect(&self, dbname: &str) -> Result<Box<dyn PgExecutor>, ConnectionError>;
}

/// `PgExecutor` over a `may_postgres::Client`.
///
/// Blocking calls that work within `may` coroutines, like the driver itself.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl PgExecutor for MayPostgresExecutor {
    fn execute(&self, sql: &str) -> Result<u64, ExecError> {
        self.client
            .execute(sql, &[])
            .map_err(|e| ExecError::new(e.to_string()))
    }

    fn query_one(&self, sql: &str) -> Result<PgRow, ExecError> {
        let row = self
            .client
            .query_one(sql, &[])
            .map_err(|e| ExecError::new(e.to_string()))?;
        Ok(convert_row(&row))
    }

    fn query_all(&self, sql: &str) -> Result<Vec<PgRow>, ExecError> {
        let rows = self
            .client
            .query(sql, &[])
            .map_err(|e| ExecError::new(e.to_string()))?;
        Ok(rows.iter().map(convert_row).collect())
    }
}

fn convert_row(row: &Row) -> PgRow {
    let values = (0..row.len()).map(|idx| convert_value(row, idx)).collect();
    PgRow::new(values)
}

/// Best-effort decode of one column into the narrow value set the probes
/// consume, trying types in decreasing order of specificity.
fn convert_value(row: &Row, idx: usize) -> PgValue {
    if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
        return v.map(PgValue::Bool).unwrap_or(PgValue::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
        return v.map(PgValue::Int).unwrap_or(PgValue::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
        return v.map(|i| PgValue::Int(i64::from(i))).unwrap_or(PgValue::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
        return v.map(PgValue::Float).unwrap_or(PgValue::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
        return v.map(PgValue::Text).unwrap_or(PgValue::Null);
    }
    PgValue::Null
}

/// Default [`Connector`] opening `may_postgres` connections from a
/// [`DatabaseConfig`].
pub struct MayConnector {
    config: DatabaseConfig,
}

impl MayConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    /// Render key-value connection parameters for the given database.
    fn params(&self, dbname: &str) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.config.host,
            self.config.port,
            quote_param(&self.config.user),
            quote_param(&self.config.password),
            dbname,
        )
    }
}

impl Connector for MayConnector {
    fn connect(&self, dbname: &str) -> Result<Box<dyn PgExecutor>, ConnectionError> {
        let params = self.params(dbname);
        let client = may_postgres::connect(&params).map_err(|e| ConnectionError::Failed {
            attempts: 1,
            message: e.to_string(),
        })?;
        Ok(Box::new(MayPostgresExecutor::new(client)))
    }
}

/// libpq-style quoting for values that may contain spaces or quotes.
fn quote_param(value: &str) -> String {
    if value.is_empty() || value.contains(' ') || value.contains('\'') || value.contains('\\') {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_row_accessors() {
        let row = PgRow::new(vec![
            PgValue::Bool(true),
            PgValue::Int(5),
            PgValue::Text("name".to_string()),
        ]);
        assert_eq!(row.len(), 3);
        assert!(row.get_bool(0).unwrap());
        assert_eq!(row.get_i64(1).unwrap(), 5);
        assert_eq!(row.get_text(2).unwrap(), "name");
    }

    #[test]
    fn test_pg_row_type_mismatch() {
        let row = PgRow::new(vec![PgValue::Int(5)]);
        assert!(row.get_bool(0).is_err());
        assert!(row.get_text(0).is_err());
        assert!(row.get_i64(1).is_err());
    }

    #[test]
    fn test_connector_params() {
        let connector = MayConnector::new(DatabaseConfig::default());
        assert_eq!(
            connector.params("appdb"),
            "host=localhost port=5432 user=postgres password=postgres dbname=appdb"
        );
    }

    #[test]
    fn test_connector_params_quoting() {
        let connector = MayConnector::new(DatabaseConfig {
            password: "p ss'w\\d".to_string(),
            ..DatabaseConfig::default()
        });
        assert_eq!(
            connector.params("appdb"),
            "host=localhost port=5432 user=postgres password='p ss\\'w\\\\d' dbname=appdb"
        );
    }
}
