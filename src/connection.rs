//! Connection establishment and existence probes.
//!
//! [`ConnectionManager`] opens executors through a [`Connector`], retrying a
//! failed initial attempt up to the configured `retries` with bounded
//! exponential backoff. The free functions in this module are the read-only
//! probes reconciliation uses: database/table existence and live column
//! introspection. Probes take no locks and may run concurrently.

use std::time::Duration;

use rand::Rng;

use crate::config::DatabaseConfig;
use crate::error::{ConnectionError, ExecError};
use crate::executor::{Connector, MayConnector, PgExecutor};
use crate::sql;

const INITIAL_DELAY: Duration = Duration::from_millis(125);
const BACKOFF_STEPS: u32 = 13;

/// Exponential backoff delay sequence: doubling from 125ms for 13 steps,
/// then flat, with ±25% fuzz to spread out competing provisioners.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    fuzz: bool,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff {
            attempt: 0,
            fuzz: true,
        }
    }

    /// A deterministic sequence, used by tests.
    pub fn without_fuzz() -> Self {
        Backoff {
            attempt: 0,
            fuzz: false,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let step = self.attempt.min(BACKOFF_STEPS - 1);
        self.attempt = self.attempt.saturating_add(1);
        let base = INITIAL_DELAY * 2u32.pow(step);
        if self.fuzz {
            let factor = rand::thread_rng().gen_range(0.75..1.25);
            Some(base.mul_f64(factor))
        } else {
            Some(base)
        }
    }
}

/// Opens connections for one [`DatabaseConfig`], applying its retry policy.
///
/// Owns exactly one logical connection per `connect_*` call; callers that
/// share an executor across threads must synchronize it themselves.
pub struct ConnectionManager {
    config: DatabaseConfig,
    connector: Box<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(config: DatabaseConfig, connector: Box<dyn Connector>) -> Self {
        ConnectionManager { config, connector }
    }

    /// Manager backed by the shipped `may_postgres` connector.
    pub fn with_may_connector(config: DatabaseConfig) -> Self {
        let connector = Box::new(MayConnector::new(config.clone()));
        ConnectionManager { config, connector }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Connect to the configured database.
    pub fn connect(&self) -> Result<Box<dyn PgExecutor>, ConnectionError> {
        self.connect_to(&self.config.dbname)
    }

    /// Connect to the maintenance database for database-level operations.
    pub fn connect_maintenance(&self) -> Result<Box<dyn PgExecutor>, ConnectionError> {
        self.connect_to(&self.config.maintenance_db)
    }

    /// Connect to `dbname`, retrying up to `retries` times after a failed
    /// initial attempt. `retries == 0` means a single attempt.
    pub fn connect_to(&self, dbname: &str) -> Result<Box<dyn PgExecutor>, ConnectionError> {
        let attempts = self.config.retries.saturating_add(1);
        let mut backoff = Backoff::new();
        let mut last_message = String::new();
        for attempt in 1..=attempts {
            match self.connector.connect(dbname) {
                Ok(executor) => return Ok(executor),
                Err(err) => {
                    last_message = err.to_string();
                    if attempt < attempts {
                        let delay = backoff.next().expect("backoff is unbounded");
                        log::warn!(
                            "Connection attempt {}/{} to database '{}' failed ({}), retrying in {:.2}s",
                            attempt,
                            attempts,
                            dbname,
                            err,
                            delay.as_secs_f64()
                        );
                        std::thread::sleep(delay);
                    }
                }
            }
        }
        Err(ConnectionError::Failed {
            attempts,
            message: last_message,
        })
    }
}

/// Probe whether a database exists, using a maintenance-database executor.
pub fn database_exists(executor: &dyn PgExecutor, dbname: &str) -> Result<bool, ExecError> {
    let stmt = format!(
        "SELECT EXISTS (SELECT FROM pg_database WHERE datname = {})",
        sql::literal_str(dbname)
    );
    executor.query_one(&stmt)?.get_bool(0)
}

/// Probe whether a table exists in the connected database's public schema.
pub fn table_exists(executor: &dyn PgExecutor, table: &str) -> Result<bool, ExecError> {
    let stmt = format!(
        "SELECT EXISTS (SELECT FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_name = {})",
        sql::literal_str(table)
    );
    executor.query_one(&stmt)?.get_bool(0)
}

/// Read back the live column definition of a table as
/// `(column name, data type)` pairs in ordinal position order.
pub fn table_columns(
    executor: &dyn PgExecutor,
    table: &str,
) -> Result<Vec<(String, String)>, ExecError> {
    let stmt = format!(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = {} ORDER BY ordinal_position",
        sql::literal_str(table)
    );
    let rows = executor.query_all(&stmt)?;
    rows.iter()
        .map(|row| {
            Ok((
                row.get_text(0)?.to_string(),
                row.get_text(1)?.to_string(),
            ))
        })
        .collect()
}
