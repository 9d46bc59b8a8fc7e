//! # Tablekeeper
//!
//! Declarative PostgreSQL table provisioning for the `may` runtime: describe
//! a table once — connection parameters, columns, keys, indexes, pointer-map
//! relationships, bootstrap data and lifecycle flags — and reconcile the live
//! database against it.
//!
//! ```no_run
//! use tablekeeper::TableHandle;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = tablekeeper::validate::validate_raw(json!({
//!     "table": "users",
//!     "schema": {
//!         "id": {"type": "INTEGER", "primary_key": true},
//!         "name": {"type": "TEXT"}
//!     },
//!     "create_table": true
//! }))?;
//! let handle = TableHandle::connect(config)?;
//! assert_eq!(handle.columns(), ["id", "name"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod provision;
pub mod sql;
pub mod validate;

pub use config::{ColumnConfig, Conversion, DatabaseConfig, IndexKind, TableConfig, TableSchema};
pub use connection::ConnectionManager;
pub use error::{ConfigError, ConnectionError, Error, ExecError, LoadError, TargetKind};
pub use executor::{Connector, MayConnector, MayPostgresExecutor, PgExecutor, PgRow, PgValue};
pub use provision::{PtrMap, TableDdl, TableHandle, WaitOptions};
