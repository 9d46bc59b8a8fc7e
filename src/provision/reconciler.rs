//! Lifecycle reconciliation.
//!
//! Drives live database state toward the state a validated [`TableConfig`]
//! describes. The database target is reconciled first (a table cannot be
//! created in a database that is not yet confirmed present), then the table
//! target. Each target walks the same state machine:
//!
//! ```text
//! Unknown -> Checked -> Absent  -> Created -> Ready   (create flag)
//!                       Absent  -> Present -> Ready   (wait flag)
//!                       Absent  -> error             (neither flag)
//!                       Present -> Deleted -> Absent  (delete flag, re-enter)
//!                       Present -> Ready              (reuse as-is)
//! ```
//!
//! A pre-existing table is reused as-is: no schema diffing or migration is
//! performed beyond failing when the live table carries columns the
//! configuration does not declare.

use std::time::{Duration, Instant};

use crate::config::TableConfig;
use crate::connection::{self, Backoff, ConnectionManager};
use crate::error::{Error, ExecError, TargetKind};
use crate::executor::PgExecutor;
use crate::provision::ddl::{self, TableDdl};
use crate::provision::loader::{DataLoader, ExecutorSink};
use crate::provision::lock::ProvisionLock;
use crate::provision::ptr_map::{self, PtrMap};
use crate::sql::quote_ident;
use crate::validate;

/// Reconciliation state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unknown,
    Checked,
    Absent,
    Present,
    Created,
    Deleted,
    Ready,
}

/// Bounds on the blocking waits reconciliation may perform.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Upper bound on each wait-for-existence poll loop. `None` polls until
    /// the target appears.
    pub wait_timeout: Option<Duration>,
    /// Upper bound on acquiring the provisioning lock.
    pub lock_timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            wait_timeout: None,
            lock_timeout: Duration::from_secs(60),
        }
    }
}

/// A provisioned table: the outcome of successful reconciliation.
///
/// Holds the executor connected to the target database, the validated
/// configuration and what reconciliation learned: the live column order, the
/// primary key and the resolved pointer map.
#[derive(Debug)]
pub struct TableHandle {
    executor: Box<dyn PgExecutor>,
    config: TableConfig,
    columns: Vec<String>,
    primary_key: Option<String>,
    ptr_map: PtrMap,
    ddl: TableDdl,
    created: bool,
}

impl TableHandle {
    /// Validate `config` and reconcile through the default `may_postgres`
    /// connector.
    pub fn connect(config: TableConfig) -> Result<TableHandle, Error> {
        let manager = ConnectionManager::with_may_connector(config.database.clone());
        TableHandle::provision(config, &manager, WaitOptions::default())
    }

    /// Validate `config` and reconcile it against live state reachable
    /// through `manager`.
    ///
    /// Validation errors surface before any database I/O. Mutating flag
    /// combinations serialize against concurrent reconcilers of the same
    /// (database, table) pair via an advisory lock on the maintenance
    /// connection.
    pub fn provision(
        config: TableConfig,
        manager: &ConnectionManager,
        options: WaitOptions,
    ) -> Result<TableHandle, Error> {
        validate::validate(&config)?;
        let resolved_ptr_map = ptr_map::resolve(&config.ptr_map, &config.schema)?;
        let ddl = ddl::compile(&config.table, &config.schema);

        let mutating =
            config.delete_db || config.create_db || config.delete_table || config.create_table;

        let maintenance = manager.connect_maintenance()?;
        let _lock = if mutating {
            Some(ProvisionLock::acquire(
                maintenance.as_ref(),
                &config.database.dbname,
                &config.table,
                options.lock_timeout,
            )?)
        } else {
            None
        };

        reconcile_database(maintenance.as_ref(), &config, &options)?;

        let executor = manager.connect()?;
        let created = reconcile_table(executor.as_ref(), &config, &ddl)?;
        let columns = table_definition(executor.as_ref(), &config, &options)?;

        if created && !config.data_files.is_empty() {
            populate(executor.as_ref(), &config)?;
        }

        let primary_key = config.primary_key().map(str::to_string);
        Ok(TableHandle {
            executor,
            config,
            columns,
            primary_key,
            ptr_map: resolved_ptr_map,
            ddl,
            created,
        })
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Live column names in ordinal position order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn ptr_map(&self) -> &PtrMap {
        &self.ptr_map
    }

    /// The compiled statement set, for audit.
    pub fn ddl(&self) -> &TableDdl {
        &self.ddl
    }

    /// True if this reconciliation created the table.
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn executor(&self) -> &dyn PgExecutor {
        self.executor.as_ref()
    }

    /// Number of rows currently in the table.
    pub fn row_count(&self) -> Result<i64, ExecError> {
        row_count(self.executor.as_ref(), &self.config.table)
    }
}

fn advance(target: TargetKind, name: &str, state: &mut TargetState, next: TargetState) {
    log::debug!("{} '{}': {:?} -> {:?}", target, name, state, next);
    *state = next;
}

/// Reconcile the database target on the maintenance connection.
fn reconcile_database(
    maintenance: &dyn PgExecutor,
    config: &TableConfig,
    options: &WaitOptions,
) -> Result<(), Error> {
    let dbname = &config.database.dbname;
    let mut state = TargetState::Unknown;

    if config.delete_db {
        let stmt = ddl::drop_database(dbname);
        log::info!("SQL: {}", stmt);
        maintenance.execute(&stmt)?;
        advance(TargetKind::Database, dbname, &mut state, TargetState::Deleted);
    }

    let exists = connection::database_exists(maintenance, dbname)?;
    advance(TargetKind::Database, dbname, &mut state, TargetState::Checked);
    if exists {
        advance(TargetKind::Database, dbname, &mut state, TargetState::Present);
    } else {
        advance(TargetKind::Database, dbname, &mut state, TargetState::Absent);
        if config.create_db {
            let stmt = ddl::create_database(dbname);
            log::info!("SQL: {}", stmt);
            maintenance.execute(&stmt)?;
            advance(TargetKind::Database, dbname, &mut state, TargetState::Created);
        } else if config.wait_for_db {
            wait_until(
                || connection::database_exists(maintenance, dbname),
                options.wait_timeout,
                TargetKind::Database,
                dbname,
            )?;
            advance(TargetKind::Database, dbname, &mut state, TargetState::Present);
        } else {
            return Err(Error::MissingTarget {
                target: TargetKind::Database,
                name: dbname.clone(),
            });
        }
    }

    advance(TargetKind::Database, dbname, &mut state, TargetState::Ready);
    Ok(())
}

/// Reconcile the table target. Returns true if this call created the table.
fn reconcile_table(
    executor: &dyn PgExecutor,
    config: &TableConfig,
    ddl: &TableDdl,
) -> Result<bool, Error> {
    let table = &config.table;
    let mut state = TargetState::Unknown;

    if config.delete_table {
        log::info!("SQL: {}", ddl.drop_table);
        executor.execute(&ddl.drop_table)?;
        advance(TargetKind::Table, table, &mut state, TargetState::Deleted);
    }

    let exists = connection::table_exists(executor, table)?;
    advance(TargetKind::Table, table, &mut state, TargetState::Checked);
    if exists {
        advance(TargetKind::Table, table, &mut state, TargetState::Present);
        advance(TargetKind::Table, table, &mut state, TargetState::Ready);
        return Ok(false);
    }
    advance(TargetKind::Table, table, &mut state, TargetState::Absent);

    if !config.create_table && !config.wait_for_table {
        return Err(Error::MissingTarget {
            target: TargetKind::Table,
            name: table.clone(),
        });
    }

    if !config.create_table {
        // wait_for_table: another process provides the table; the
        // definition probe below polls for it.
        return Ok(false);
    }

    // Other processes may race us to CREATE TABLE; losing the race (or
    // lacking the privilege while the table owner provides it) is a
    // wait-out, not an error.
    log::info!("SQL: {}", ddl.create_table);
    match executor.execute(&ddl.create_table) {
        Ok(_) => {
            for stmt in &ddl.create_indexes {
                log::info!("SQL: {}", stmt);
                executor.execute(stmt)?;
            }
            advance(TargetKind::Table, table, &mut state, TargetState::Created);
            advance(TargetKind::Table, table, &mut state, TargetState::Ready);
            Ok(true)
        }
        Err(e) if e.is_duplicate_object() => {
            log::info!(
                "Table {} cannot be created as it already exists in database {}.",
                table,
                config.database.dbname
            );
            Ok(false)
        }
        Err(e) if e.is_insufficient_privilege() => {
            log::info!(
                "User {} does not have privileges to create table {} in database {}.",
                config.database.user,
                table,
                config.database.dbname
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read back the live table definition, polling until the table exists.
///
/// Covers both the wait-for-table strategy and the lost-creation-race case
/// where another process is still mid-creation. Fails if the live table has
/// columns the configured schema does not declare.
fn table_definition(
    executor: &dyn PgExecutor,
    config: &TableConfig,
    options: &WaitOptions,
) -> Result<Vec<String>, Error> {
    let table = &config.table;
    wait_until(
        || connection::table_exists(executor, table),
        options.wait_timeout,
        TargetKind::Table,
        table,
    )?;

    let live = connection::table_columns(executor, table)?;
    let columns: Vec<String> = live.into_iter().map(|(name, _)| name).collect();
    let unmatched: Vec<String> = columns
        .iter()
        .filter(|name| !config.schema.contains_key(*name))
        .cloned()
        .collect();
    if !unmatched.is_empty() {
        log::error!(
            "{:?} columns differ between DB {} and table {} configuration.",
            unmatched,
            config.database.dbname,
            table
        );
        return Err(Error::SchemaMismatch {
            table: table.clone(),
            unmatched,
        });
    }
    Ok(columns)
}

/// Load bootstrap data, only into a table this reconciliation created and
/// only while it is still empty.
fn populate(executor: &dyn PgExecutor, config: &TableConfig) -> Result<(), Error> {
    let table = &config.table;
    let count = row_count(executor, table).map_err(Error::Exec)?;
    if count != 0 {
        return Ok(());
    }
    let loader = DataLoader::new(
        &config.data_file_folder,
        &config.data_files,
        &config.conversions,
    );
    let mut sink = ExecutorSink::new(executor, table);
    match loader.load(&mut sink) {
        Ok(rows) => {
            log::info!("Loaded {} bootstrap row(s) into table {}", rows, table);
            Ok(())
        }
        Err(source) => Err(Error::DataLoad {
            table: table.clone(),
            source,
        }),
    }
}

fn row_count(executor: &dyn PgExecutor, table: &str) -> Result<i64, ExecError> {
    let stmt = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    executor.query_one(&stmt)?.get_i64(0)
}

/// Poll `probe` at backoff intervals until it reports true.
///
/// `deadline` bounds the whole loop; `None` polls until the target appears.
fn wait_until<F>(
    mut probe: F,
    deadline: Option<Duration>,
    target: TargetKind,
    name: &str,
) -> Result<(), Error>
where
    F: FnMut() -> Result<bool, ExecError>,
{
    let start = Instant::now();
    let mut backoff = Backoff::new();
    loop {
        if probe()? {
            return Ok(());
        }
        if let Some(limit) = deadline {
            if start.elapsed() >= limit {
                return Err(Error::WaitTimeout {
                    target,
                    name: name.to_string(),
                });
            }
        }
        let delay = backoff.next().expect("backoff is unbounded");
        log::info!(
            "{} {} does not yet exist. Waiting {:.2}s to retry.",
            target,
            name,
            delay.as_secs_f64()
        );
        std::thread::sleep(delay);
    }
}
