//! Advisory-lock serialization of provisioning actions.
//!
//! CREATE/DROP under race produces an undefined winner, so reconcilers
//! targeting the same (database, table) pair serialize their mutating
//! actions through a PostgreSQL advisory lock held on the maintenance
//! connection. Read-only existence probes take no lock.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::executor::PgExecutor;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock guard that releases the advisory lock when dropped.
///
/// Dropping the guard issues `pg_advisory_unlock`; failures during drop are
/// ignored since they cannot be propagated. The session also releases
/// advisory locks automatically when the connection closes.
pub struct ProvisionLock<'a> {
    executor: &'a dyn PgExecutor,
    key: i64,
}

impl<'a> ProvisionLock<'a> {
    /// Acquire the lock for the (database, table) pair, polling
    /// `pg_try_advisory_lock` until it succeeds or `timeout` expires.
    pub fn acquire(
        executor: &'a dyn PgExecutor,
        dbname: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let key = lock_key(dbname, table);
        let stmt = format!("SELECT pg_try_advisory_lock({})", key);
        let start = Instant::now();
        loop {
            let acquired = executor.query_one(&stmt)?.get_bool(0)?;
            if acquired {
                log::debug!(
                    "Acquired provisioning lock {} for {}.{}",
                    key,
                    dbname,
                    table
                );
                return Ok(ProvisionLock { executor, key });
            }
            if start.elapsed() >= timeout {
                return Err(Error::LockTimeout {
                    table: table.to_string(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ProvisionLock<'_> {
    fn drop(&mut self) {
        let stmt = format!("SELECT pg_advisory_unlock({})", self.key);
        let _ = self.executor.query_one(&stmt);
    }
}

/// Derive a stable 64-bit advisory lock key from the (database, table) pair.
fn lock_key(dbname: &str, table: &str) -> i64 {
    let digest = Sha256::digest(format!("{}/{}", dbname, table).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
