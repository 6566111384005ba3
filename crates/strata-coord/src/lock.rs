//! Per-table shared/exclusive leases.
//!
//! Many readers or one writer per table. Acquisition waits up to the
//! configured timeout and then fails with `LockUnavailable`, which callers
//! treat as transient: back off and retry the whole operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use strata_common::config::LeaseConfig;
use strata_common::types::TableIdAndVersion;
use strata_common::{StrataError, StrataResult};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct TableLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Hands out per-table leases with multiple-readers/single-writer
/// semantics.
pub struct TableLockManager {
    config: LeaseConfig,
    locks: DashMap<TableIdAndVersion, Arc<TableLock>>,
}

impl TableLockManager {
    /// Creates a lock manager with the given lease timeouts.
    #[must_use]
    pub fn new(config: LeaseConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, table: TableIdAndVersion) -> Arc<TableLock> {
        self.locks.entry(table).or_default().clone()
    }

    /// Acquires the shared (read) lease, waiting up to the configured
    /// read timeout.
    pub fn read_lease(&self, table: TableIdAndVersion) -> StrataResult<ReadLease> {
        let lock = self.lock_for(table);
        let deadline = Instant::now() + self.config.read_timeout;
        let mut state = lock.state.lock();
        while state.writer {
            if lock.released.wait_until(&mut state, deadline).timed_out() {
                warn!(%table, "read lease acquisition timed out");
                return Err(Self::unavailable(table, "read", self.config.read_timeout));
            }
        }
        state.readers += 1;
        drop(state);
        Ok(ReadLease { table, lock })
    }

    /// Acquires the exclusive (write) lease, waiting up to the configured
    /// write timeout.
    pub fn write_lease(&self, table: TableIdAndVersion) -> StrataResult<WriteLease> {
        let lock = self.lock_for(table);
        let deadline = Instant::now() + self.config.write_timeout;
        let mut state = lock.state.lock();
        while state.writer || state.readers > 0 {
            if lock.released.wait_until(&mut state, deadline).timed_out() {
                warn!(%table, "write lease acquisition timed out");
                return Err(Self::unavailable(table, "write", self.config.write_timeout));
            }
        }
        state.writer = true;
        drop(state);
        Ok(WriteLease { table, lock })
    }

    fn unavailable(table: TableIdAndVersion, mode: &'static str, waited: Duration) -> StrataError {
        StrataError::LockUnavailable {
            table,
            mode,
            waited_ms: waited.as_millis() as u64,
        }
    }
}

/// A held shared lease; released on drop.
#[derive(Debug)]
pub struct ReadLease {
    table: TableIdAndVersion,
    lock: Arc<TableLock>,
}

impl ReadLease {
    /// The leased table.
    #[must_use]
    pub fn table(&self) -> TableIdAndVersion {
        self.table
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.lock.released.notify_all();
        }
    }
}

/// A held exclusive lease; released on drop.
#[derive(Debug)]
pub struct WriteLease {
    table: TableIdAndVersion,
    lock: Arc<TableLock>,
}

impl WriteLease {
    /// The leased table.
    #[must_use]
    pub fn table(&self) -> TableIdAndVersion {
        self.table
    }
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.writer = false;
        self.lock.released.notify_all();
    }
}
