//! Engine configuration.
//!
//! Component crates take one of these structs at construction time; every
//! field has a working default.

use std::time::Duration;

use crate::constants::{MAX_BYTES_PER_REQUEST, MAX_ROWS_PER_PAGE};

/// Configuration for per-table lease acquisition.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// How long a reader waits for the shared lease before giving up.
    pub read_timeout: Duration,
    /// How long a writer waits for the exclusive lease before giving up.
    pub write_timeout: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for the table status state machine.
#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// A `Processing` table with no progress update for this long is
    /// considered stalled and gets retriggered.
    pub progress_timeout: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            progress_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Configuration for query compilation and execution.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Maximum rows per page; a full page emits a continuation token.
    pub max_rows_per_page: usize,
    /// Byte budget used to derive the page size from the schema's maximum
    /// row size.
    pub max_bytes_per_request: usize,
    /// Time-to-live for cached query results.
    pub cache_ttl: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_rows_per_page: MAX_ROWS_PER_PAGE,
            max_bytes_per_request: MAX_BYTES_PER_REQUEST,
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for the progress heartbeat used by long index operations.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness signals to the watchdog.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}
