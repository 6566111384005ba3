//! Engine error types.
//!
//! The taxonomy distinguishes caller bugs (`InvalidArgument`), optimistic
//! concurrency losses (`Conflict`, `InvalidStatusToken`), transient
//! conditions worth retrying (`LockUnavailable`, `Recoverable`,
//! `TableUnavailable`), and hard failures.

use std::fmt;
use thiserror::Error;

use crate::types::{TableIdAndVersion, TableState};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and are stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation was cancelled by the caller.
    Cancelled = 0x0004,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0101,

    // Truth-store errors (0x0200 - 0x02FF)
    /// Optimistic concurrency conflict.
    Conflict = 0x0200,
    /// A referenced record does not exist.
    NotFound = 0x0201,

    // Coordination errors (0x0300 - 0x03FF)
    /// A table lease could not be acquired in time.
    LockUnavailable = 0x0300,
    /// A status reset-token no longer matches.
    InvalidStatusToken = 0x0301,
    /// The table's index is still being built.
    TableUnavailable = 0x0302,
    /// The table's index build failed.
    TableFailed = 0x0303,
    /// Transient condition; the whole operation should be re-queued.
    Recoverable = 0x0304,

    // Query errors (0x0400 - 0x04FF)
    /// Query text could not be parsed.
    Syntax = 0x0400,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Truth",
            0x03 => "Coordination",
            0x04 => "Query",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Strata.
///
/// Each variant carries enough context for the caller to decide whether to
/// surface, poll, or retry.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided. These are caller bugs and are never
    /// retried internally.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// The caller abandoned the operation.
    #[error("operation was cancelled")]
    Cancelled,

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Optimistic concurrency lost: a row version or etag no longer matches
    /// the truth. The caller must re-read and retry; the engine never
    /// silently merges.
    #[error("conflicting update: {message}")]
    Conflict {
        /// What conflicted.
        message: String,
    },

    /// A referenced column, status row, transaction, or snapshot is missing.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing record.
        what: String,
    },

    /// A table lease could not be acquired within the timeout. Transient;
    /// the caller should back off and retry the whole operation.
    #[error("could not acquire {mode} lease on table {table} within {waited_ms}ms")]
    LockUnavailable {
        /// The contended table.
        table: TableIdAndVersion,
        /// "read" or "write".
        mode: &'static str,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// A status reset-token did not match: the table's status was reset
    /// after the token was issued. Never retried automatically - the
    /// caller's view of table state is stale.
    #[error("the reset-token for table {table} was invalid; the status was reset after the token was acquired")]
    InvalidStatusToken {
        /// The table whose status moved on.
        table: TableIdAndVersion,
    },

    /// The table exists but its index is mid-build.
    #[error("table {table} is not available (state: {state})")]
    TableUnavailable {
        /// The table being built.
        table: TableIdAndVersion,
        /// The current state, for caller display.
        state: TableState,
    },

    /// The table exists but its index build failed.
    #[error("table {table} failed to build: {message}")]
    TableFailed {
        /// The failed table.
        table: TableIdAndVersion,
        /// The recorded failure message.
        message: String,
    },

    /// Transient condition (e.g. waiting for shard connectivity). A
    /// message-queue caller should re-queue the job rather than discard it.
    #[error("recoverable failure: {message}")]
    Recoverable {
        /// Description of the transient condition.
        message: String,
    },

    /// Query text could not be parsed.
    #[error("query syntax error: {message}")]
    Syntax {
        /// Parser message.
        message: String,
    },
}

impl StrataError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::LockUnavailable { .. } => ErrorCode::LockUnavailable,
            Self::InvalidStatusToken { .. } => ErrorCode::InvalidStatusToken,
            Self::TableUnavailable { .. } => ErrorCode::TableUnavailable,
            Self::TableFailed { .. } => ErrorCode::TableFailed,
            Self::Recoverable { .. } => ErrorCode::Recoverable,
            Self::Syntax { .. } => ErrorCode::Syntax,
        }
    }

    /// Returns true if the whole operation is worth retrying after a
    /// back-off or a poll.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. } | Self::Recoverable { .. } | Self::TableUnavailable { .. }
        )
    }

    /// Returns true if this error represents an optimistic concurrency
    /// loss that requires the caller to re-read before retrying.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::InvalidStatusToken { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a recoverable error.
    #[must_use]
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable {
            message: message.into(),
        }
    }
}
