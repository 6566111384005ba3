//! Error handling for Strata.
//!
//! One unified error type and result alias is used across all Strata
//! components; crate-local error enums convert into it at the boundary.

mod engine;

pub use engine::{ErrorCode, StrataError};

/// Result type alias for Strata operations.
pub type StrataResult<T> = std::result::Result<T, StrataError>;
