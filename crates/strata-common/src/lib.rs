//! Shared foundation for the Strata table engine.
//!
//! This crate provides the identifier newtypes, the unified error type,
//! engine-wide constants, and configuration structs used by every other
//! Strata crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::{ErrorCode, StrataError, StrataResult};
