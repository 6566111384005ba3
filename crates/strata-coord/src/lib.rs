//! Coordination for the Strata table engine.
//!
//! Each table is the unit of serialization: truth mutations, schema
//! transactions, and index rebuilds take the table's exclusive lease,
//! while queries share the read lease. The table status state machine
//! tracks whether a table's index is processing, available, or failed,
//! guarded by reset tokens so a stale worker can never clobber newer work.

mod heartbeat;
mod lock;
mod status;

pub use heartbeat::{Heartbeat, Watchdog};
pub use lock::{ReadLease, TableLockManager, WriteLease};
pub use status::{StatusListener, TableStatus, TableStatusStore};
