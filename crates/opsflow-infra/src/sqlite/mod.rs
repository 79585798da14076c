//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

mod convert;
pub mod execution;
pub mod pool;
pub mod workflow;
