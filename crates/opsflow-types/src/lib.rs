//! Shared domain types for Opsflow.
//!
//! This crate contains the core domain types used across the workflow engine:
//! workflow definitions, execution runs, node results, engine events, config,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod workflow;
