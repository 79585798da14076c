//! Infrastructure layer for Opsflow.
//!
//! Contains implementations of the repository traits defined in `opsflow-core`
//! (SQLite), the config loader, inbound webhook signature checks and the
//! outbound `webhook_call` node handler.

pub mod config;
pub mod http_node;
pub mod sqlite;
pub mod webhook;
