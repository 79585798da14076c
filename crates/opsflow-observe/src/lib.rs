//! Observability setup for Opsflow binaries.

pub mod tracing_setup;
