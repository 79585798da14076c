//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (opsflow-infra) implements. The core crate never depends on any
//! specific storage technology. `memory` provides in-process implementations
//! for tests and embedded use.

pub mod execution;
pub mod memory;
pub mod workflow;
