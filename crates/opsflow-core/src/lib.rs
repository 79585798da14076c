//! Business logic and repository trait definitions for Opsflow.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the workflow engine itself: graph validation, the
//! definition service, trigger dispatch, execution and the transport codec.
//! It depends only on `opsflow-types` -- never on `opsflow-infra` or any
//! database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
