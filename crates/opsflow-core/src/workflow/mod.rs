//! Workflow automation engine.
//!
//! - `graph`: structural validation of node graphs (cycles, dangling edges,
//!   reachability, branch labels).
//! - `plan`: topological execution plan and ancestor visibility.
//! - `definition`: the Definition Store service (create, update, toggle,
//!   duplicate, delete).
//! - `handler` / `nodes`: type-keyed node handler registry and built-ins.
//! - `engine`: walks a pinned snapshot, persisting every node result.
//! - `dispatcher`: matches domain events, webhooks and schedule ticks to
//!   definitions with idempotent run creation.
//! - `schedule` / `poller`: durable time-based triggers and resumption.
//! - `codec`: versioned import/export documents (JSON and YAML).

pub mod codec;
pub mod context;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod nodes;
pub mod plan;
pub mod poller;
pub mod retry;
pub mod schedule;

#[cfg(test)]
pub(crate) mod fixtures;
