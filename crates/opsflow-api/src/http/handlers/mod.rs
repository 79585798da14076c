//! Request handlers, one module per resource.

pub mod event;
pub mod run;
pub mod workflow;
