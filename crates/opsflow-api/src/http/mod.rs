//! HTTP/REST API layer for Opsflow.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format,
//! signed webhook intake and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
