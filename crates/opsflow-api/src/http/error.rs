//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use opsflow_core::workflow::codec::{ExportError, ImportError};
use opsflow_core::workflow::definition::DefinitionError;
use opsflow_core::workflow::dispatcher::DispatchError;
use opsflow_core::workflow::engine::EngineError;
use opsflow_types::error::RepositoryError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Definition(DefinitionError),
    Import(ImportError),
    Export(ExportError),
    Dispatch(DispatchError),
    Engine(EngineError),
    Repository(RepositoryError),
    /// Webhook signature missing or wrong.
    Unauthorized(String),
    /// Malformed request body or parameters.
    Validation(String),
    NotFound(String),
}

impl From<DefinitionError> for AppError {
    fn from(e: DefinitionError) -> Self {
        AppError::Definition(e)
    }
}

impl From<ImportError> for AppError {
    fn from(e: ImportError) -> Self {
        AppError::Import(e)
    }
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        AppError::Export(e)
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        AppError::Dispatch(e)
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    fn parts(self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match self {
            AppError::Definition(DefinitionError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow {id} not found"),
                None,
            ),
            AppError::Definition(DefinitionError::Validation(e)) => {
                let details = serde_json::to_value(&e.issues).ok();
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string(), details)
            }
            AppError::Definition(DefinitionError::Conflict(e)) => (
                StatusCode::CONFLICT,
                "VERSION_CONFLICT",
                e.to_string(),
                Some(json!({ "expected": e.expected, "actual": e.actual })),
            ),
            AppError::Definition(DefinitionError::Repository(e)) => AppError::Repository(e).parts(),

            AppError::Import(ImportError::Definition(e)) => AppError::Definition(e).parts(),
            AppError::Import(ImportError::UnsupportedVersion(v)) => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_VERSION",
                ImportError::UnsupportedVersion(v).to_string(),
                None,
            ),
            AppError::Import(ImportError::Validation(issues)) => (
                StatusCode::BAD_REQUEST,
                "IMPORT_VALIDATION_ERROR",
                format!("Invalid document: {} issue(s)", issues.len()),
                Some(json!(issues)),
            ),
            AppError::Import(e @ ImportError::Parse(_)) => {
                (StatusCode::BAD_REQUEST, "IMPORT_PARSE_ERROR", e.to_string(), None)
            }

            AppError::Export(e) => {
                tracing::error!(error = %e, "document export failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_ERROR", e.to_string(), None)
            }

            AppError::Dispatch(DispatchError::WorkflowNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow {id} not found"),
                None,
            ),
            AppError::Dispatch(DispatchError::Repository(e)) => AppError::Repository(e).parts(),
            AppError::Dispatch(e) => (StatusCode::BAD_REQUEST, "DISPATCH_ERROR", e.to_string(), None),

            AppError::Engine(EngineError::RunNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                format!("Run {id} not found"),
                None,
            ),
            AppError::Engine(EngineError::Repository(e)) => AppError::Repository(e).parts(),

            AppError::Repository(RepositoryError::NotFound) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Entity not found".to_string(),
                None,
            ),
            AppError::Repository(RepositoryError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "CONFLICT", msg, None)
            }
            AppError::Repository(e) => {
                tracing::error!(error = %e, "storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string(), None)
            }

            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();
        (status, Json(ApiResponse::error(code, &message, details))).into_response()
    }
}
