//! Import/export of workflows as versioned transport documents.
//!
//! Document shape:
//! ```json
//! { "version": "1.0",
//!   "workflow": { "name", "description", "trigger_type", "nodes": [], "edges": [] } }
//! ```
//! Documents are read in two passes: a structural check over the raw value
//! that reports every problem at once, then typed deserialization. Graph
//! validation is left to [`DefinitionService::create`].

use std::fmt;
use std::str::FromStr;

use opsflow_types::workflow::{
    DOCUMENT_VERSION, DocumentWorkflow, TriggerType, WorkflowDocument, WorkflowDraft,
};
use serde_json::Value;
use uuid::Uuid;

use super::definition::{DefinitionError, DefinitionService};
use crate::repository::execution::ExecutionRepository;
use crate::repository::workflow::WorkflowRepository;

/// Document versions this build can import.
pub const SUPPORTED_VERSIONS: &[&str] = &[DOCUMENT_VERSION];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unsupported document version '{0}' (supported: {supported})", supported = SUPPORTED_VERSIONS.join(", "))]
    UnsupportedVersion(String),

    #[error("invalid document: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("malformed document: {0}")]
    Parse(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// A document could not be encoded for export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to encode document as {format}: {reason}")]
    Encode {
        format: DocumentFormat,
        reason: String,
    },
}

impl ExportError {
    fn encode(format: DocumentFormat, err: impl fmt::Display) -> Self {
        ExportError::Encode {
            format,
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentFormat {
    #[default]
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Guess the format from a file extension; anything else is JSON.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DocumentFormat::Yaml
            }
            _ => DocumentFormat::Json,
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(DocumentFormat::Json),
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            other => Err(format!("unknown document format: '{other}'")),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Json => f.write_str("json"),
            DocumentFormat::Yaml => f.write_str("yaml"),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn render_document(doc: &WorkflowDocument, format: DocumentFormat) -> Result<String, ExportError> {
    match format {
        DocumentFormat::Json => {
            serde_json::to_string_pretty(doc).map_err(|e| ExportError::encode(format, e))
        }
        DocumentFormat::Yaml => {
            serde_yaml_ng::to_string(doc).map_err(|e| ExportError::encode(format, e))
        }
    }
}

/// Parse and check a document without importing it.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<WorkflowDocument, ImportError> {
    let raw: Value = match format {
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| ImportError::Parse(e.to_string()))?
        }
        DocumentFormat::Yaml => {
            serde_yaml_ng::from_str(text).map_err(|e| ImportError::Parse(e.to_string()))?
        }
    };
    check_document(raw)
}

/// Structural check of a raw document value.
///
/// The version is checked first: an unsupported version is reported on its
/// own, since the rest of the document may follow a different layout.
pub fn check_document(raw: Value) -> Result<WorkflowDocument, ImportError> {
    let Value::Object(root) = &raw else {
        return Err(ImportError::Validation(vec![
            "document must be an object".to_string(),
        ]));
    };

    match root.get("version") {
        Some(Value::String(v)) if SUPPORTED_VERSIONS.contains(&v.as_str()) => {}
        Some(Value::String(v)) => return Err(ImportError::UnsupportedVersion(v.clone())),
        Some(_) => {
            return Err(ImportError::Validation(vec![
                "'version' must be a string".to_string(),
            ]));
        }
        None => {
            return Err(ImportError::Validation(vec![
                "missing field 'version'".to_string(),
            ]));
        }
    }

    let Some(Value::Object(workflow)) = root.get("workflow") else {
        return Err(ImportError::Validation(vec![
            "missing object 'workflow'".to_string(),
        ]));
    };

    let mut issues = Vec::new();

    match workflow.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(Value::String(_)) => issues.push("'workflow.name' is empty".to_string()),
        Some(_) => issues.push("'workflow.name' must be a string".to_string()),
        None => issues.push("missing field 'workflow.name'".to_string()),
    }

    match workflow.get("description") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => issues.push("'workflow.description' must be a string".to_string()),
    }

    match workflow.get("trigger_type") {
        Some(Value::String(t)) => {
            if serde_json::from_value::<TriggerType>(Value::String(t.clone())).is_err() {
                issues.push(format!("'workflow.trigger_type' has unknown value '{t}'"));
            }
        }
        Some(_) => issues.push("'workflow.trigger_type' must be a string".to_string()),
        None => issues.push("missing field 'workflow.trigger_type'".to_string()),
    }

    match workflow.get("nodes") {
        Some(Value::Array(nodes)) => {
            for (i, node) in nodes.iter().enumerate() {
                for key in ["id", "type"] {
                    if !node.get(key).is_some_and(Value::is_string) {
                        issues.push(format!("'workflow.nodes[{i}].{key}' must be a string"));
                    }
                }
                if let Some(config) = node.get("config") {
                    if !config.is_object() && !config.is_null() {
                        issues.push(format!("'workflow.nodes[{i}].config' must be an object"));
                    }
                }
            }
        }
        Some(_) => issues.push("'workflow.nodes' must be an array".to_string()),
        None => issues.push("missing field 'workflow.nodes'".to_string()),
    }

    match workflow.get("edges") {
        Some(Value::Array(edges)) => {
            for (i, edge) in edges.iter().enumerate() {
                for key in ["from_node", "to_node"] {
                    if !edge.get(key).is_some_and(Value::is_string) {
                        issues.push(format!("'workflow.edges[{i}].{key}' must be a string"));
                    }
                }
                if let Some(label) = edge.get("branch_label") {
                    if !label.is_string() && !label.is_null() {
                        issues.push(format!(
                            "'workflow.edges[{i}].branch_label' must be a string"
                        ));
                    }
                }
            }
        }
        Some(_) => issues.push("'workflow.edges' must be an array".to_string()),
        None => issues.push("missing field 'workflow.edges'".to_string()),
    }

    if !issues.is_empty() {
        return Err(ImportError::Validation(issues));
    }

    serde_json::from_value(raw).map_err(|e| ImportError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Service operations
// ---------------------------------------------------------------------------

impl<W: WorkflowRepository, E: ExecutionRepository> DefinitionService<W, E> {
    /// Export a live definition as a transport document.
    pub async fn export(&self, id: &Uuid) -> Result<WorkflowDocument, DefinitionError> {
        let def = self.get(id).await?;
        Ok(WorkflowDocument {
            version: DOCUMENT_VERSION.to_string(),
            workflow: DocumentWorkflow::from(&def),
        })
    }

    /// Create a new, inactive definition from a checked document.
    pub async fn import(&self, doc: WorkflowDocument) -> Result<Uuid, ImportError> {
        if !SUPPORTED_VERSIONS.contains(&doc.version.as_str()) {
            return Err(ImportError::UnsupportedVersion(doc.version));
        }

        let workflow = doc.workflow;
        let draft = WorkflowDraft {
            name: workflow.name,
            description: workflow.description,
            trigger_type: workflow.trigger_type,
            nodes: workflow.nodes,
            edges: workflow.edges,
            is_active: false,
        };
        let def = self.create(draft).await?;
        tracing::info!(workflow_id = %def.id, name = %def.name, "workflow imported");
        Ok(def.id)
    }

    /// Parse, check and import a document in one step.
    pub async fn import_text(
        &self,
        text: &str,
        format: DocumentFormat,
    ) -> Result<Uuid, ImportError> {
        let doc = parse_document(text, format)?;
        self.import(doc).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
