//! Workflow definition repository trait.
//!
//! Stores the live head of each definition plus an immutable snapshot per
//! version, so runs can always load the exact graph they were pinned to.

use chrono::{DateTime, Utc};
use opsflow_types::error::RepositoryError;
use opsflow_types::workflow::{TriggerType, WorkflowDefinition};
use uuid::Uuid;

/// Repository trait for workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new definition and its first version snapshot.
    fn insert_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a definition's content if it is still at `expected_version`,
    /// and record a snapshot for `def.version`.
    ///
    /// Returns `false` when the stored version moved on (lost race).
    fn update_definition(
        &self,
        def: &WorkflowDefinition,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a live (not deleted) definition.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Get the snapshot of a specific version, deleted or not.
    fn get_version(
        &self,
        id: &Uuid,
        version: u64,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List live definitions ordered by name.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// List live, active definitions with the given trigger type.
    fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Flip `is_active` and return the new value.
    fn toggle_active(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Stamp `deleted_at`. Returns `true` if a live definition was deleted.
    fn soft_delete(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
