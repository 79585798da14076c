//! SQLite workflow repository implementation.
//!
//! The live definition is one row in `workflows` with the graph stored as
//! JSON columns. Every insert/update also writes a full JSON snapshot to
//! `workflow_versions` in the same transaction.

use chrono::{DateTime, Utc};
use opsflow_core::repository::workflow::WorkflowRepository;
use opsflow_types::error::RepositoryError;
use opsflow_types::workflow::{Edge, Node, TriggerType, WorkflowDefinition};
use sqlx::Row;
use uuid::Uuid;

use super::convert::{
    format_datetime, from_json, from_str_enum, parse_datetime, parse_uuid, query_err, to_json,
};
use super::pool::DatabasePool;

const SELECT_DEFINITION: &str = "SELECT id, name, description, trigger_type, nodes, edges, \
     is_active, version, created_at, updated_at, deleted_at FROM workflows";

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn into_definitions(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        defs.push(WorkflowRow::from_row(row).map_err(query_err)?.into_definition()?);
    }
    Ok(defs)
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    trigger_type: String,
    nodes: String,
    edges: String,
    is_active: bool,
    version: i64,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            trigger_type: row.try_get("trigger_type")?,
            nodes: row.try_get("nodes")?,
            edges: row.try_get("edges")?,
            is_active: row.try_get("is_active")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let nodes: Vec<Node> = from_json(&self.nodes, "nodes")?;
        let edges: Vec<Edge> = from_json(&self.edges, "edges")?;
        Ok(WorkflowDefinition {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            trigger_type: from_str_enum::<TriggerType>(&self.trigger_type, "trigger type")?,
            nodes,
            edges,
            is_active: self.is_active,
            version: self.version as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            deleted_at: self.deleted_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

async fn insert_snapshot(
    tx: &mut sqlx::SqliteConnection,
    def: &WorkflowDefinition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO workflow_versions (workflow_id, version, definition, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(def.id.to_string())
    .bind(def.version as i64)
    .bind(to_json(def)?)
    .bind(format_datetime(&def.updated_at))
    .execute(tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(format!(
            "version {} of workflow {} already exists",
            def.version, def.id
        )),
        other => query_err(other),
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, name, description, trigger_type, nodes, edges, is_active, version,
                created_at, updated_at, deleted_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(&def.description)
        .bind(def.trigger_type.as_str())
        .bind(to_json(&def.nodes)?)
        .bind(to_json(&def.edges)?)
        .bind(def.is_active)
        .bind(def.version as i64)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .bind(def.deleted_at.as_ref().map(format_datetime))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("workflow {} already exists", def.id))
            }
            other => query_err(other),
        })?;

        insert_snapshot(&mut tx, def).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_definition(
        &self,
        def: &WorkflowDefinition,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let result = sqlx::query(
            r#"UPDATE workflows SET
                 name = ?, description = ?, trigger_type = ?, nodes = ?, edges = ?,
                 version = ?, updated_at = ?
               WHERE id = ? AND deleted_at IS NULL AND version = ?"#,
        )
        .bind(&def.name)
        .bind(&def.description)
        .bind(def.trigger_type.as_str())
        .bind(to_json(&def.nodes)?)
        .bind(to_json(&def.edges)?)
        .bind(def.version as i64)
        .bind(format_datetime(&def.updated_at))
        .bind(def.id.to_string())
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            let live: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM workflows WHERE id = ? AND deleted_at IS NULL")
                    .bind(def.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(query_err)?;
            return match live {
                Some(_) => Ok(false),
                None => Err(RepositoryError::NotFound),
            };
        }

        insert_snapshot(&mut tx, def).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_DEFINITION} WHERE id = ? AND deleted_at IS NULL"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(
                WorkflowRow::from_row(&row).map_err(query_err)?.into_definition()?,
            )),
            None => Ok(None),
        }
    }

    async fn get_version(
        &self,
        id: &Uuid,
        version: u64,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT definition FROM workflow_versions WHERE workflow_id = ? AND version = ?",
        )
        .bind(id.to_string())
        .bind(version as i64)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|(json,)| from_json(&json, "workflow snapshot"))
            .transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let sql = format!("{SELECT_DEFINITION} WHERE deleted_at IS NULL ORDER BY name ASC, id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        into_definitions(&rows)
    }

    async fn list_active_by_trigger(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let sql = format!(
            "{SELECT_DEFINITION} WHERE deleted_at IS NULL AND is_active = 1 AND trigger_type = ? \
             ORDER BY name ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(trigger_type.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        into_definitions(&rows)
    }

    async fn toggle_active(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"UPDATE workflows SET is_active = 1 - is_active, updated_at = ?
               WHERE id = ? AND deleted_at IS NULL
               RETURNING is_active"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        row.map(|(active,)| active).ok_or(RepositoryError::NotFound)
    }

    async fn soft_delete(&self, id: &Uuid, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflows SET deleted_at = ?, is_active = 0, updated_at = ?
               WHERE id = ? AND deleted_at IS NULL"#,
        )
        .bind(format_datetime(&at))
        .bind(format_datetime(&at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_definition(name: &str, trigger_type: TriggerType) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: Some("follow up on orders".to_string()),
            trigger_type,
            nodes: vec![
                Node::new("start", "trigger"),
                Node::new("check", "condition").with_config("expression", json!("trigger.total > 10")),
                Node::new("vip", "action"),
            ],
            edges: vec![Edge::new("start", "check"), Edge::labeled("check", "vip", "true")],
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips_the_graph() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition("orders", TriggerType::OrderPlaced);
        repo.insert_definition(&def).await.unwrap();

        let loaded = repo.get_definition(&def.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "orders");
        assert_eq!(loaded.trigger_type, TriggerType::OrderPlaced);
        assert_eq!(loaded.nodes, def.nodes);
        assert_eq!(loaded.edges, def.edges);
        assert!(loaded.is_active);
        assert_eq!(loaded.version, 1);

        assert!(matches!(
            repo.insert_definition(&def).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_is_compare_and_swap_and_snapshots_versions() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let mut def = sample_definition("orders", TriggerType::OrderPlaced);
        repo.insert_definition(&def).await.unwrap();

        def.version = 2;
        def.nodes.push(Node::new("extra", "action"));
        assert!(repo.update_definition(&def, 1).await.unwrap());

        def.version = 3;
        assert!(!repo.update_definition(&def, 1).await.unwrap());

        let v1 = repo.get_version(&def.id, 1).await.unwrap().unwrap();
        let v2 = repo.get_version(&def.id, 2).await.unwrap().unwrap();
        assert_eq!(v1.nodes.len(), 3);
        assert_eq!(v2.nodes.len(), 4);
        assert!(repo.get_version(&def.id, 3).await.unwrap().is_none());

        let mut missing = sample_definition("ghost", TriggerType::Manual);
        missing.version = 2;
        assert!(matches!(
            repo.update_definition(&missing, 1).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_filters_by_trigger_and_activation() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let b = sample_definition("b-orders", TriggerType::OrderPlaced);
        let a = sample_definition("a-orders", TriggerType::OrderPlaced);
        let mut paused = sample_definition("paused", TriggerType::OrderPlaced);
        paused.is_active = false;
        let leads = sample_definition("leads", TriggerType::LeadCreated);
        for def in [&b, &a, &paused, &leads] {
            repo.insert_definition(def).await.unwrap();
        }

        let names: Vec<String> = repo
            .list_definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a-orders", "b-orders", "leads", "paused"]);

        let active: Vec<Uuid> = repo
            .list_active_by_trigger(TriggerType::OrderPlaced)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(active, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn toggle_flips_activation() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition("orders", TriggerType::OrderPlaced);
        repo.insert_definition(&def).await.unwrap();

        assert!(!repo.toggle_active(&def.id).await.unwrap());
        assert!(repo.toggle_active(&def.id).await.unwrap());
        assert!(matches!(
            repo.toggle_active(&Uuid::now_v7()).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn soft_delete_hides_definition_but_keeps_snapshots() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let def = sample_definition("orders", TriggerType::OrderPlaced);
        repo.insert_definition(&def).await.unwrap();

        assert!(repo.soft_delete(&def.id, Utc::now()).await.unwrap());
        assert!(!repo.soft_delete(&def.id, Utc::now()).await.unwrap());

        assert!(repo.get_definition(&def.id).await.unwrap().is_none());
        assert!(repo.list_definitions().await.unwrap().is_empty());
        assert!(
            repo.list_active_by_trigger(TriggerType::OrderPlaced)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(repo.get_version(&def.id, 1).await.unwrap().is_some());
        assert!(matches!(
            repo.toggle_active(&def.id).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
