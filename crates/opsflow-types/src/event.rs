//! Engine lifecycle events.
//!
//! `EngineEvent` is broadcast on the event bus while runs execute. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        run_id: Uuid,
        workflow_id: Uuid,
        pinned_version: u64,
    },

    RunResumed { run_id: Uuid, node_id: String },

    NodeStarted {
        run_id: Uuid,
        node_id: String,
        node_type: String,
        attempt: u32,
    },

    NodeCompleted {
        run_id: Uuid,
        node_id: String,
        duration_ms: u64,
    },

    NodeFailed {
        run_id: Uuid,
        node_id: String,
        error: String,
        will_retry: bool,
    },

    NodeSkipped { run_id: Uuid, node_id: String },

    /// A run parked on a delay node.
    RunSuspended {
        run_id: Uuid,
        node_id: String,
        resume_at: DateTime<Utc>,
    },

    RunCompleted {
        run_id: Uuid,
        workflow_id: Uuid,
    },

    RunFailed {
        run_id: Uuid,
        workflow_id: Uuid,
        error: String,
    },

    RunAborted { run_id: Uuid },
}

impl EngineEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            EngineEvent::RunStarted { run_id, .. }
            | EngineEvent::RunResumed { run_id, .. }
            | EngineEvent::NodeStarted { run_id, .. }
            | EngineEvent::NodeCompleted { run_id, .. }
            | EngineEvent::NodeFailed { run_id, .. }
            | EngineEvent::NodeSkipped { run_id, .. }
            | EngineEvent::RunSuspended { run_id, .. }
            | EngineEvent::RunCompleted { run_id, .. }
            | EngineEvent::RunFailed { run_id, .. }
            | EngineEvent::RunAborted { run_id } => *run_id,
        }
    }

    /// The run stopped making progress: it finished, or parked on a delay.
    pub fn settles_run(&self) -> bool {
        matches!(
            self,
            EngineEvent::RunCompleted { .. }
                | EngineEvent::RunFailed { .. }
                | EngineEvent::RunAborted { .. }
                | EngineEvent::RunSuspended { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let run_id = Uuid::now_v7();
        let event = EngineEvent::NodeFailed {
            run_id,
            node_id: "notify".to_string(),
            error: "503".to_string(),
            will_retry: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_failed");
        assert_eq!(json["will_retry"], true);
        assert_eq!(event.run_id(), run_id);
        assert!(!event.settles_run());
        assert!(EngineEvent::RunAborted { run_id }.settles_run());
    }
}
