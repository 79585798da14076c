//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`, with `/health` outside it.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{event, run, workflow};
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/workflows",
            post(workflow::create_workflow).get(workflow::list_workflows),
        )
        .route("/workflows/import", post(workflow::import_workflow))
        .route(
            "/workflows/{id}",
            get(workflow::get_workflow)
                .put(workflow::update_workflow)
                .delete(workflow::delete_workflow),
        )
        .route("/workflows/{id}/toggle", post(workflow::toggle_workflow))
        .route("/workflows/{id}/duplicate", post(workflow::duplicate_workflow))
        .route("/workflows/{id}/export", get(workflow::export_workflow))
        .route("/workflows/{id}/stats", get(workflow::workflow_stats))
        // Runs
        .route("/workflows/{id}/run", post(workflow::run_workflow))
        .route("/workflows/{id}/runs", get(run::list_runs))
        .route("/runs/{run_id}", get(run::get_run))
        .route("/runs/{run_id}/abort", post(run::abort_run))
        // Triggers
        .route("/events", post(event::dispatch_event))
        .route("/webhooks/{workflow_id}", post(event::receive_webhook));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness probe.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LaunchMode;
    use opsflow_infra::sqlite::pool::DatabasePool;
    use opsflow_infra::webhook::sign_body;
    use opsflow_types::config::OpsflowConfig;
    use serde_json::{Value, json};
    use std::time::Duration;

    struct TestServer {
        base: String,
        client: reqwest::Client,
    }

    impl TestServer {
        async fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
            let data_dir = dir.path().to_path_buf();
            std::mem::forget(dir);

            let pool = DatabasePool::new(&url).await.unwrap();
            let state =
                AppState::from_parts(pool, OpsflowConfig::default(), data_dir, LaunchMode::Background)
                    .unwrap();

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, build_router(state)).await.unwrap();
            });

            Self {
                base: format!("http://{addr}"),
                client: reqwest::Client::new(),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self.client.get(self.url(path)).send().await.unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn wait_for_status(&self, run_id: &str, status: &str) -> Value {
            for _ in 0..100 {
                let (_, body) = self.get(&format!("/api/v1/runs/{run_id}")).await;
                if body["data"]["status"] == status {
                    return body["data"].clone();
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("run {run_id} never reached {status}");
        }
    }

    fn order_workflow() -> Value {
        json!({
            "name": "Order follow-up",
            "trigger_type": "trigger_order_placed",
            "is_active": true,
            "nodes": [
                {"id": "start", "type": "trigger"},
                {"id": "big", "type": "condition", "config": {"expression": "trigger.total > 100"}},
                {"id": "thank", "type": "action", "config": {"action": "send_email"}},
                {"id": "upsell", "type": "action", "config": {"action": "offer_coupon"}}
            ],
            "edges": [
                {"from_node": "start", "to_node": "big"},
                {"from_node": "big", "to_node": "thank", "branch_label": "true"},
                {"from_node": "big", "to_node": "upsell", "branch_label": "false"}
            ]
        })
    }

    #[tokio::test]
    async fn health_is_outside_api_prefix() {
        let server = TestServer::start().await;
        let (status, body) = server.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn order_event_completes_one_run() {
        let server = TestServer::start().await;
        let (status, created) = server.post("/api/v1/workflows", order_workflow()).await;
        assert_eq!(status, 201);
        let id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["version"], 1);

        let event = json!({
            "type": "order_placed",
            "payload": {"order_id": 5, "total": 250},
            "event_id": "ord-5",
            "tenant_id": "acme"
        });
        let (status, dispatched) = server.post("/api/v1/events", event.clone()).await;
        assert_eq!(status, 202);
        let runs = dispatched["data"]["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        let run_id = runs[0]["run_id"].as_str().unwrap().to_string();

        // Redelivery is a no-op.
        let (_, again) = server.post("/api/v1/events", event).await;
        assert!(again["data"]["runs"].as_array().unwrap().is_empty());

        let run = server.wait_for_status(&run_id, "completed").await;
        let results = run["node_results"].as_array().unwrap();
        let upsell = results.iter().find(|r| r["node_id"] == "upsell").unwrap();
        assert_eq!(upsell["status"], "skipped");

        let (_, stats) = server.get(&format!("/api/v1/workflows/{id}/stats")).await;
        assert_eq!(stats["data"]["total_executions"], 1);
        assert_eq!(stats["data"]["successful_executions"], 1);
    }

    #[tokio::test]
    async fn invalid_graph_is_rejected_with_issues() {
        let server = TestServer::start().await;
        let mut wf = order_workflow();
        wf["edges"]
            .as_array_mut()
            .unwrap()
            .push(json!({"from_node": "thank", "to_node": "ghost"}));

        let (status, body) = server.post("/api/v1/workflows", wf).await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
        assert_eq!(body["errors"][0]["details"][0]["kind"], "dangling_edge");

        let (_, list) = server.get("/api/v1/workflows").await;
        assert!(list["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let server = TestServer::start().await;
        let (_, created) = server.post("/api/v1/workflows", order_workflow()).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let mut body = order_workflow();
        body["expected_version"] = json!(1);
        let resp = server
            .client
            .put(server.url(&format!("/api/v1/workflows/{id}")))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let resp = server
            .client
            .put(server.url(&format!("/api/v1/workflows/{id}")))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 409);
    }

    #[tokio::test]
    async fn export_then_import_creates_inactive_copy() {
        let server = TestServer::start().await;
        let (_, created) = server.post("/api/v1/workflows", order_workflow()).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, exported) = server.get(&format!("/api/v1/workflows/{id}/export")).await;
        assert_eq!(status, 200);
        assert_eq!(exported["data"]["version"], "1.0");

        let (status, imported) = server
            .post("/api/v1/workflows/import", exported["data"].clone())
            .await;
        assert_eq!(status, 201);
        assert_ne!(imported["data"]["id"], created["data"]["id"]);
        assert_eq!(imported["data"]["is_active"], false);
        assert_eq!(imported["data"]["nodes"], created["data"]["nodes"]);
        assert_eq!(imported["data"]["edges"], created["data"]["edges"]);

        let mut unsupported = exported["data"].clone();
        unsupported["version"] = json!("9.0");
        let (status, body) = server.post("/api/v1/workflows/import", unsupported).await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["code"], "UNSUPPORTED_VERSION");
    }

    #[tokio::test]
    async fn signed_webhook_triggers_run() {
        let server = TestServer::start().await;
        let wf = json!({
            "name": "Inbound form",
            "trigger_type": "trigger_webhook",
            "is_active": true,
            "nodes": [
                {"id": "hook", "type": "trigger",
                 "config": {"signing_secret": "s3cret", "required_fields": ["email"]}},
                {"id": "log", "type": "action", "config": {"action": "log"}}
            ],
            "edges": [{"from_node": "hook", "to_node": "log"}]
        });
        let (_, created) = server.post("/api/v1/workflows", wf).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();
        let path = server.url(&format!("/api/v1/webhooks/{id}"));

        let body = br#"{"email":"a@example.com"}"#.to_vec();
        let unsigned = server.client.post(&path).body(body.clone()).send().await.unwrap();
        assert_eq!(unsigned.status().as_u16(), 401);

        let signed = server
            .client
            .post(&path)
            .header("X-Opsflow-Signature", sign_body("s3cret", &body).unwrap())
            .header("X-Event-Id", "delivery-1")
            .body(body.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(signed.status().as_u16(), 202);
        let json: Value = signed.json().await.unwrap();
        assert_eq!(json["data"]["duplicate"], false);
        let run_id = json["data"]["run"]["run_id"].as_str().unwrap().to_string();
        server.wait_for_status(&run_id, "completed").await;

        let missing = br#"{"name":"no email"}"#.to_vec();
        let rejected = server
            .client
            .post(&path)
            .header("X-Opsflow-Signature", sign_body("s3cret", &missing).unwrap())
            .body(missing)
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn manual_run_and_abort_of_finished_run() {
        let server = TestServer::start().await;
        let mut wf = order_workflow();
        wf["is_active"] = json!(false);
        let (_, created) = server.post("/api/v1/workflows", wf).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        // Manual runs ignore is_active.
        let (status, started) = server
            .post(&format!("/api/v1/workflows/{id}/run"), json!({"total": 5}))
            .await;
        assert_eq!(status, 202);
        let run_id = started["data"]["run_id"].as_str().unwrap().to_string();
        server.wait_for_status(&run_id, "completed").await;

        // Waiting for the run returns its settled status directly.
        let (status, waited) = server
            .post(
                &format!("/api/v1/workflows/{id}/run?wait_secs=5"),
                json!({"total": 500}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(waited["data"]["status"], "completed");
        assert!(waited["data"]["run_id"].is_string());

        let (status, aborted) = server
            .post(&format!("/api/v1/runs/{run_id}/abort"), json!({}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(aborted["data"]["status"], "completed");

        let (status, _) = server
            .get(&format!("/api/v1/runs/{}", uuid::Uuid::now_v7()))
            .await;
        assert_eq!(status, 404);
    }
}
