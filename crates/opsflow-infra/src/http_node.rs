//! `webhook_call` node handler: outbound HTTP from a workflow.
//!
//! Config keys:
//! - `url` (required), `method` (default `POST`)
//! - `headers`: object of header name -> string
//! - `body`: a string is sent as text, anything else as JSON
//!
//! `url`, header values and `body` may contain `{{ trigger.* }}` /
//! `{{ nodes.* }}` templates. Server errors, 429 and transport failures are
//! retryable; other non-2xx responses fail the node immediately.

use std::time::Duration;

use opsflow_core::workflow::handler::{NodeExecutionError, NodeHandler, NodeInput, NodeOutcome};
use opsflow_types::config::WebhookCallConfig;
use serde_json::{Value, json};

pub struct WebhookCallHandler {
    client: reqwest::Client,
}

impl WebhookCallHandler {
    pub fn new(config: &WebhookCallConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }
}

impl NodeHandler for WebhookCallHandler {
    fn node_type(&self) -> &str {
        "webhook_call"
    }

    fn default_max_retries(&self) -> u32 {
        3
    }

    async fn execute(&self, input: &NodeInput) -> Result<NodeOutcome, NodeExecutionError> {
        let scope = &input.scope;
        let url = input
            .node
            .config_str("url")
            .map(|u| scope.resolve_string(u))
            .ok_or_else(|| {
                NodeExecutionError::Fatal(format!(
                    "webhook_call node '{}' has no url",
                    input.node.id
                ))
            })?;

        let method = input.node.config_str("method").unwrap_or("POST");
        let http_method: reqwest::Method = method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| NodeExecutionError::Fatal(format!("invalid HTTP method: {method}")))?;

        let mut request = self.client.request(http_method, &url);

        if let Some(Value::Object(headers)) = input.config().get("headers") {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => scope.resolve_string(s),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        match input.config().get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => request = request.body(scope.resolve_string(s)),
            Some(other) => request = request.json(&scope.resolve(other)),
        }

        let response = request.send().await.map_err(|e| {
            NodeExecutionError::Retryable(format!("HTTP request to '{url}' failed: {e}"))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            NodeExecutionError::Retryable(format!("failed to read HTTP response body: {e}"))
        })?;

        tracing::info!(
            run_id = %input.run_id,
            node_id = %input.node.id,
            url = url.as_str(),
            status = status.as_u16(),
            attempt = input.attempt,
            "webhook_call completed"
        );

        if !status.is_success() {
            let message = format!("HTTP {} from '{url}': {}", status.as_u16(), truncate(&text));
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                NodeExecutionError::Retryable(message)
            } else {
                NodeExecutionError::Fatal(message)
            });
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(NodeOutcome::Output(json!({
            "status": status.as_u16(),
            "body": body,
        })))
    }
}

fn truncate(text: &str) -> &str {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
