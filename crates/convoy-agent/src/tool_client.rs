use crate::config::ToolManagerConfig;
use convoy_core::{ConvoyError, ConvoyResult};
use convoy_resilience::{with_retry_if, CircuitBreaker, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

const TARGET: &str = "tool-manager";

/// Body of the tool manager's `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHealth {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Client for the tool-manager service.
///
/// Every call is retried on transient failures and passes through one
/// breaker shared by all calls of this client. Breaker rejections are not
/// retried.
pub struct ToolManagerClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ToolManagerClient {
    pub fn new(config: ToolManagerConfig) -> ConvoyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ConvoyError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            retry: config.retry,
            breaker: CircuitBreaker::new(
                TARGET,
                config.breaker_threshold,
                Duration::from_millis(config.breaker_reset_ms),
            ),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// `GET /v1/tools`.
    pub async fn list_tools(&self) -> ConvoyResult<Vec<Value>> {
        let url = format!("{}/v1/tools", self.base_url);
        let url = &url;
        self.guarded(move || async move {
            let response = self.client.get(url).send().await.map_err(transport)?;
            let body = check_status(response, "list_tools").await?;
            Ok(serde_json::from_value(body)?)
        })
        .await
        .inspect_err(|e| error!(error = %e, "Listing tools failed"))
    }

    /// `POST /v1/tools/{name}/execute` with body `{"params": ...}`.
    pub async fn execute_tool(&self, tool_name: &str, params: Value) -> ConvoyResult<Value> {
        info!(tool = tool_name, "Executing tool");
        let url = format!("{}/v1/tools/{tool_name}/execute", self.base_url);
        let body = json!({ "params": params });
        let (url, body) = (&url, &body);

        let result = self
            .guarded(move || async move {
                let response = self
                    .client
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(transport)?;
                check_status(response, tool_name).await
            })
            .await;

        match &result {
            Ok(_) => info!(tool = tool_name, "Tool executed"),
            Err(e) => error!(tool = tool_name, error = %e, "Tool execution failed"),
        }
        result
    }

    /// `GET /health`.
    pub async fn check_health(&self) -> ConvoyResult<ToolHealth> {
        let url = format!("{}/health", self.base_url);
        let url = &url;
        self.guarded(move || async move {
            let response = self.client.get(url).send().await.map_err(transport)?;
            let body = check_status(response, "health").await?;
            Ok(serde_json::from_value(body)?)
        })
        .await
        .inspect_err(|e| error!(error = %e, "Tool manager health check failed"))
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> ConvoyResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ConvoyResult<T>>,
    {
        let op = &op;
        with_retry_if(
            &self.retry,
            move || self.breaker.call(op),
            ConvoyError::is_transient,
        )
        .await
    }
}

fn transport(e: reqwest::Error) -> ConvoyError {
    ConvoyError::communication(TARGET, e)
}

/// 2xx yields the JSON body. 5xx is a transient communication failure; any
/// other status is a final error attributed to `tool`.
async fn check_status(response: reqwest::Response, tool: &str) -> ConvoyResult<Value> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(transport);
    }

    let text = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {text}");
    if status.is_server_error() {
        Err(ConvoyError::communication(TARGET, message))
    } else {
        Err(ConvoyError::Tool {
            tool_name: tool.to_string(),
            message,
        })
    }
}
