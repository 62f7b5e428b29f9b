use async_trait::async_trait;
use convoy_core::{validate_task_assignments, ConvoyError, ConvoyResult, TaskAssignment};
use convoy_resilience::{with_retry_if, RetryPolicy};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};
use uuid::Uuid;

const TARGET: &str = "planner";

/// Guidance sent with every decomposition request.
pub const PLANNING_CONSTRAINTS: [&str; 3] = [
    "Tasks must be atomic and clearly defined",
    "Each task must be achievable by a single agent",
    "Tasks should be ordered by dependency",
];

/// Turns a goal into task assignments.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Returned tasks are schema-valid and carry a task id; the job id is
    /// left for the caller to stamp.
    async fn decompose_goal(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> ConvoyResult<Vec<TaskAssignment>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub llm_service_url: String,
    /// Deadline of one decomposition attempt.
    #[serde(default = "default_planning_timeout_ms")]
    pub planning_timeout_ms: u64,
    /// Total attempts, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl PlannerConfig {
    pub fn new(llm_service_url: impl Into<String>) -> Self {
        Self {
            llm_service_url: llm_service_url.into(),
            planning_timeout_ms: default_planning_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            initial_delay_ms: self.retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            timeout_ms: self.planning_timeout_ms,
            ..RetryPolicy::default()
        }
    }
}

fn default_planning_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

#[derive(Serialize)]
struct DecomposeRequest<'a> {
    goal: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a Map<String, Value>>,
    constraints: &'a [&'a str],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecomposeResponse {
    task_assignments: Vec<Value>,
}

/// Planner backed by the planning service's `POST /decompose`.
pub struct HttpPlanner {
    config: PlannerConfig,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(config: PlannerConfig) -> ConvoyResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConvoyError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    async fn request(
        &self,
        url: &str,
        body: &DecomposeRequest<'_>,
    ) -> ConvoyResult<Vec<Value>> {
        let request_id = Uuid::new_v4();
        let response = self
            .client
            .post(url)
            .header("X-Request-ID", request_id.to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| ConvoyError::communication(TARGET, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ConvoyError::communication(
                TARGET,
                format!("Failed to decompose goal: HTTP {status}"),
            ));
        }

        let parsed: DecomposeResponse = response
            .json()
            .await
            .map_err(|e| ConvoyError::communication(TARGET, e))?;
        info!(
            request_id = %request_id,
            tasks = parsed.task_assignments.len(),
            "Planning service returned tasks"
        );
        Ok(parsed.task_assignments)
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn decompose_goal(
        &self,
        goal: &str,
        context: Option<&Map<String, Value>>,
    ) -> ConvoyResult<Vec<TaskAssignment>> {
        let url = format!(
            "{}/decompose",
            self.config.llm_service_url.trim_end_matches('/')
        );
        let body = DecomposeRequest {
            goal,
            context,
            constraints: &PLANNING_CONSTRAINTS,
        };
        let (url, body) = (&url, &body);

        let decomposed = with_retry_if(
            &self.config.retry_policy(),
            move || self.request(url, body),
            ConvoyError::is_transient,
        )
        .await
        .and_then(|raw| validate_task_assignments(&raw));

        decomposed.inspect_err(|e| {
            error!(error = %e, goal, "Failed to decompose goal after all retries");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(server: &MockServer) -> PlannerConfig {
        PlannerConfig {
            planning_timeout_ms: 2000,
            retry_delay_ms: 10,
            max_retry_delay_ms: 20,
            ..PlannerConfig::new(server.uri())
        }
    }

    #[tokio::test]
    async fn test_decompose_sends_contract_and_validates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decompose"))
            .and(header_exists("X-Request-ID"))
            .and(body_partial_json(json!({
                "goal": "Research AI regulation",
                "constraints": PLANNING_CONSTRAINTS,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "taskAssignments": [
                    {"taskType": "web_search", "description": "search", "parameters": {"q": "ai"}},
                    {"taskType": "data_analysis", "description": "analyse", "parameters": {}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(fast(&server)).unwrap();
        let tasks = planner
            .decompose_goal("Research AI regulation", None)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].task_type, "web_search");
        assert!(tasks.iter().all(|t| !t.task_id.is_nil()));
    }

    #[tokio::test]
    async fn test_non_200_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decompose"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(fast(&server)).unwrap();
        let err = planner.decompose_goal("goal text", None).await.unwrap_err();
        assert!(matches!(err, ConvoyError::Communication { .. }));
    }

    #[tokio::test]
    async fn test_invalid_task_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decompose"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "taskAssignments": [
                    {"taskType": "web_search", "description": "ok", "parameters": {}},
                    {"taskType": "web_search"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(fast(&server)).unwrap();
        let err = planner.decompose_goal("goal text", None).await.unwrap_err();
        match err {
            ConvoyError::Validation { details, .. } => {
                assert_eq!(details[0]["index"], 1);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_context_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/decompose"))
            .and(body_partial_json(json!({"context": {"region": "eu"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"taskAssignments": []})))
            .expect(1)
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(fast(&server)).unwrap();
        let context = json!({"region": "eu"}).as_object().cloned().unwrap();
        let tasks = planner
            .decompose_goal("goal text", Some(&context))
            .await
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"llm_service_url": "http://planner:8000"}"#).unwrap();
        assert_eq!(config.planning_timeout_ms, 30_000);
        assert_eq!(config.max_retries, 3);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout_ms, 30_000);
    }
}
