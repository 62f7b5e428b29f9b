use convoy_agent::{ToolManagerConfig, WorkerConfig};
use convoy_bus::BusConfig;
use convoy_gateway::ServerConfig;
use convoy_orchestrator::PlannerConfig;
use serde::Deserialize;
use std::path::Path;

pub const BUS_URL_ENV: &str = "CONVOY_BUS_URL";
pub const PLANNER_URL_ENV: &str = "CONVOY_PLANNER_URL";

#[derive(Debug, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default = "default_planner")]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Workers run without tool access when this section is absent.
    #[serde(default)]
    pub tool_manager: Option<ToolManagerConfig>,
}

fn default_planner() -> PlannerConfig {
    PlannerConfig::new("http://localhost:8000")
}

impl ConvoyConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config: ConvoyConfig = toml::from_str(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment wins over the file for the broker and planner URLs.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BUS_URL_ENV).filter(|v| !v.is_empty()) {
            self.bus.url = url;
        }
        if let Some(url) = lookup(PLANNER_URL_ENV).filter(|v| !v.is_empty()) {
            self.planner.llm_service_url = url;
        }
    }
}
