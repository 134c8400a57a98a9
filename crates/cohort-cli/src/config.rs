//! `cohort.toml` loading.

use cohort_agent::{ModelProfile, RetryPolicy, RuntimeConfig};
use cohort_channel::ChannelConfig;
use cohort_orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding `[model].base_url`.
pub const MODEL_URL_ENV: &str = "COHORT_MODEL_URL";

/// Every section of the configuration file. All sections are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohortConfig {
    #[serde(default)]
    pub model: ModelProfile,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl CohortConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path`, or fall back to defaults when it does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_toml(&text)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e))
    }

    /// Apply overrides from the environment.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(MODEL_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.model.base_url = url;
        }
        self
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let orch = &self.orchestrator;
        anyhow::ensure!(orch.max_retries >= 1, "orchestrator.max_retries must be at least 1");
        anyhow::ensure!(
            orch.max_missed_heartbeats >= 1,
            "orchestrator.max_missed_heartbeats must be at least 1"
        );
        anyhow::ensure!(
            orch.scaling.min_population <= orch.scaling.max_population,
            "orchestrator.scaling.min_population exceeds max_population"
        );
        anyhow::ensure!(
            orch.initial_agents.len() <= orch.scaling.max_population,
            "more initial agents than orchestrator.scaling.max_population allows"
        );
        anyhow::ensure!(!self.model.model_id.trim().is_empty(), "model.model_id is empty");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_core::AgentRole;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = CohortConfig::from_toml("").unwrap();
        assert_eq!(config.model.model_id, "llama3");
        assert_eq!(config.orchestrator.initial_agents.len(), 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_sections() {
        let config = CohortConfig::from_toml(
            r#"
[model]
model_id = "qwen2.5-coder"
temperature = 0.1

[retry]
max_retries = 5

[channel]
history_limit = 500

[runtime]
heartbeat_interval_ms = 2000

[orchestrator]
initial_agents = ["planner", "implementer"]

[orchestrator.scaling]
max_population = 6
"#,
        )
        .unwrap();
        assert_eq!(config.model.model_id, "qwen2.5-coder");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.channel.history_limit, 500);
        assert_eq!(config.runtime.heartbeat_interval_ms, 2_000);
        assert_eq!(
            config.orchestrator.initial_agents,
            vec![AgentRole::Planner, AgentRole::Implementer]
        );
        assert_eq!(config.orchestrator.scaling.max_population, 6);
    }

    #[test]
    fn test_env_overrides_model_url() {
        let config = CohortConfig::default().with_env(|key| {
            (key == MODEL_URL_ENV).then(|| "http://gpu-box:11434".to_string())
        });
        assert_eq!(config.model.base_url, "http://gpu-box:11434");

        let untouched = CohortConfig::default().with_env(|_| Some("  ".into()));
        assert_eq!(untouched.model.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_validate_rejects_inverted_population() {
        let mut config = CohortConfig::default();
        config.orchestrator.scaling.min_population = 10;
        config.orchestrator.scaling.max_population = 2;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CohortConfig::load(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.orchestrator.max_retries, 3);
    }
}
