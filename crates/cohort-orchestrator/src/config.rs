use crate::scaling::ScalingConfig;
use cohort_core::AgentRole;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of the orchestrator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Failed attempts after which a task fails for good.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Period of the health and scaling sweep.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Expected heartbeat period of the agents.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Missed heartbeats before an agent is evicted.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,
    /// How long an assistance request may wait for a helper.
    #[serde(default = "default_assistance_wait_ms")]
    pub assistance_wait_ms: u64,
    /// First delay before retrying the channel after an outage.
    #[serde(default = "default_channel_backoff_ms")]
    pub channel_backoff_ms: u64,
    /// Ceiling of the channel retry delay.
    #[serde(default = "default_channel_backoff_max_ms")]
    pub channel_backoff_max_ms: u64,
    /// Agents started at boot, one entry per agent.
    #[serde(default = "default_initial_agents")]
    pub initial_agents: Vec<AgentRole>,
    /// Where to persist snapshots. None disables persistence.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// How long tasks of a completed project stay queryable before they
    /// are archived.
    #[serde(default = "default_archive_after_ms")]
    pub archive_after_ms: u64,
    /// Auto-scaling policy.
    #[serde(default)]
    pub scaling: ScalingConfig,
}

fn default_max_retries() -> u32 {
    3
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_max_missed_heartbeats() -> u32 {
    3
}

fn default_assistance_wait_ms() -> u64 {
    30_000
}

fn default_channel_backoff_ms() -> u64 {
    500
}

fn default_channel_backoff_max_ms() -> u64 {
    30_000
}

fn default_archive_after_ms() -> u64 {
    300_000
}

fn default_initial_agents() -> Vec<AgentRole> {
    AgentRole::ALL.to_vec()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            tick_ms: default_tick_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
            assistance_wait_ms: default_assistance_wait_ms(),
            channel_backoff_ms: default_channel_backoff_ms(),
            channel_backoff_max_ms: default_channel_backoff_max_ms(),
            initial_agents: default_initial_agents(),
            snapshot_path: None,
            archive_after_ms: default_archive_after_ms(),
            scaling: ScalingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// [`tick_ms`](Self::tick_ms) as a `Duration`.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// [`heartbeat_interval_ms`](Self::heartbeat_interval_ms) as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// [`assistance_wait_ms`](Self::assistance_wait_ms) as a `Duration`.
    pub fn assistance_wait(&self) -> Duration {
        Duration::from_millis(self.assistance_wait_ms)
    }

    /// Delay before the `attempt`-th channel retry (0-based), doubling and capped.
    pub fn channel_backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .channel_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.channel_backoff_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_missed_heartbeats, 3);
        assert_eq!(config.initial_agents.len(), 4);
        assert!(config.snapshot_path.is_none());
        assert_eq!(config.archive_after_ms, 300_000);
        assert!(config.scaling.enabled);
    }

    #[test]
    fn test_partial_toml() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
max_retries = 5
initial_agents = ["planner", "implementer", "implementer"]
snapshot_path = "state/cohort.json"

[scaling]
backlog_threshold = 6
"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_agents[2], AgentRole::Implementer);
        assert_eq!(config.scaling.backlog_threshold, 6);
        assert_eq!(config.scaling.max_population, 16);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("state/cohort.json")));
    }

    #[test]
    fn test_channel_backoff_is_capped() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.channel_backoff(0), Duration::from_millis(500));
        assert_eq!(config.channel_backoff(2), Duration::from_millis(2_000));
        assert_eq!(config.channel_backoff(30), Duration::from_millis(30_000));
    }
}
