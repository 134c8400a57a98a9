use crate::registry::AgentRegistry;
use chrono::{DateTime, Utc};
use cohort_core::{AgentId, AgentRole, Capability};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Heartbeat liveness policy.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    heartbeat_interval: Duration,
    max_missed: u32,
}

impl HealthMonitor {
    /// Evict after `max_missed` heartbeat intervals of silence.
    pub fn new(heartbeat_interval: Duration, max_missed: u32) -> Self {
        Self {
            heartbeat_interval,
            max_missed: max_missed.max(1),
        }
    }

    /// Silence after which an agent is declared unresponsive.
    pub fn timeout(&self) -> Duration {
        self.heartbeat_interval * self.max_missed
    }

    /// Agents that missed `max_missed` consecutive heartbeats.
    pub fn unresponsive(&self, registry: &AgentRegistry, now: DateTime<Utc>) -> Vec<AgentId> {
        registry.unresponsive(now, self.timeout())
    }
}

/// Latency accumulator for one capability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Completed tasks measured.
    pub count: u64,
    /// Their summed duration.
    pub total_ms: u64,
    /// The longest one.
    pub max_ms: u64,
}

impl LatencyStats {
    /// Mean duration, zero before the first completion.
    pub fn mean_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

/// Pool-wide counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Tasks completed.
    pub tasks_completed: u64,
    /// Tasks failed for good.
    pub tasks_failed: u64,
    /// Failed attempts sent back to Ready.
    pub tasks_retried: u64,
    /// Assistance requests answered.
    pub assistance_granted: u64,
    /// Assistance requests denied.
    pub assistance_denied: u64,
    /// Agents started by the orchestrator.
    pub agents_spawned: u64,
    /// Agents retired by scale-down.
    pub agents_retired: u64,
    /// Agents evicted for missed heartbeats.
    pub agents_evicted: u64,
    /// Escalations published.
    pub escalations: u64,
    /// Task latency per capability.
    pub latency: BTreeMap<Capability, LatencyStats>,
    /// Live agents per role at the last sweep.
    #[serde(default)]
    pub population: BTreeMap<AgentRole, usize>,
    /// Mean completed-task duration per live agent at the last sweep.
    #[serde(default)]
    pub agent_duration_ms: BTreeMap<AgentId, u64>,
}

impl PoolMetrics {
    /// Completed over finished tasks, 1.0 when nothing finished yet.
    pub fn completion_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / finished as f64
        }
    }
}

/// Shared metrics sink, written by the orchestrator loop and readable from
/// any handle.
#[derive(Clone, Default)]
pub struct MetricsRecorder {
    inner: Arc<RwLock<PoolMetrics>>,
}

impl MetricsRecorder {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously persisted counters.
    pub fn restore(metrics: PoolMetrics) -> Self {
        Self {
            inner: Arc::new(RwLock::new(metrics)),
        }
    }

    /// Count a completion and its latency.
    pub async fn task_completed(&self, capability: &Capability, duration_ms: u64) {
        let mut m = self.inner.write().await;
        m.tasks_completed += 1;
        let stats = m.latency.entry(capability.clone()).or_default();
        stats.count += 1;
        stats.total_ms += duration_ms;
        stats.max_ms = stats.max_ms.max(duration_ms);
    }

    /// Count a permanent failure.
    pub async fn task_failed(&self) {
        self.inner.write().await.tasks_failed += 1;
    }

    /// Count a retried attempt.
    pub async fn task_retried(&self) {
        self.inner.write().await.tasks_retried += 1;
    }

    /// Count an assistance request as granted or denied.
    pub async fn assistance(&self, granted: bool) {
        let mut m = self.inner.write().await;
        if granted {
            m.assistance_granted += 1;
        } else {
            m.assistance_denied += 1;
        }
    }

    /// Count a spawn.
    pub async fn agent_spawned(&self) {
        self.inner.write().await.agents_spawned += 1;
    }

    /// Count a retirement.
    pub async fn agent_retired(&self) {
        self.inner.write().await.agents_retired += 1;
    }

    /// Count an eviction.
    pub async fn agent_evicted(&self) {
        self.inner.write().await.agents_evicted += 1;
    }

    /// Count an escalation.
    pub async fn escalation(&self) {
        self.inner.write().await.escalations += 1;
    }

    /// Replace the per-role population.
    pub async fn set_population(&self, population: BTreeMap<AgentRole, usize>) {
        self.inner.write().await.population = population;
    }

    /// Replace the per-agent mean durations.
    pub async fn set_agent_durations(&self, durations: BTreeMap<AgentId, u64>) {
        self.inner.write().await.agent_duration_ms = durations;
    }

    /// A copy of the current counters.
    pub async fn snapshot(&self) -> PoolMetrics {
        self.inner.read().await.clone()
    }

    /// JSON view for dashboards and the CLI.
    pub async fn to_json(&self) -> serde_json::Value {
        let metrics = self.snapshot().await;
        let mean_latency: BTreeMap<String, u64> = metrics
            .latency
            .iter()
            .map(|(cap, stats)| (cap.to_string(), stats.mean_ms()))
            .collect();
        serde_json::json!({
            "completion_rate": metrics.completion_rate(),
            "mean_latency_ms": mean_latency,
            "metrics": metrics,
        })
    }
}
