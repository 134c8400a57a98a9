use crate::registry::AgentRegistry;
use chrono::{DateTime, Utc};
use cohort_core::{AgentId, AgentRole, Capability};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Elastic scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Turns scaling on.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ready tasks per role above which the pool grows.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,
    /// How long the backlog must stay above the threshold before a spawn.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Minimum gap between two spawns of the same role.
    #[serde(default = "default_spawn_cooldown_ms")]
    pub spawn_cooldown_ms: u64,
    /// Idle time after which an agent may be retired.
    #[serde(default = "default_idle_retire_ms")]
    pub idle_retire_ms: u64,
    /// Minimum gap between two retirements.
    #[serde(default = "default_retire_cooldown_ms")]
    pub retire_cooldown_ms: u64,
    /// Population the pool never shrinks below.
    #[serde(default = "default_min_population")]
    pub min_population: usize,
    /// Population the pool never grows beyond.
    #[serde(default = "default_max_population")]
    pub max_population: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_backlog_threshold() -> usize {
    3
}

fn default_debounce_ms() -> u64 {
    5_000
}

fn default_spawn_cooldown_ms() -> u64 {
    5_000
}

fn default_idle_retire_ms() -> u64 {
    120_000
}

fn default_retire_cooldown_ms() -> u64 {
    30_000
}

fn default_min_population() -> usize {
    1
}

fn default_max_population() -> usize {
    16
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backlog_threshold: default_backlog_threshold(),
            debounce_ms: default_debounce_ms(),
            spawn_cooldown_ms: default_spawn_cooldown_ms(),
            idle_retire_ms: default_idle_retire_ms(),
            retire_cooldown_ms: default_retire_cooldown_ms(),
            min_population: default_min_population(),
            max_population: default_max_population(),
        }
    }
}

/// One action decided by the [`AutoScaler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDecision {
    /// Start an agent of this role.
    Spawn(AgentRole),
    /// Stop this idle agent.
    Retire(AgentId),
}

/// Debounced, rate-limited pool sizing.
///
/// Growth needs the backlog of a role to stay above the threshold for a full
/// debounce window; each spawn restarts the window. Shrinking retires at most
/// one long-idle agent per cooldown, and only when none of its capabilities
/// has a backlog.
pub struct AutoScaler {
    config: ScalingConfig,
    backlog_since: HashMap<AgentRole, DateTime<Utc>>,
    last_spawn: HashMap<AgentRole, DateTime<Utc>>,
    last_retire: Option<DateTime<Utc>>,
}

impl AutoScaler {
    /// A scaler with no history.
    pub fn new(config: ScalingConfig) -> Self {
        Self {
            config,
            backlog_since: HashMap::new(),
            last_spawn: HashMap::new(),
            last_retire: None,
        }
    }

    /// The policy in use.
    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Decide on spawns and retirements.
    ///
    /// `backlog` is the number of Ready tasks per capability, `pending` the
    /// number of spawned agents that have not registered yet.
    pub fn evaluate(
        &mut self,
        backlog: &BTreeMap<Capability, usize>,
        registry: &AgentRegistry,
        pending: usize,
        now: DateTime<Utc>,
    ) -> Vec<ScalingDecision> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut decisions = Vec::new();
        let mut population = registry.population_by_role().values().sum::<usize>() + pending;

        let mut per_role: BTreeMap<AgentRole, usize> = BTreeMap::new();
        for (capability, count) in backlog {
            if let Some(role) = AgentRole::for_capability(capability) {
                *per_role.entry(role).or_insert(0) += count;
            }
        }

        for role in AgentRole::ALL {
            let count = per_role.get(&role).copied().unwrap_or(0);
            if count <= self.config.backlog_threshold {
                self.backlog_since.remove(&role);
                continue;
            }
            let since = *self.backlog_since.entry(role).or_insert(now);
            let sustained = elapsed(since, now) >= Duration::from_millis(self.config.debounce_ms);
            let cooled = self.last_spawn.get(&role).map_or(true, |last| {
                elapsed(*last, now) >= Duration::from_millis(self.config.spawn_cooldown_ms)
            });
            if !sustained || !cooled {
                continue;
            }
            if population >= self.config.max_population {
                debug!(role = %role, population, "Backlog sustained but pool is at its ceiling");
                continue;
            }
            decisions.push(ScalingDecision::Spawn(role));
            population += 1;
            self.backlog_since.insert(role, now);
            self.last_spawn.insert(role, now);
        }

        if let Some(id) = self.retire_candidate(backlog, registry, population, now) {
            self.last_retire = Some(now);
            decisions.push(ScalingDecision::Retire(id));
        }
        decisions
    }

    fn retire_candidate(
        &self,
        backlog: &BTreeMap<Capability, usize>,
        registry: &AgentRegistry,
        population: usize,
        now: DateTime<Utc>,
    ) -> Option<AgentId> {
        if population <= self.config.min_population {
            return None;
        }
        if let Some(last) = self.last_retire {
            if elapsed(last, now) < Duration::from_millis(self.config.retire_cooldown_ms) {
                return None;
            }
        }
        let idle_limit = Duration::from_millis(self.config.idle_retire_ms);
        registry
            .agents()
            .filter(|r| r.is_idle() && r.idle_for(now) > idle_limit)
            .filter(|r| {
                r.capabilities
                    .iter()
                    .all(|c| backlog.get(c).copied().unwrap_or(0) == 0)
            })
            .max_by_key(|r| (r.idle_for(now), std::cmp::Reverse(r.id.clone())))
            .map(|r| r.id.clone())
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
