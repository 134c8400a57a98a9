use chrono::{DateTime, Utc};
use cohort_core::{AgentId, AgentRole, AgentState, Capability, CohortError, CohortResult, TaskId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::Duration;

/// Completion counters for one capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityStats {
    /// Tasks completed.
    pub completed: u32,
    /// Tasks failed.
    pub failed: u32,
}

/// The orchestrator's view of one agent.
///
/// `state` is the availability the orchestrator tracks: it moves to
/// `Assigned` the moment a task is reserved, before the agent hears about it.
/// `reported_state` is whatever the agent last said in a status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent id.
    pub id: AgentId,
    /// Role the agent registered with.
    pub role: AgentRole,
    /// Capabilities it serves. Shrinks when it declines a mismatched task.
    pub capabilities: Vec<Capability>,
    /// Availability as the orchestrator tracks it.
    pub state: AgentState,
    /// State from the agent's last status update.
    pub reported_state: AgentState,
    /// Task reserved for or held by the agent.
    pub current_task: Option<TaskId>,
    /// Timestamp of the last message from the agent.
    pub last_heartbeat: DateTime<Utc>,
    /// First registration.
    pub registered_at: DateTime<Utc>,
    /// When the agent last became idle.
    pub idle_since: Option<DateTime<Utc>>,
    /// Tasks completed.
    pub tasks_completed: u32,
    /// Tasks failed, including evictions.
    pub tasks_failed: u32,
    /// Summed duration of completed tasks.
    pub total_duration_ms: u64,
    /// Completion counters per capability.
    #[serde(default)]
    pub per_capability: BTreeMap<Capability, CapabilityStats>,
}

impl AgentRecord {
    fn new(id: AgentId, role: AgentRole, capabilities: Vec<Capability>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            capabilities,
            state: AgentState::Idle,
            reported_state: AgentState::Idle,
            current_task: None,
            last_heartbeat: now,
            registered_at: now,
            idle_since: Some(now),
            tasks_completed: 0,
            tasks_failed: 0,
            total_duration_ms: 0,
            per_capability: BTreeMap::new(),
        }
    }

    /// Whether the agent advertises `capability`.
    pub fn serves(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether the agent is free for work.
    pub fn is_idle(&self) -> bool {
        self.state == AgentState::Idle
    }

    /// Completed plus failed.
    pub fn tasks_handled(&self) -> u32 {
        self.tasks_completed + self.tasks_failed
    }

    /// Mean duration of a completed task, zero before the first one.
    /// Failures report no duration and are not counted.
    pub fn average_duration_ms(&self) -> u64 {
        match u64::from(self.tasks_completed) {
            0 => 0,
            completed => self.total_duration_ms / completed,
        }
    }

    /// Success rate on `capability` in permille. No history counts as 500.
    pub fn success_permille(&self, capability: &Capability) -> u32 {
        match self.per_capability.get(capability) {
            Some(stats) if stats.completed + stats.failed > 0 => {
                stats.completed * 1000 / (stats.completed + stats.failed)
            }
            _ => 500,
        }
    }

    /// How long the agent has been idle, zero when busy.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        match (self.state, self.idle_since) {
            (AgentState::Idle, Some(since)) => (now - since).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Every live agent, keyed by id.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentId, AgentRecord>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration. Re-registering an id keeps its history but
    /// resets its availability.
    pub fn register(
        &mut self,
        id: AgentId,
        role: AgentRole,
        capabilities: Vec<Capability>,
        now: DateTime<Utc>,
    ) -> &AgentRecord {
        self.agents
            .entry(id.clone())
            .and_modify(|r| {
                r.role = role;
                r.capabilities = capabilities.clone();
                r.state = AgentState::Idle;
                r.reported_state = AgentState::Idle;
                r.current_task = None;
                r.last_heartbeat = now;
                r.idle_since = Some(now);
            })
            .or_insert_with(|| AgentRecord::new(id, role, capabilities, now))
    }

    /// Note a status update. Returns `false` for an unknown agent.
    ///
    /// Only liveness and the reported state are taken from the update; the
    /// availability state is driven by the orchestrator's own reservations so
    /// a stale `Idle` heartbeat cannot expose a reserved agent.
    pub fn heartbeat(&mut self, id: &AgentId, reported: AgentState, now: DateTime<Utc>) -> bool {
        match self.agents.get_mut(id) {
            Some(record) => {
                record.last_heartbeat = now;
                record.reported_state = reported;
                true
            }
            None => false,
        }
    }

    /// Mark an idle agent as holding `task`.
    pub fn reserve(&mut self, id: &AgentId, task: TaskId) -> CohortResult<()> {
        let record = self.record_mut(id)?;
        if !record.is_idle() {
            return Err(CohortError::InvalidTransition(format!(
                "agent {id} is {} and cannot take task {task}",
                record.state
            )));
        }
        record.state = AgentState::Assigned;
        record.current_task = Some(task);
        record.idle_since = None;
        Ok(())
    }

    /// The agent no longer holds a task.
    pub fn release(&mut self, id: &AgentId, now: DateTime<Utc>) {
        if let Some(record) = self.agents.get_mut(id) {
            if record.state != AgentState::ShuttingDown {
                record.state = AgentState::Idle;
                record.idle_since = Some(now);
            }
            record.current_task = None;
        }
    }

    /// Keep an agent out of selection without a task until it reports Idle.
    pub fn hold(&mut self, id: &AgentId) {
        if let Some(record) = self.agents.get_mut(id) {
            if record.state != AgentState::ShuttingDown {
                record.state = AgentState::Assigned;
                record.current_task = None;
                record.idle_since = None;
            }
        }
    }

    /// Treat every agent as just heard from.
    pub fn touch_all(&mut self, now: DateTime<Utc>) {
        for record in self.agents.values_mut() {
            record.last_heartbeat = now;
        }
    }

    /// Count a completion.
    pub fn record_completion(&mut self, id: &AgentId, capability: &Capability, duration_ms: u64) {
        if let Some(record) = self.agents.get_mut(id) {
            record.tasks_completed += 1;
            record.total_duration_ms += duration_ms;
            record.per_capability.entry(capability.clone()).or_default().completed += 1;
        }
    }

    /// Count a failure.
    pub fn record_failure(&mut self, id: &AgentId, capability: &Capability) {
        if let Some(record) = self.agents.get_mut(id) {
            record.tasks_failed += 1;
            record.per_capability.entry(capability.clone()).or_default().failed += 1;
        }
    }

    /// Stop routing `capability` to an agent that declined it as a mismatch.
    pub fn remove_capability(&mut self, id: &AgentId, capability: &Capability) {
        if let Some(record) = self.agents.get_mut(id) {
            record.capabilities.retain(|c| c != capability);
        }
    }

    /// Mark an agent as leaving. It is no longer selectable but stays
    /// registered until it confirms or is evicted.
    pub fn mark_retiring(&mut self, id: &AgentId) {
        if let Some(record) = self.agents.get_mut(id) {
            record.state = AgentState::ShuttingDown;
            record.idle_since = None;
        }
    }

    /// Drop an agent. Returns its record if it was known.
    pub fn remove(&mut self, id: &AgentId) -> Option<AgentRecord> {
        self.agents.remove(id)
    }

    /// Best idle agent for `capability`: fewest tasks handled, then highest
    /// success rate on the capability, then lowest id.
    pub fn select_for(&self, capability: &Capability, exclude: Option<&AgentId>) -> Option<AgentId> {
        self.agents
            .values()
            .filter(|r| r.is_idle() && r.serves(capability))
            .filter(|r| exclude != Some(&r.id))
            .min_by_key(|r| {
                (
                    r.tasks_handled(),
                    Reverse(r.success_permille(capability)),
                    r.id.clone(),
                )
            })
            .map(|r| r.id.clone())
    }

    /// Agents whose last heartbeat is older than `timeout`.
    pub fn unresponsive(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|r| (now - r.last_heartbeat).to_std().unwrap_or_default() > timeout)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Live agents per role. Retiring agents are not counted.
    pub fn population_by_role(&self) -> BTreeMap<AgentRole, usize> {
        let mut counts = BTreeMap::new();
        for record in self.agents.values() {
            if record.state != AgentState::ShuttingDown {
                *counts.entry(record.role).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Mean task duration of every agent that completed something.
    pub fn average_durations(&self) -> BTreeMap<AgentId, u64> {
        self.agents
            .values()
            .filter(|r| r.tasks_completed > 0)
            .map(|r| (r.id.clone(), r.average_duration_ms()))
            .collect()
    }

    /// Live agents that advertise `capability`.
    pub fn serving(&self, capability: &Capability) -> usize {
        self.agents
            .values()
            .filter(|r| r.state != AgentState::ShuttingDown && r.serves(capability))
            .count()
    }

    /// Agents free for work.
    pub fn idle_count(&self) -> usize {
        self.agents.values().filter(|r| r.is_idle()).count()
    }

    /// An agent by id.
    pub fn get(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    fn record_mut(&mut self, id: &AgentId) -> CohortResult<&mut AgentRecord> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| CohortError::NotFound(format!("agent {id}")))
    }

    /// Every agent, ordered by id.
    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry_with(ids: &[&str]) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        let now = Utc::now();
        for id in ids {
            registry.register(
                AgentId::from(*id),
                AgentRole::Implementer,
                AgentRole::Implementer.default_capabilities(),
                now,
            );
        }
        registry
    }

    fn implementer() -> Capability {
        Capability::from(Capability::IMPLEMENTER)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry_with(&["implementer-001"]);
        let record = registry.get(&AgentId::from("implementer-001")).unwrap();
        assert!(record.is_idle());
        assert!(record.serves(&implementer()));
        assert_eq!(registry.population_by_role()[&AgentRole::Implementer], 1);
    }

    #[test]
    fn test_select_prefers_least_loaded() {
        let mut registry = registry_with(&["implementer-001", "implementer-002"]);
        registry.record_completion(&AgentId::from("implementer-001"), &implementer(), 10);

        assert_eq!(
            registry.select_for(&implementer(), None),
            Some(AgentId::from("implementer-002"))
        );
    }

    #[test]
    fn test_select_ties_break_on_success_rate_then_id() {
        let mut registry = registry_with(&["implementer-001", "implementer-002", "implementer-003"]);
        registry.record_failure(&AgentId::from("implementer-001"), &implementer());
        registry.record_completion(&AgentId::from("implementer-002"), &implementer(), 10);
        registry.record_completion(&AgentId::from("implementer-003"), &implementer(), 10);

        // 002 and 003 tie on load and success rate; the lower id wins.
        assert_eq!(
            registry.select_for(&implementer(), None),
            Some(AgentId::from("implementer-002"))
        );
    }

    #[test]
    fn test_reserved_agent_is_not_selectable() {
        let mut registry = registry_with(&["implementer-001"]);
        let id = AgentId::from("implementer-001");
        registry.reserve(&id, Uuid::new_v4()).unwrap();

        assert!(registry.select_for(&implementer(), None).is_none());
        assert!(registry.reserve(&id, Uuid::new_v4()).is_err());

        // A heartbeat claiming idle does not free the reservation.
        registry.heartbeat(&id, AgentState::Idle, Utc::now());
        assert!(registry.select_for(&implementer(), None).is_none());

        registry.release(&id, Utc::now());
        assert_eq!(registry.select_for(&implementer(), None), Some(id));
    }

    #[test]
    fn test_exclude_requester() {
        let registry = registry_with(&["implementer-001"]);
        let id = AgentId::from("implementer-001");
        assert!(registry.select_for(&implementer(), Some(&id)).is_none());
    }

    #[test]
    fn test_removed_capability_is_not_routed() {
        let mut registry = registry_with(&["implementer-001"]);
        registry.remove_capability(&AgentId::from("implementer-001"), &implementer());
        assert!(registry.select_for(&implementer(), None).is_none());
        assert_eq!(registry.serving(&implementer()), 0);
    }

    #[test]
    fn test_unresponsive_detection() {
        let mut registry = registry_with(&["implementer-001", "implementer-002"]);
        let later = Utc::now() + chrono::Duration::seconds(60);
        registry.heartbeat(&AgentId::from("implementer-002"), AgentState::Idle, later);

        let stale = registry.unresponsive(later, Duration::from_secs(30));
        assert_eq!(stale, vec![AgentId::from("implementer-001")]);
    }

    #[test]
    fn test_unknown_heartbeat() {
        let mut registry = AgentRegistry::new();
        assert!(!registry.heartbeat(&AgentId::from("ghost-001"), AgentState::Idle, Utc::now()));
    }

    #[test]
    fn test_success_rate_defaults_to_even() {
        let registry = registry_with(&["implementer-001"]);
        let record = registry.get(&AgentId::from("implementer-001")).unwrap();
        assert_eq!(record.success_permille(&implementer()), 500);
    }

    #[test]
    fn test_average_duration() {
        let mut registry = registry_with(&["implementer-001", "implementer-002"]);
        let id = AgentId::from("implementer-001");
        assert_eq!(registry.get(&id).unwrap().average_duration_ms(), 0);

        registry.record_completion(&id, &implementer(), 100);
        registry.record_completion(&id, &implementer(), 300);
        registry.record_failure(&id, &implementer());
        assert_eq!(registry.get(&id).unwrap().average_duration_ms(), 200);

        let averages = registry.average_durations();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[&id], 200);
    }

    #[test]
    fn test_retiring_agents_leave_population() {
        let mut registry = registry_with(&["implementer-001", "implementer-002"]);
        registry.mark_retiring(&AgentId::from("implementer-001"));
        assert_eq!(registry.population_by_role()[&AgentRole::Implementer], 1);
        assert_eq!(registry.idle_count(), 1);
    }
}
