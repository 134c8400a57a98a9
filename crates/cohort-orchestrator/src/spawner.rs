use async_trait::async_trait;
use cohort_agent::{AgentHandle, AgentProfile, AgentRuntime, ModelProfile, RetryingInference, RuntimeConfig};
use cohort_channel::MessageChannel;
use cohort_core::{AgentId, AgentRole, CohortError, CohortResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Creates and destroys worker agents on behalf of the orchestrator.
///
/// A spawned agent is not usable until it registers over the message channel;
/// the orchestrator only learns about it through its `agent_ready` request.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    /// Start a new agent of `role` and return the id it will register with.
    async fn spawn(&self, role: AgentRole) -> CohortResult<AgentId>;

    /// Stop an agent. Unknown ids are ignored.
    async fn retire(&self, id: &AgentId) -> CohortResult<()>;

    /// Stop every agent started by this spawner.
    async fn shutdown_all(&self);
}

/// Runs agents as tokio tasks in this process.
pub struct LocalSpawner {
    channel: Arc<dyn MessageChannel>,
    inference: Arc<RetryingInference>,
    base_model: ModelProfile,
    runtime: RuntimeConfig,
    counters: Mutex<BTreeMap<AgentRole, u32>>,
    handles: Mutex<HashMap<AgentId, AgentHandle>>,
    root: CancellationToken,
}

impl LocalSpawner {
    /// A spawner whose agents share `channel` and `inference`.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        inference: Arc<RetryingInference>,
        base_model: ModelProfile,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            channel,
            inference,
            base_model,
            runtime,
            counters: Mutex::new(BTreeMap::new()),
            handles: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Ids look like `implementer-003` and are never reused within a run.
    fn next_id(&self, role: AgentRole) -> AgentId {
        let mut counters = self.counters.lock();
        let n = counters.entry(role).or_insert(0);
        *n += 1;
        AgentId::new(format!("{}-{:03}", role.as_str(), n))
    }

    /// Forget agents that stopped on their own, e.g. after a `shutdown` message.
    fn prune_finished(&self) {
        self.handles.lock().retain(|_, h| !h.is_finished());
    }

    /// Agents whose task is still running.
    pub fn active(&self) -> Vec<AgentId> {
        self.prune_finished();
        let mut ids: Vec<AgentId> = self.handles.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl AgentSpawner for LocalSpawner {
    async fn spawn(&self, role: AgentRole) -> CohortResult<AgentId> {
        if self.root.is_cancelled() {
            return Err(CohortError::Orchestrator("spawner is shut down".into()));
        }
        self.prune_finished();
        let id = self.next_id(role);
        let profile = AgentProfile::for_role(role, &self.base_model);
        let runtime = AgentRuntime::new(
            id.clone(),
            profile,
            self.channel.clone(),
            self.inference.clone(),
            self.runtime.clone(),
        );
        let handle = runtime.spawn_with_token(self.root.child_token());
        self.handles.lock().insert(id.clone(), handle);
        info!(agent_id = %id, role = %role, "Spawned agent");
        Ok(id)
    }

    async fn retire(&self, id: &AgentId) -> CohortResult<()> {
        let handle = self.handles.lock().remove(id);
        match handle {
            Some(handle) => {
                handle.shutdown();
                info!(agent_id = %id, "Retiring agent");
                if let Err(e) = handle.join().await {
                    debug!(agent_id = %id, error = %e, "Agent task ended abnormally");
                }
            }
            None => debug!(agent_id = %id, "Retire requested for unknown agent"),
        }
        Ok(())
    }

    async fn shutdown_all(&self) {
        self.root.cancel();
        let handles: Vec<AgentHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            let id = handle.id().clone();
            if let Err(e) = handle.join().await {
                debug!(agent_id = %id, error = %e, "Agent task ended abnormally");
            }
        }
        info!(count, "All local agents stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cohort_agent::{CompletionRequest, InferenceBackend, InferenceError, RetryPolicy};
    use cohort_channel::InMemoryChannel;
    use cohort_core::AgentState;
    use std::time::Duration;

    struct EchoBackend;

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        async fn complete(
            &self,
            request: &CompletionRequest,
            _model: &ModelProfile,
        ) -> Result<String, InferenceError> {
            Ok(request.prompt.clone())
        }
    }

    fn spawner() -> LocalSpawner {
        let channel: Arc<dyn MessageChannel> = Arc::new(InMemoryChannel::default());
        let inference = Arc::new(RetryingInference::new(
            Arc::new(EchoBackend),
            RetryPolicy::default(),
        ));
        let runtime = RuntimeConfig {
            registration_timeout_ms: 20,
            registration_attempts: 1,
            ..RuntimeConfig::default()
        };
        LocalSpawner::new(channel, inference, ModelProfile::default(), runtime)
    }

    #[tokio::test]
    async fn test_ids_are_sequential_per_role() {
        let spawner = spawner();
        let a = spawner.spawn(AgentRole::Implementer).await.unwrap();
        let b = spawner.spawn(AgentRole::Implementer).await.unwrap();
        let c = spawner.spawn(AgentRole::Validator).await.unwrap();
        assert_eq!(a.as_str(), "implementer-001");
        assert_eq!(b.as_str(), "implementer-002");
        assert_eq!(c.as_str(), "validator-001");
        spawner.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_retire_stops_agent() {
        let spawner = spawner();
        let id = spawner.spawn(AgentRole::Designer).await.unwrap();
        let state = spawner.handles.lock().get(&id).unwrap().watch_state();
        spawner.retire(&id).await.unwrap();
        assert_eq!(*state.borrow(), AgentState::ShuttingDown);
        assert!(spawner.active().is_empty());
        // Unknown ids are ignored.
        spawner.retire(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_forgets_agents_that_stopped() {
        let spawner = spawner();
        let first = spawner.spawn(AgentRole::Implementer).await.unwrap();
        // Registration times out with nobody answering, so the agent stops.
        tokio::time::timeout(Duration::from_secs(2), async {
            while !spawner.handles.lock().get(&first).unwrap().is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let second = spawner.spawn(AgentRole::Implementer).await.unwrap();
        assert_eq!(spawner.handles.lock().len(), 1);
        assert!(spawner.handles.lock().contains_key(&second));
        spawner.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_no_spawn_after_shutdown() {
        let spawner = spawner();
        spawner.shutdown_all().await;
        assert!(spawner.spawn(AgentRole::Planner).await.is_err());
    }
}
