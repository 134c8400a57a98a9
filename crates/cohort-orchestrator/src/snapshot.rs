use crate::monitor::PoolMetrics;
use crate::registry::AgentRecord;
use crate::types::{Project, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cohort_core::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything the orchestrator owns, at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Registered agents.
    pub agents: Vec<AgentRecord>,
    /// Tasks still in the graph.
    pub tasks: Vec<Task>,
    /// Submitted projects.
    pub projects: Vec<Project>,
    /// Pool counters.
    #[serde(default)]
    pub metrics: PoolMetrics,
}

/// Persistence for [`OrchestratorSnapshot`]s.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &OrchestratorSnapshot) -> CohortResult<()>;
    /// The stored snapshot, if any.
    async fn load(&self) -> CohortResult<Option<OrchestratorSnapshot>>;
}

/// Snapshot kept as one pretty-printed JSON file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// A store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the snapshot lives in.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &OrchestratorSnapshot) -> CohortResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        // Readers never see a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> CohortResult<Option<OrchestratorSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        let snapshot = serde_json::from_str(&data)
            .map_err(|e| CohortError::Config(format!("Failed to parse snapshot: {e}")))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{Artifact, TaskState};
    use cohort_core::{AgentId, Capability};

    fn snapshot() -> OrchestratorSnapshot {
        let project = Project::new("Build a todo app");
        let mut task = Task::new(project.id, "Build API", Capability::from("implementer"))
            .with_sprint(1);
        task.state = TaskState::Completed;
        task.artifact = Some(Artifact::new("fn main() {}", AgentId::from("implementer-001")).degraded(true));
        OrchestratorSnapshot {
            taken_at: Utc::now(),
            agents: Vec::new(),
            tasks: vec![task],
            projects: vec![project],
            metrics: PoolMetrics::default(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("state/snapshot.json"));
        let original = snapshot();
        store.save(&original).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.tasks, original.tasks);
        assert_eq!(loaded.projects, original.projects);
        assert!(!dir.path().join("state/snapshot.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let store = FileSnapshotStore::new(path);
        assert!(matches!(store.load().await, Err(CohortError::Config(_))));
    }
}
