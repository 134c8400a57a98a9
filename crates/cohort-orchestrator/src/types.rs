use chrono::{DateTime, Utc};
use cohort_core::{AgentId, Capability, Priority, ProjectId, ProjectState, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a task in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dependencies.
    Pending,
    /// Every dependency completed; assignable.
    Ready,
    /// Reserved for an agent, assignment published.
    Assigned,
    /// The agent reported it started executing.
    InProgress,
    /// Finished with an artifact.
    Completed,
    /// Out of retries, or abandoned.
    Failed,
    /// A dependency failed for good; waiting for resolution.
    Blocked,
}

impl TaskState {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Held by an agent.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::InProgress)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Assigned => "assigned",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Where a task came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOrigin {
    /// Part of a project plan.
    Project,
    /// Decomposition of a project's requirements by a planner.
    Decomposition,
    /// Help requested by another agent; answered on the request's reply topic.
    Assistance {
        /// Agent that asked for help.
        requester: AgentId,
        /// Correlation id of the request, naming its reply topic.
        correlation_id: Uuid,
        /// After this the request is denied.
        deadline: DateTime<Utc>,
    },
}

/// Result produced by the agent that completed a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The work product.
    pub content: String,
    /// Agent that completed the task.
    pub produced_by: AgentId,
    /// Wall time reported by the agent.
    pub duration_ms: u64,
    /// Produced without assistance that was asked for.
    #[serde(default)]
    pub degraded: bool,
    /// When the orchestrator accepted it.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// An artifact produced now by `produced_by`.
    pub fn new(content: impl Into<String>, produced_by: AgentId) -> Self {
        Self {
            content: content.into(),
            produced_by,
            duration_ms: 0,
            degraded: false,
            created_at: Utc::now(),
        }
    }

    /// Set the reported duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Mark whether the task finished without help it asked for.
    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

/// A unit of work in the task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// Owning project, nil for assistance outside any project.
    pub project_id: ProjectId,
    /// Short title.
    pub title: String,
    /// What to do.
    pub description: String,
    /// Capability an agent needs to take the task.
    pub capability: Capability,
    /// Scheduling priority.
    pub priority: Priority,
    /// Tasks that must complete first.
    pub dependencies: Vec<TaskId>,
    /// Where the task is in its lifecycle.
    pub state: TaskState,
    /// Agent holding or last holding the task.
    pub assigned_agent: Option<AgentId>,
    /// Result, once completed.
    pub artifact: Option<Artifact>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Last failure reason.
    pub failure: Option<String>,
    /// Why the task exists.
    pub origin: TaskOrigin,
    /// Sprint the plan placed it in.
    #[serde(default)]
    pub sprint: Option<u32>,
    /// Creation order inside the graph; the final scheduling tie-break.
    #[serde(default)]
    pub seq: u64,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When it completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A Pending project task with no dependencies.
    pub fn new(project_id: ProjectId, title: impl Into<String>, capability: Capability) -> Self {
        let title = title.into();
        Self {
            id: Uuid::new_v4(),
            project_id,
            description: title.clone(),
            title,
            capability,
            priority: Priority::NORMAL,
            dependencies: Vec::new(),
            state: TaskState::Pending,
            assigned_agent: None,
            artifact: None,
            retry_count: 0,
            failure: None,
            origin: TaskOrigin::Project,
            sprint: None,
            seq: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependencies.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the origin.
    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Set the sprint.
    pub fn with_sprint(mut self, sprint: u32) -> Self {
        self.sprint = Some(sprint);
        self
    }

    /// Whether the task is help for another agent.
    pub fn is_assistance(&self) -> bool {
        matches!(self.origin, TaskOrigin::Assistance { .. })
    }

    /// Counted in project progress (plan work, not planning or help).
    pub fn is_project_work(&self) -> bool {
        self.origin == TaskOrigin::Project
    }
}

/// A submitted project and its plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique id.
    pub id: ProjectId,
    /// The requirements as submitted.
    pub requirements: String,
    /// Plan tasks in plan order.
    pub tasks: Vec<TaskId>,
    /// Plan tasks grouped by sprint number.
    pub sprints: BTreeMap<u32, Vec<TaskId>>,
    /// The decomposition task, when the plan comes from a planner.
    pub planning_task: Option<TaskId>,
    /// Some task failed for good or finished without assistance it needed.
    pub degraded: bool,
    /// Last state reported for the project.
    pub state: ProjectState,
    /// Highest sprint already announced as completed.
    #[serde(default)]
    pub sprints_announced: u32,
    /// When the project was submitted.
    pub created_at: DateTime<Utc>,
    /// When every task had completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Project {
    /// A project in Planning with no tasks yet.
    pub fn new(requirements: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requirements: requirements.into(),
            tasks: Vec::new(),
            sprints: BTreeMap::new(),
            planning_task: None,
            degraded: false,
            state: ProjectState::Planning,
            sprints_announced: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new(Uuid::nil(), "Build API", Capability::from("implementer"));
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.description, "Build API");
        assert_eq!(task.priority, Priority::NORMAL);
        assert!(task.is_project_work());
        assert!(!task.is_assistance());
    }

    #[test]
    fn test_terminal_and_active_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Blocked.is_terminal());
        assert!(TaskState::InProgress.is_active());
        assert!(!TaskState::Ready.is_active());
    }

    #[test]
    fn test_assistance_origin() {
        let task = Task::new(Uuid::nil(), "help", Capability::from("designer")).with_origin(
            TaskOrigin::Assistance {
                requester: AgentId::from("implementer-001"),
                correlation_id: Uuid::new_v4(),
                deadline: Utc::now(),
            },
        );
        assert!(task.is_assistance());
        assert!(!task.is_project_work());
    }
}
