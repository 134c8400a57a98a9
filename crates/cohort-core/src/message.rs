use crate::capability::{AgentRole, Capability, Priority};
use crate::ids::{AgentId, ProjectId, TaskId};
use crate::state::AgentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind tag of a [`Message`], derived from its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Orchestrator hands a task to an agent.
    TaskAssignment,
    /// Agent finished a task.
    TaskCompleted,
    /// Agent failed a task.
    TaskFailed,
    /// Agent refused an assignment.
    TaskDeclined,
    /// Agent asks for help with a capability.
    AssistanceRequest,
    /// Answer to an assistance request.
    AssistanceResponse,
    /// Heartbeat or state change.
    StatusUpdate,
    /// Project progress for the front end.
    ProgressReport,
    /// Agent registration.
    AgentReady,
    /// Registration accepted.
    RegistrationAck,
    /// A task failed for good.
    Escalation,
    /// Stop an agent.
    Shutdown,
    /// Result of a liveness sweep.
    HealthReport,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// Overall state of a project, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    /// Waiting for the planner's decomposition.
    Planning,
    /// Plan installed, tasks running.
    InProgress,
    /// Every task completed.
    Completed,
    /// Some task failed or stayed blocked.
    Failed,
}

impl ProjectState {
    /// Completed or failed.
    pub fn is_finished(self) -> bool {
        matches!(self, ProjectState::Completed | ProjectState::Failed)
    }
}

/// Orchestrator → agent: execute this task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// Task to run.
    pub task_id: TaskId,
    /// Project the task belongs to.
    pub project_id: ProjectId,
    /// Short title.
    pub title: String,
    /// What to do.
    pub description: String,
    /// Capability the agent must have.
    pub capability: Capability,
    /// Scheduling priority.
    pub priority: Priority,
    /// Artifacts of completed dependencies, or the requester's question for
    /// assistance work.
    #[serde(default)]
    pub context: Option<String>,
    /// Set when the task is help requested by another agent.
    #[serde(default)]
    pub assistance_for: Option<AgentId>,
}

/// Agent → orchestrator: task finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    /// Task that finished.
    pub task_id: TaskId,
    /// Agent that ran it.
    pub agent_id: AgentId,
    /// The work product.
    pub artifact: String,
    /// Wall time spent on the task.
    pub duration_ms: u64,
    /// True when the task completed without assistance it asked for.
    #[serde(default)]
    pub degraded: bool,
}

/// Agent → orchestrator: task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailed {
    /// Task that failed.
    pub task_id: TaskId,
    /// Agent that ran it.
    pub agent_id: AgentId,
    /// Why it failed.
    pub reason: String,
    /// The failure is due to the agent shutting down.
    #[serde(default)]
    pub terminated: bool,
}

/// Agent → orchestrator: assignment refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDeclined {
    /// Task that was refused.
    pub task_id: TaskId,
    /// Agent that refused it.
    pub agent_id: AgentId,
    /// Why it was refused.
    pub reason: String,
    /// The agent does not have the task's capability.
    pub capability_mismatch: bool,
}

/// Agent → orchestrator: help needed with a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistanceRequest {
    /// Agent asking for help.
    pub requester: AgentId,
    /// Capability the helper needs.
    pub capability: Capability,
    /// The question, handed to the helper as context.
    pub question: String,
    /// The requester's current task, used to scope the help to its project.
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

/// Orchestrator → agent: answer to an [`AssistanceRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistanceResponse {
    /// Whether a helper answered.
    pub granted: bool,
    /// Agent that answered.
    #[serde(default)]
    pub helper: Option<AgentId>,
    /// The helper's answer.
    #[serde(default)]
    pub answer: Option<String>,
    /// Why the request was denied.
    #[serde(default)]
    pub reason: Option<String>,
}

impl AssistanceResponse {
    /// A helper's answer.
    pub fn granted(helper: AgentId, answer: impl Into<String>) -> Self {
        Self {
            granted: true,
            helper: Some(helper),
            answer: Some(answer.into()),
            reason: None,
        }
    }

    /// No help available.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            helper: None,
            answer: None,
            reason: Some(reason.into()),
        }
    }
}

/// Agent → orchestrator: heartbeat and state-change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Reporting agent.
    pub agent_id: AgentId,
    /// Its role.
    pub role: AgentRole,
    /// Its state at send time.
    pub state: AgentState,
    /// Task it is working on.
    #[serde(default)]
    pub current_task: Option<TaskId>,
    /// Capabilities it currently advertises.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Orchestrator → front end: project progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Project reported on.
    pub project_id: ProjectId,
    /// Derived project state.
    pub state: ProjectState,
    /// Some task failed for good or finished degraded.
    pub degraded: bool,
    /// Plan tasks.
    pub total: usize,
    /// Plan tasks completed.
    pub completed: usize,
    /// Plan tasks failed.
    pub failed: usize,
    /// Plan tasks blocked by a failed dependency.
    pub blocked: usize,
    /// Plan tasks assigned or running.
    pub in_flight: usize,
    /// First sprint with unfinished tasks.
    #[serde(default)]
    pub current_sprint: Option<u32>,
    /// Sprint announced as completed by this report.
    #[serde(default)]
    pub sprint_completed: Option<u32>,
    /// What triggered the report.
    pub note: String,
}

/// Agent → orchestrator: registration and capability advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReady {
    /// Agent registering.
    pub agent_id: AgentId,
    /// Its role.
    pub role: AgentRole,
    /// Capabilities it advertises.
    pub capabilities: Vec<Capability>,
}

/// Orchestrator → agent: registration accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationAck {
    /// Agent accepted into the pool.
    pub agent_id: AgentId,
}

/// Orchestrator → front end: a task failed for good and blocked others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// Task that failed for good.
    pub task_id: TaskId,
    /// Its project.
    pub project_id: ProjectId,
    /// Last failure reason.
    pub reason: String,
    /// Dependents now blocked.
    pub blocked: Vec<TaskId>,
}

/// Orchestrator → agent: stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownNotice {
    /// Why the agent is asked to stop.
    pub reason: String,
}

/// Orchestrator → `health` topic: result of one liveness sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Live agents.
    pub population: usize,
    /// Idle agents.
    pub idle: usize,
    /// Ready tasks waiting for an agent.
    pub backlog: usize,
    /// Agents declared unresponsive by this sweep.
    #[serde(default)]
    pub unresponsive: Vec<AgentId>,
}

/// Typed payload of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    /// See [`TaskAssignment`].
    TaskAssignment(TaskAssignment),
    /// See [`TaskCompleted`].
    TaskCompleted(TaskCompleted),
    /// See [`TaskFailed`].
    TaskFailed(TaskFailed),
    /// See [`TaskDeclined`].
    TaskDeclined(TaskDeclined),
    /// See [`AssistanceRequest`].
    AssistanceRequest(AssistanceRequest),
    /// See [`AssistanceResponse`].
    AssistanceResponse(AssistanceResponse),
    /// See [`StatusUpdate`].
    StatusUpdate(StatusUpdate),
    /// See [`ProgressReport`].
    ProgressReport(ProgressReport),
    /// See [`AgentReady`].
    AgentReady(AgentReady),
    /// See [`RegistrationAck`].
    RegistrationAck(RegistrationAck),
    /// See [`Escalation`].
    Escalation(Escalation),
    /// See [`ShutdownNotice`].
    Shutdown(ShutdownNotice),
    /// See [`HealthReport`].
    HealthReport(HealthReport),
}

impl MessageBody {
    /// Kind tag of this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::TaskAssignment(_) => MessageKind::TaskAssignment,
            MessageBody::TaskCompleted(_) => MessageKind::TaskCompleted,
            MessageBody::TaskFailed(_) => MessageKind::TaskFailed,
            MessageBody::TaskDeclined(_) => MessageKind::TaskDeclined,
            MessageBody::AssistanceRequest(_) => MessageKind::AssistanceRequest,
            MessageBody::AssistanceResponse(_) => MessageKind::AssistanceResponse,
            MessageBody::StatusUpdate(_) => MessageKind::StatusUpdate,
            MessageBody::ProgressReport(_) => MessageKind::ProgressReport,
            MessageBody::AgentReady(_) => MessageKind::AgentReady,
            MessageBody::RegistrationAck(_) => MessageKind::RegistrationAck,
            MessageBody::Escalation(_) => MessageKind::Escalation,
            MessageBody::Shutdown(_) => MessageKind::Shutdown,
            MessageBody::HealthReport(_) => MessageKind::HealthReport,
        }
    }
}

/// An immutable envelope exchanged over the message channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id; consumers deduplicate on it.
    pub id: Uuid,
    /// Sending agent, or the orchestrator.
    pub sender: AgentId,
    /// `None` means broadcast.
    #[serde(default)]
    pub recipient: Option<AgentId>,
    /// Pairs a reply with its request.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// Typed payload.
    pub body: MessageBody,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message addressed to `recipient`.
    pub fn new(sender: AgentId, recipient: Option<AgentId>, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipient,
            correlation_id: None,
            body,
            timestamp: Utc::now(),
        }
    }

    /// Creates a message for the orchestrator.
    pub fn to_orchestrator(sender: AgentId, body: MessageBody) -> Self {
        Self::new(sender, Some(AgentId::orchestrator()), body)
    }

    /// Creates a message sent by the orchestrator.
    pub fn from_orchestrator(recipient: Option<AgentId>, body: MessageBody) -> Self {
        Self::new(AgentId::orchestrator(), recipient, body)
    }

    /// Pair with a request.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Builds the reply to this message: addressed to the sender and carrying
    /// the same correlation id (or this message's id when it had none).
    pub fn reply(&self, sender: AgentId, body: MessageBody) -> Self {
        Self::new(sender, Some(self.sender.clone()), body)
            .with_correlation(self.correlation_id.unwrap_or(self.id))
    }

    /// Kind tag of the body.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// No recipient.
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }
}
