use crate::ids::{AgentId, TaskId};
use crate::Capability;
use thiserror::Error;

/// A convenience `Result` alias using [`CohortError`].
pub type CohortResult<T> = Result<T, CohortError>;

/// Top-level error type for the Cohort agent pool.
///
/// Variants follow the failure taxonomy of the coordination core: transport
/// failures, inference failures local to one agent, routing bugs, liveness
/// failures, and dependency failures that must be escalated.
#[derive(Error, Debug)]
pub enum CohortError {
    /// The message transport is down; the orchestrator pauses assignment.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// A bounded wait expired (request/response, registration, assistance).
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An inference call exceeded its deadline.
    #[error("Inference timeout: {0}")]
    InferenceTimeout(String),

    /// The inference service was unavailable or answered with garbage.
    #[error("Inference error: {0}")]
    Inference(String),

    /// A task was routed to an agent that does not advertise its capability.
    #[error("Capability mismatch: task {task_id} requires '{capability}'")]
    CapabilityMismatch {
        /// The task that was misrouted.
        task_id: TaskId,
        /// The capability the task requires.
        capability: Capability,
    },

    /// An agent stopped sending heartbeats.
    #[error("Agent unresponsive: {0}")]
    AgentUnresponsive(AgentId),

    /// A task cannot run because one of its dependencies failed.
    #[error("Dependency failed: task {task_id} blocked by {dependency}")]
    DependencyFailed {
        /// The blocked task.
        task_id: TaskId,
        /// The failed dependency.
        dependency: TaskId,
    },

    /// An entity lookup failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A state machine refused a transition.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// A project decomposition could not be turned into a task graph.
    #[error("Plan error: {0}")]
    Plan(String),

    /// The operation was cancelled (agent shutdown).
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An error from the orchestrator control loop.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CohortError {
    /// Whether the error is a transport outage rather than a logic failure.
    pub fn is_channel_outage(&self) -> bool {
        matches!(self, CohortError::ChannelUnavailable(_))
    }
}
