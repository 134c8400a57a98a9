//! Core types and error definitions for the Cohort agent pool.
//!
//! This crate provides the foundational types shared across all Cohort crates:
//! identifiers, capabilities and roles, the agent lifecycle states, and the
//! message envelope exchanged over the message channel.
//!
//! # Main types
//!
//! - [`CohortError`]: Unified error enum for all Cohort subsystems.
//! - [`CohortResult`]: Convenience alias for `Result<T, CohortError>`.
//! - [`AgentRole`] / [`Capability`]: What an agent can do and a task needs.
//! - [`AgentState`]: Agent lifecycle state machine.
//! - [`Message`]: Immutable envelope with a typed [`MessageBody`].

/// Error taxonomy.
pub mod error;
/// Capabilities, roles and priorities.
pub mod capability;
/// Agent, task and project identifiers.
pub mod ids;
/// Message envelope and typed payloads.
pub mod message;
/// Agent lifecycle states.
pub mod state;

pub use capability::{AgentRole, Capability, Priority};
pub use error::{CohortError, CohortResult};
pub use ids::{AgentId, ProjectId, TaskId};
pub use message::{
    AgentReady, AssistanceRequest, AssistanceResponse, Escalation, HealthReport, Message, MessageBody,
    MessageKind, ProgressReport, ProjectState, RegistrationAck, ShutdownNotice, StatusUpdate,
    TaskAssignment, TaskCompleted, TaskDeclined, TaskFailed,
};
pub use state::AgentState;
