//! Agent runtime for the Cohort agent pool.
//!
//! An agent is a tokio task running [`AgentRuntime`]: it registers with the
//! orchestrator, heartbeats, executes assigned tasks through an
//! [`InferenceBackend`] wrapped in [`RetryingInference`], asks other agents
//! for help through the orchestrator, and releases its task on shutdown.

/// Inference service backends.
pub mod backends;
/// Model, retry and runtime settings.
pub mod config;
/// The inference seam.
pub mod inference;
/// Retries with backoff around a backend.
pub mod retry;
/// Role profiles and prompts.
pub mod roles;
/// The agent loop.
pub mod runtime;

pub use backends::OllamaBackend;
pub use config::{ModelProfile, RetryPolicy, RuntimeConfig};
pub use inference::{CompletionRequest, InferenceBackend, InferenceError};
pub use retry::RetryingInference;
pub use roles::{
    default_profiles, parse_assistance_need, AgentProfile, AssistanceNeed, ASSISTANCE_MARKER,
};
pub use runtime::{AgentHandle, AgentRuntime, TERMINATED_REASON};
