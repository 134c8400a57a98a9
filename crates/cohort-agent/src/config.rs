use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and sampling settings for the inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model name as the inference host knows it.
    pub model_id: String,
    /// Base URL of the inference host.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Deadline of a single inference call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl ModelProfile {
    /// A profile for `model_id` with default settings.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// [`request_timeout_ms`](Self::request_timeout_ms) as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::new("llama3")
    }
}

/// Retry behaviour for inference calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for `attempt` (0-based), capped at `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Timers and bounds of the agent runtime loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interval between heartbeats.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Wait for a `registration_ack` per attempt.
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
    /// Registration attempts before the agent gives up.
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
    /// Wait for an `assistance_response` before continuing without help.
    #[serde(default = "default_assistance_timeout_ms")]
    pub assistance_timeout_ms: u64,
    /// Size of the duplicate message-id window.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_registration_timeout_ms() -> u64 {
    5_000
}

fn default_registration_attempts() -> u32 {
    3
}

fn default_assistance_timeout_ms() -> u64 {
    60_000
}

fn default_dedup_window() -> usize {
    1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            registration_timeout_ms: default_registration_timeout_ms(),
            registration_attempts: default_registration_attempts(),
            assistance_timeout_ms: default_assistance_timeout_ms(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl RuntimeConfig {
    /// Interval between heartbeats.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Wait for a `registration_ack` per attempt.
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    /// Wait for an `assistance_response`.
    pub fn assistance_timeout(&self) -> Duration {
        Duration::from_millis(self.assistance_timeout_ms)
    }
}
