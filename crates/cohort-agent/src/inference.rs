use crate::config::ModelProfile;
use async_trait::async_trait;
use cohort_core::CohortError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single text-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Role instructions, if any.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// The user prompt.
    pub prompt: String,
}

impl CompletionRequest {
    /// A request without a system prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            prompt: prompt.into(),
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Failure modes of the inference service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    /// The call exceeded its deadline.
    #[error("inference call timed out")]
    Timeout,

    /// The service could not be reached or is overloaded.
    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    /// The service answered, but not with usable text.
    #[error("invalid inference response: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// Transient failures are retried; a malformed answer is not expected to
    /// improve on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Timeout | InferenceError::Unavailable(_))
    }
}

impl From<InferenceError> for CohortError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout => CohortError::InferenceTimeout(err.to_string()),
            other => CohortError::Inference(other.to_string()),
        }
    }
}

/// Black-box text-completion service.
///
/// Implementations perform exactly one call; timeouts, retries and
/// cancellation are layered on top by [`crate::RetryingInference`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one completion of `request` against `model`.
    async fn complete(
        &self,
        request: &CompletionRequest,
        model: &ModelProfile,
    ) -> Result<String, InferenceError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "inference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(InferenceError::Timeout.is_retryable());
        assert!(InferenceError::Unavailable("503".into()).is_retryable());
        assert!(!InferenceError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_conversion_into_cohort_error() {
        let err: CohortError = InferenceError::Timeout.into();
        assert!(matches!(err, CohortError::InferenceTimeout(_)));
        let err: CohortError = InferenceError::Unavailable("down".into()).into();
        assert!(matches!(err, CohortError::Inference(_)));
    }
}
