use crate::config::{ModelProfile, RetryPolicy};
use crate::inference::{CompletionRequest, InferenceBackend, InferenceError};
use cohort_core::{CohortError, CohortResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Wraps an [`InferenceBackend`] with a mandatory per-call deadline,
/// exponential-backoff retries of transient failures, and cancellation.
///
/// Every attempt races against the agent's cancellation token; a cancelled
/// call is dropped immediately and reported as [`CohortError::Cancelled`].
pub struct RetryingInference {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl RetryingInference {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn do_sleep(&self, delay: Duration) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(delay).await;
            return;
        }
        tokio::time::sleep(delay).await;
    }

    /// One attempt bounded by the model's request timeout.
    async fn attempt(
        &self,
        request: &CompletionRequest,
        model: &ModelProfile,
    ) -> Result<String, InferenceError> {
        match tokio::time::timeout(model.request_timeout(), self.backend.complete(request, model))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout),
        }
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
        model: &ModelProfile,
        cancel: &CancellationToken,
    ) -> CohortResult<String> {
        let mut last_err = InferenceError::Unavailable("no attempt made".into());

        for attempt in 0..=self.policy.max_retries {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CohortError::Cancelled("inference call dropped".into()));
                }
                r = self.attempt(request, model) => r,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if !e.is_retryable() => {
                    warn!(backend = self.backend.name(), attempt, error = %e, "Non-retryable inference error");
                    return Err(e.into());
                }
                Err(e) => {
                    if attempt < self.policy.max_retries {
                        let delay = self.policy.backoff(attempt);
                        info!(
                            backend = self.backend.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retryable inference error, backing off"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(CohortError::Cancelled("inference backoff interrupted".into()));
                            }
                            _ = self.do_sleep(delay) => {}
                        }
                    }
                    last_err = e;
                }
            }
        }

        warn!(
            backend = self.backend.name(),
            retries = self.policy.max_retries,
            error = %last_err,
            "Inference retries exhausted"
        );
        Err(last_err.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns scripted results in order, then repeats the last one.
    struct ScriptedBackend {
        results: parking_lot::Mutex<Vec<Result<String, InferenceError>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(results: Vec<Result<String, InferenceError>>) -> Arc<Self> {
            Arc::new(Self {
                results: parking_lot::Mutex::new(results),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn complete(
            &self,
            _request: &CompletionRequest,
            _model: &ModelProfile,
        ) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock();
            if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            }
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl InferenceBackend for HangingBackend {
        async fn complete(
            &self,
            _request: &CompletionRequest,
            _model: &ModelProfile,
        ) -> Result<String, InferenceError> {
            std::future::pending().await
        }
    }

    fn recorded_sleeps(inference: &mut RetryingInference) -> Arc<parking_lot::Mutex<Vec<Duration>>> {
        let sleeps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = sleeps.clone();
        inference.sleep_fn = Some(Box::new(
            move |d: Duration| -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
                recorder.lock().push(d);
                Box::pin(async {})
            },
        ));
        sleeps
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_then_succeeds() {
        let backend = ScriptedBackend::new(vec![
            Err(InferenceError::Unavailable("503".into())),
            Err(InferenceError::Timeout),
            Ok("done".into()),
        ]);
        let mut inference = RetryingInference::new(backend.clone(), policy(3));
        let sleeps = recorded_sleeps(&mut inference);

        let out = inference
            .complete(&CompletionRequest::new("x"), &ModelProfile::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "done");
        assert_eq!(backend.calls(), 3);
        assert_eq!(
            *sleeps.lock(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let backend = ScriptedBackend::new(vec![Err(InferenceError::Timeout)]);
        let mut inference = RetryingInference::new(backend.clone(), policy(2));
        recorded_sleeps(&mut inference);

        let err = inference
            .complete(&CompletionRequest::new("x"), &ModelProfile::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::InferenceTimeout(_)));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_response_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Err(InferenceError::InvalidResponse("empty".into()))]);
        let mut inference = RetryingInference::new(backend.clone(), policy(3));
        recorded_sleeps(&mut inference);

        let err = inference
            .complete(&CompletionRequest::new("x"), &ModelProfile::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::Inference(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_deadline_applies() {
        let inference = RetryingInference::new(Arc::new(HangingBackend), policy(0));
        let model = ModelProfile {
            request_timeout_ms: 1_000,
            ..ModelProfile::default()
        };
        let err = inference
            .complete(&CompletionRequest::new("x"), &model, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::InferenceTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_drops_pending_call() {
        let inference = RetryingInference::new(Arc::new(HangingBackend), policy(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = inference
            .complete(&CompletionRequest::new("x"), &ModelProfile::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CohortError::Cancelled(_)));
    }
}
