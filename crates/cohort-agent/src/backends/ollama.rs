use crate::config::ModelProfile;
use crate::inference::{CompletionRequest, InferenceBackend, InferenceError};
use async_trait::async_trait;
use tracing::debug;

/// Backend for an Ollama model host (`POST /api/chat`, non-streaming).
pub struct OllamaBackend {
    http: reqwest::Client,
}

impl OllamaBackend {
    /// A backend with a default HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// A backend sharing an existing HTTP client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build_body(request: &CompletionRequest, model: &ModelProfile) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        serde_json::json!({
            "model": model.model_id,
            "stream": false,
            "messages": messages,
            "options": {
                "temperature": model.temperature,
                "num_predict": model.max_tokens,
            },
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn complete(
        &self,
        request: &CompletionRequest,
        model: &ModelProfile,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/api/chat", model.base_url.trim_end_matches('/'));
        let body = Self::build_body(request, model);

        let resp = self
            .http
            .post(&url)
            .timeout(model.request_timeout())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 404 {
            // 404 is what Ollama returns while a model is not pulled yet.
            let text = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Unavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(InferenceError::InvalidResponse(format!("{status}: {text}")));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        parse_chat_response(&resp_body)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

fn map_transport_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Unavailable(err.to_string())
    }
}

/// Extract the assistant text from an `/api/chat` response body.
fn parse_chat_response(body: &serde_json::Value) -> Result<String, InferenceError> {
    if let Some(error) = body["error"].as_str() {
        return Err(InferenceError::Unavailable(error.to_string()));
    }
    let content = body["message"]["content"]
        .as_str()
        .ok_or_else(|| InferenceError::InvalidResponse("missing message.content".into()))?;
    if content.trim().is_empty() {
        return Err(InferenceError::InvalidResponse("empty completion".into()));
    }
    debug!(
        chars = content.len(),
        eval_count = body["eval_count"].as_u64().unwrap_or(0),
        "Completion received"
    );
    Ok(content.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile(server: &MockServer) -> ModelProfile {
        ModelProfile {
            base_url: server.uri(),
            request_timeout_ms: 500,
            ..ModelProfile::new("llama3")
        }
    }

    #[test]
    fn test_body_shape() {
        let req = CompletionRequest::new("hi").with_system("be brief");
        let body = OllamaBackend::build_body(&req, &ModelProfile::new("m"));
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["options"]["num_predict"], 4096);
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({ "model": "llama3", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": { "role": "assistant", "content": "fn main() {}" },
                "done": true,
                "eval_count": 7
            })))
            .mount(&server)
            .await;

        let out = OllamaBackend::new()
            .complete(&CompletionRequest::new("write main"), &profile(&server))
            .await
            .unwrap();
        assert_eq!(out, "fn main() {}");
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .mount(&server)
            .await;

        let err = OllamaBackend::new()
            .complete(&CompletionRequest::new("x"), &profile(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "done": true })))
            .mount(&server)
            .await;

        let err = OllamaBackend::new()
            .complete(&CompletionRequest::new("x"), &profile(&server))
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_slow_host_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_secs(2))
                    .set_body_json(serde_json::json!({ "message": { "content": "late" } })),
            )
            .mount(&server)
            .await;

        let err = OllamaBackend::new()
            .complete(&CompletionRequest::new("x"), &profile(&server))
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let model = ModelProfile {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_ms: 500,
            ..ModelProfile::new("llama3")
        };
        let err = OllamaBackend::new()
            .complete(&CompletionRequest::new("x"), &model)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
