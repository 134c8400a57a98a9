//! Inference service backends.
//!
//! To add a provider, create a module here and implement
//! [`InferenceBackend`](crate::InferenceBackend) for it.

/// Ollama `/api/chat` backend.
pub mod ollama;

pub use ollama::OllamaBackend;
