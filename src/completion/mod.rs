//! Resilient chat-completion client.
//!
//! A [`ChatCompletion`] backend performs one remote call. The
//! [`ResilientCompletionClient`] wraps a backend with the retry policy,
//! rejects malformed local arguments before any call, and classifies the raw
//! response into a [`CompletionResponse`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::CompletionError;
use crate::retry::RetryPolicy;

pub mod azure;
mod models;

pub use self::azure::AzureOpenAiClient;
pub use self::models::{ChatCompletionRequest, ChatMessage, Role};

/// Arguments of one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub deployment: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One attempt against a chat-completion provider. Implementations report
/// every remote failure as [`CompletionError::Upstream`] so the caller can
/// retry it.
#[async_trait::async_trait]
pub trait ChatCompletion: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CompletionError>;
}

/// Shapes a completion response can take, in order of preference.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionResponse {
    /// First choice carries `message.content`.
    MessageContent(String),
    /// First choice carries a plain `text` field (legacy completions).
    PlainText(String),
    /// First choice exists but has neither.
    UnrecognizedChoice(Value),
    /// `choices` is missing, not a list, or empty.
    NoChoices(Value),
}

impl CompletionResponse {
    pub fn from_value(raw: Value) -> Self {
        let first = raw
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());
        let Some(choice) = first else {
            return CompletionResponse::NoChoices(raw);
        };
        if let Some(content) = choice.pointer("/message/content").and_then(Value::as_str) {
            return CompletionResponse::MessageContent(content.to_string());
        }
        if let Some(text) = choice.get("text").and_then(Value::as_str) {
            return CompletionResponse::PlainText(text.to_string());
        }
        CompletionResponse::UnrecognizedChoice(choice.clone())
    }

    /// Text returned to the caller.
    pub fn into_text(self) -> String {
        match self {
            CompletionResponse::MessageContent(content) => content.trim().to_string(),
            CompletionResponse::PlainText(text) => text,
            CompletionResponse::UnrecognizedChoice(choice) => choice.to_string(),
            CompletionResponse::NoChoices(raw) => raw.to_string(),
        }
    }
}

/// Completion backend wrapped in the retry policy. Cheap to clone; clones
/// share the backend and the attempt counter.
#[derive(Clone)]
pub struct ResilientCompletionClient {
    backend: Arc<dyn ChatCompletion>,
    policy: RetryPolicy,
    attempts_total: Arc<AtomicU64>,
}

impl ResilientCompletionClient {
    pub fn new(backend: Arc<dyn ChatCompletion>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            attempts_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Remote calls made so far, retries included.
    pub fn attempts_total(&self) -> u64 {
        self.attempts_total.load(Ordering::Relaxed)
    }

    pub async fn complete(
        &self,
        deployment: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<CompletionResponse, CompletionError> {
        if deployment.trim().is_empty() {
            return Err(CompletionError::InvalidRequest(
                "deployment identifier is empty".into(),
            ));
        }
        if !temperature.is_finite() || max_tokens == 0 {
            return Err(CompletionError::InvalidRequest(format!(
                "temperature={temperature} max_tokens={max_tokens}"
            )));
        }
        let request = CompletionRequest {
            deployment: deployment.to_string(),
            prompt: prompt.to_string(),
            temperature,
            max_tokens,
        };
        let backend = &self.backend;
        let attempts_total = &self.attempts_total;
        let request = &request;
        let raw = self
            .policy
            .run(CompletionError::is_retryable, move |attempt| {
                attempts_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    backend = backend.name(),
                    deployment = %request.deployment,
                    attempt,
                    "calling completion backend"
                );
                backend.complete(request)
            })
            .await?;
        Ok(CompletionResponse::from_value(raw))
    }
}
