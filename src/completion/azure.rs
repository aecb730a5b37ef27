use std::time::Duration;

use serde_json::Value;

use super::models::{ApiErrorEnvelope, ChatCompletionRequest, ChatMessage};
use super::{ChatCompletion, CompletionRequest};
use crate::error::{CompletionError, UpstreamError};
use crate::prompt::SYSTEM_PROMPT;
use crate::AppConfig;

/// Longest upstream error body echoed back to callers.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Connection settings for an Azure OpenAI resource.
#[derive(Clone, Debug, Default)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
    pub timeout: Option<Duration>,
}

impl AzureSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            timeout: config.upstream_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// AzureOpenAiClient POSTs the rendered prompt to
/// `{endpoint}/openai/deployments/{deployment}/chat/completions` and returns
/// the decoded JSON body.
pub struct AzureOpenAiClient {
    settings: AzureSettings,
    client: reqwest::Client,
}

impl AzureOpenAiClient {
    pub fn new(settings: AzureSettings) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { settings, client })
    }

    /// `{endpoint}/openai/deployments/{deployment}/chat/completions`, with the
    /// deployment percent-encoded as a single path segment.
    fn url(&self, deployment: &str) -> Result<reqwest::Url, UpstreamError> {
        let mut url = reqwest::Url::parse(&self.settings.endpoint).map_err(|err| {
            UpstreamError::Transport(format!(
                "invalid endpoint {:?}: {}",
                self.settings.endpoint, err
            ))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                UpstreamError::Transport(format!(
                    "endpoint {:?} cannot carry a path",
                    self.settings.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(["openai", "deployments", deployment, "chat", "completions"]);
        Ok(url)
    }

    fn render_body(&self, req: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(req.prompt.clone()),
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        }
    }
}

/// Prefer the provider's `error.message`; otherwise a truncated raw body.
fn error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        return match envelope.error.code {
            Some(code) => format!("{} ({})", envelope.error.message, code),
            None => envelope.error.message,
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        out.push('…');
    }
    out
}

#[async_trait::async_trait]
impl ChatCompletion for AzureOpenAiClient {
    fn name(&self) -> &str {
        "azure_openai"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<Value, CompletionError> {
        let body = self.render_body(req);
        let url = self.url(&req.deployment).map_err(|err| {
            tracing::warn!(deployment = %req.deployment, error = %err, "completion url rejected");
            CompletionError::from(err)
        })?;
        let mut rb = self
            .client
            .post(url)
            .query(&[("api-version", self.settings.api_version.as_str())]);
        if let Some(key) = &self.settings.api_key {
            rb = rb.header("api-key", key);
        }
        let resp = match rb.json(&body).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(deployment = %req.deployment, error = %err, "completion network error");
                return Err(UpstreamError::Transport(err.to_string()).into());
            }
        };
        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(status = status.as_u16(), error = %err, "completion read error");
                return Err(UpstreamError::Transport(err.to_string()).into());
            }
        };
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "completion endpoint rejected request");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            }
            .into());
        }
        serde_json::from_str(&text).map_err(|err| {
            tracing::warn!(status = status.as_u16(), error = %err, "completion parse error");
            CompletionError::from(UpstreamError::Decode(err.to_string()))
        })
    }
}
