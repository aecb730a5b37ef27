use std::env;

use anyhow::{anyhow, Result};

/// API version sent to Azure OpenAI when `AZURE_OPENAI_API_VERSION` is unset.
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 800;
pub const DEFAULT_RETRY_UNIT_MS: u64 = 1000;

/// Process-wide settings. Loaded once at startup and shared read-only by every
/// request through `AppState`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub api_version: String,
    /// Deployment to invoke. `None` makes every trigger request answer with a
    /// configuration error instead of calling upstream.
    pub deployment: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_request_bytes: Option<usize>,
    /// Per-attempt bound on the upstream call. Unset means the transport
    /// default (no timeout).
    pub upstream_timeout_ms: Option<u64>,
    /// Length of one backoff time unit in milliseconds.
    pub retry_unit_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployment: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_request_bytes: None,
            upstream_timeout_ms: None,
            retry_unit_ms: DEFAULT_RETRY_UNIT_MS,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = parse_optional_string("AZURE_OPENAI_KEY");
        let endpoint = parse_optional_string("AZURE_OPENAI_ENDPOINT").unwrap_or_default();
        let api_version = parse_optional_string("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
        let deployment = parse_optional_string("AZURE_OPENAI_DEPLOYMENT");

        let temperature = parse_optional_f32("OPENAI_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(anyhow!("OPENAI_TEMPERATURE must be between 0 and 2"));
        }
        let max_tokens = match parse_optional_u64("OPENAI_MAX_TOKENS")? {
            Some(0) => return Err(anyhow!("OPENAI_MAX_TOKENS must be greater than zero")),
            Some(n) => u32::try_from(n).map_err(|_| anyhow!("OPENAI_MAX_TOKENS is too large"))?,
            None => DEFAULT_MAX_TOKENS,
        };

        let max_request_bytes =
            parse_optional_u64("ADVISOR_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let upstream_timeout_ms =
            parse_optional_u64("ADVISOR_UPSTREAM_TIMEOUT_MS")?.filter(|ms| *ms > 0);
        let retry_unit_ms =
            parse_optional_u64("ADVISOR_RETRY_UNIT_MS")?.unwrap_or(DEFAULT_RETRY_UNIT_MS);

        Ok(Self {
            api_key,
            endpoint,
            api_version,
            deployment,
            temperature,
            max_tokens,
            max_request_bytes,
            upstream_timeout_ms,
            retry_unit_ms,
        })
    }

    /// The configured deployment, treating a blank value as absent.
    pub fn deployment(&self) -> Option<&str> {
        self.deployment
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_f32(var: &str) -> Result<Option<f32>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a number", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
