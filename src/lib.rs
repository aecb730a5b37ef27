//! Core library for the alert advisor. This module wires together the
//! configuration, the resilient completion client and the HTTP handlers.
//!
//! A trigger request walks one linear pipeline: configuration check, body
//! parse, schema validation, prompt rendering, completion call with retries,
//! response extraction. Any stage may fail with an [`AdvisorError`], which is
//! converted into the JSON error contract at the handler boundary.

mod config;
pub mod completion;
pub mod error;
pub mod metrics;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use config::AppConfig;

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody},
    DefaultBodyLimit, State,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::completion::azure::AzureSettings;
use crate::completion::{AzureOpenAiClient, ChatCompletion, ResilientCompletionClient};
use crate::error::{AdvisorError, ErrorResponse};
use crate::metrics::{ExternalGauges, Metrics};
use crate::retry::RetryPolicy;

/// Route that receives monitoring alerts.
pub const TRIGGER_PATH: &str = "/api/agentTrigger";

/// Body limit axum applies when `ADVISOR_MAX_REQUEST_BYTES` is unset.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 2 * 1024 * 1024;

/// Successful trigger response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResponse {
    pub recommendation: String,
    pub deployment: String,
}

/// Shared state handed to every handler. Configuration is immutable after
/// startup; counters are atomics.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub completion: ResilientCompletionClient,
    pub metrics: Arc<Metrics>,
    pub started_at: DateTime<Utc>,
    pub started_instant: Instant,
}

impl AppState {
    /// Build state around an arbitrary completion backend. The retry time
    /// unit comes from `config.retry_unit_ms`.
    pub fn new(config: AppConfig, backend: Arc<dyn ChatCompletion>) -> Self {
        let policy = RetryPolicy::with_unit(Duration::from_millis(config.retry_unit_ms));
        Self {
            config: Arc::new(config),
            completion: ResilientCompletionClient::new(backend, policy),
            metrics: Arc::new(Metrics::default()),
            started_at: Utc::now(),
            started_instant: Instant::now(),
        }
    }
}

/// Build state from environment variables, backed by Azure OpenAI. See
/// [`AppConfig::from_env`] for the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    if config.deployment().is_none() {
        tracing::warn!("AZURE_OPENAI_DEPLOYMENT not set; trigger requests will fail with 500");
    }
    if config.endpoint.is_empty() {
        tracing::warn!("AZURE_OPENAI_ENDPOINT not set; completion calls will fail upstream");
    }
    tracing::info!(
        api_version = %config.api_version,
        deployment = config.deployment().unwrap_or("-"),
        api_key_configured = config.api_key.is_some(),
        timeout_ms = ?config.upstream_timeout_ms,
        "advisor configured"
    );

    let backend = AzureOpenAiClient::new(AzureSettings::from_config(&config))?;
    Ok(AppState::new(config, Arc::new(backend)))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route(TRIGGER_PATH, post(trigger_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    let metrics = state.metrics.clone();
    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(
                    move |payload: Box<dyn Any + Send + 'static>| -> Response {
                        handle_panic(&metrics, payload)
                    },
                )),
        )
        .with_state(state)
}

fn handle_panic(metrics: &Metrics, payload: Box<dyn Any + Send + 'static>) -> Response {
    metrics.record_panic();
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = %detail, "handler panicked");
    let body = ErrorResponse {
        error: "Internal Server Error".to_string(),
        details: None,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn trigger_handler(
    State(state): State<AppState>,
    payload: Result<Bytes, BytesRejection>,
) -> Response {
    let started = Instant::now();
    let outcome = advise(&state, payload).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(body) => {
            state.metrics.record_success(latency_ms);
            tracing::info!(
                status = 200,
                latency_ms,
                deployment = %body.deployment,
                "recommendation returned"
            );
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            state.metrics.record_failure(&err, latency_ms);
            log_failure(&err, latency_ms);
            err.into_response()
        }
    }
}

fn log_failure(err: &AdvisorError, latency_ms: u64) {
    let status = err.status().as_u16();
    match err {
        AdvisorError::Upstream(inner) => {
            tracing::error!(status, latency_ms, error = %inner, "completion failed after retries")
        }
        AdvisorError::Internal(detail) => {
            tracing::error!(status, latency_ms, error = %detail, "internal error")
        }
        AdvisorError::Configuration => {
            tracing::error!(status, latency_ms, "deployment name is not configured")
        }
        AdvisorError::InvalidPayload(inner) => {
            tracing::warn!(status, latency_ms, error = %inner, "alert rejected")
        }
        other => tracing::warn!(status, latency_ms, kind = other.kind(), "request rejected"),
    }
}

/// Run one trigger request through the pipeline.
async fn advise(
    state: &AppState,
    payload: Result<Bytes, BytesRejection>,
) -> Result<RecommendationResponse, AdvisorError> {
    let deployment = state.config.deployment().ok_or(AdvisorError::Configuration)?;

    let body = payload.map_err(|rejection| handle_bytes_rejection(state, rejection))?;
    let value = parse_body(&body)?;
    tracing::debug!(bytes = body.len(), "body parsed");

    let alert = schema::validate(value).map_err(AdvisorError::InvalidPayload)?;
    let prompt = prompt::build_prompt(&alert);
    tracing::debug!(prompt_chars = prompt.chars().count(), "prompt built");

    let response = state
        .completion
        .complete(
            deployment,
            &prompt,
            state.config.temperature,
            state.config.max_tokens,
        )
        .await?;

    Ok(RecommendationResponse {
        recommendation: response.into_text(),
        deployment: deployment.to_string(),
    })
}

fn handle_bytes_rejection(state: &AppState, rejection: BytesRejection) -> AdvisorError {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            let limit = state
                .config
                .max_request_bytes
                .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
            tracing::warn!(limit, "request body exceeded limit");
            AdvisorError::PayloadTooLarge { limit }
        }
        other => {
            tracing::warn!(error = %other, "failed to read request body");
            AdvisorError::MalformedBody
        }
    }
}

/// Empty bodies, invalid JSON and a bare `null` are all unparsable.
fn parse_body(body: &[u8]) -> Result<Value, AdvisorError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AdvisorError::MalformedBody);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => Err(AdvisorError::MalformedBody),
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::debug!(error = %err, "body is not valid JSON");
            Err(AdvisorError::MalformedBody)
        }
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "apiVersion": state.config.api_version,
        "deploymentConfigured": state.config.deployment().is_some(),
        "startedAt": state.started_at.to_rfc3339(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let gauges = ExternalGauges {
        upstream_attempts_total: state.completion.attempts_total(),
        process_start_epoch: state.started_at.timestamp_millis() as f64 / 1000.0,
        uptime_secs: state.started_instant.elapsed().as_secs_f64(),
    };
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(&gauges),
    )
        .into_response()
}
