#[path = "common/mod.rs"]
mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alert_advisor::{app, build_state_from_env, TRIGGER_PATH};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::{chat_reply, EnvGuard};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Clone, Copy)]
enum Failure {
    Status,
    Garbage,
    Slow,
}

/// What the mock saw for one call.
#[derive(Debug, Clone)]
struct Seen {
    deployment: String,
    api_version: Option<String>,
    api_key: Option<String>,
    body: Value,
}

struct MockAzure {
    fail_first: usize,
    failure: Failure,
    hits: AtomicUsize,
    seen: std::sync::Mutex<Vec<Seen>>,
}

impl MockAzure {
    fn new(fail_first: usize, failure: Failure) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            failure,
            hits: AtomicUsize::new(0),
            seen: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn completions(
    State(mock): State<Arc<MockAzure>>,
    Path(deployment): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let hit = mock.hits.fetch_add(1, Ordering::SeqCst) + 1;
    mock.seen.lock().unwrap().push(Seen {
        deployment,
        api_version: query.get("api-version").cloned(),
        api_key: headers
            .get("api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    if hit <= mock.fail_first {
        return match mock.failure {
            Failure::Status => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": {"code": "InternalServerError", "message": "The server had an error while processing your request."}})),
            )
                .into_response(),
            Failure::Garbage => (StatusCode::OK, "<html>gateway</html>").into_response(),
            Failure::Slow => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(chat_reply("too late")).into_response()
            }
        };
    }
    Json(chat_reply("Root cause: CPU saturation.\nRemediation: ...")).into_response()
}

async fn start_mock_azure(mock: Arc<MockAzure>) -> (String, JoinHandle<()>) {
    let router = Router::new()
        .route(
            "/openai/deployments/:deployment/chat/completions",
            post(completions),
        )
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

async fn spawn_app() -> (String, JoinHandle<()>) {
    let state = build_state_from_env().await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

fn configure(env: &mut EnvGuard, endpoint: &str) {
    env.set_many(&[
        ("AZURE_OPENAI_ENDPOINT", endpoint),
        ("AZURE_OPENAI_KEY", "test-key"),
        ("AZURE_OPENAI_DEPLOYMENT", "gpt-4.1"),
        ("AZURE_OPENAI_API_VERSION", "2024-12-01-preview"),
        ("ADVISOR_RETRY_UNIT_MS", "1"),
    ]);
    env.remove("ADVISOR_UPSTREAM_TIMEOUT_MS");
    env.remove("ADVISOR_MAX_REQUEST_BYTES");
    env.remove("OPENAI_TEMPERATURE");
    env.remove("OPENAI_MAX_TOKENS");
}

fn alert() -> Value {
    json!({
        "data": {
            "essentials": {"resourceName": "vm-01", "alertRule": "HighCPU", "monitorCondition": "Fired"},
            "alertContext": {"condition": {"metricName": "cpu_percent"}, "value": 95}
        }
    })
}

#[tokio::test]
async fn sends_azure_request_shape() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(0, Failure::Status);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    // trailing slash must not double up in the path
    configure(&mut env, &format!("{}/", endpoint));
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["recommendation"],
        "Root cause: CPU saturation.\nRemediation: ..."
    );
    assert_eq!(body["deployment"], "gpt-4.1");

    assert_eq!(mock.hits(), 1);
    let seen = mock.seen.lock().unwrap()[0].clone();
    assert_eq!(seen.deployment, "gpt-4.1");
    assert_eq!(seen.api_version.as_deref(), Some("2024-12-01-preview"));
    assert_eq!(seen.api_key.as_deref(), Some("test-key"));
    assert_eq!(seen.body["temperature"], 0.0);
    assert_eq!(seen.body["max_tokens"], 800);
    let messages = seen.body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    let prompt = messages[1]["content"].as_str().unwrap();
    assert!(prompt.contains("Resource: vm-01"));
    assert!(prompt.contains("Metric: cpu_percent"));
}

#[tokio::test]
async fn two_upstream_errors_then_success() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(2, Failure::Status);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    configure(&mut env, &endpoint);
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn persistent_upstream_errors_become_bad_gateway() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(usize::MAX, Failure::Status);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    configure(&mut env, &endpoint);
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "OpenAI API error");
    assert_eq!(
        body["details"],
        "completion endpoint returned HTTP 500: The server had an error while processing your request. (InternalServerError)"
    );
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn undecodable_success_body_is_retried() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(usize::MAX, Failure::Garbage);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    configure(&mut env, &endpoint);
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert!(body["details"]
        .as_str()
        .unwrap()
        .starts_with("completion endpoint returned an unreadable body"));
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn attempt_timeout_is_retried_like_any_upstream_failure() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(1, Failure::Slow);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    configure(&mut env, &endpoint);
    env.set("ADVISOR_UPSTREAM_TIMEOUT_MS", "100");
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(mock.hits(), 2);
}

#[tokio::test]
async fn unreachable_endpoint_is_an_upstream_error() {
    let _lock = ENV_MUTEX.lock().await;
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let mut env = EnvGuard::new();
    configure(&mut env, &dead);
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "OpenAI API error");
    assert!(body["details"]
        .as_str()
        .unwrap()
        .starts_with("request to completion endpoint failed"));
}

#[tokio::test]
async fn deployment_with_reserved_characters_reaches_its_route() {
    let _lock = ENV_MUTEX.lock().await;
    let mock = MockAzure::new(0, Failure::Status);
    let (endpoint, _mock_handle) = start_mock_azure(mock.clone()).await;
    let mut env = EnvGuard::new();
    configure(&mut env, &endpoint);
    env.set("AZURE_OPENAI_DEPLOYMENT", "ops/gpt 4.1?");
    let (base, _handle) = spawn_app().await;

    let resp = Client::new()
        .post(format!("{}{}", base, TRIGGER_PATH))
        .json(&alert())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deployment"], "ops/gpt 4.1?");
    assert_eq!(mock.hits(), 1);
    let seen = mock.seen.lock().unwrap()[0].clone();
    assert_eq!(seen.deployment, "ops/gpt 4.1?");
    assert_eq!(seen.api_version.as_deref(), Some("2024-12-01-preview"));
}
