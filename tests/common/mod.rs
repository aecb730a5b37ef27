use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alert_advisor::completion::{ChatCompletion, CompletionRequest};
use alert_advisor::error::{CompletionError, UpstreamError};
use alert_advisor::AppConfig;
use serde_json::{json, Value};

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

#[allow(dead_code)]
pub const DEPLOYMENT: &str = "gpt-4.1-advisor";

/// Config with a deployment and a 1ms backoff unit.
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        deployment: Some(DEPLOYMENT.to_string()),
        retry_unit_ms: 1,
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub fn chat_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "finish_reason": "stop", "message": {"role": "assistant", "content": content}}
        ]
    })
}

/// Answers 503 for the first `failures` calls, then `reply`. Records every
/// request it sees.
#[allow(dead_code)]
pub struct ScriptedBackend {
    failures: usize,
    reply: Value,
    calls: AtomicUsize,
    seen: Mutex<Vec<CompletionRequest>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new(failures: usize, reply: Value) -> Self {
        Self {
            failures,
            reply,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(content: &str) -> Self {
        Self::new(0, chat_reply(content))
    }

    pub fn always_failing() -> Self {
        Self::new(usize::MAX, Value::Null)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl ChatCompletion for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, CompletionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().unwrap().push(request.clone());
        if call <= self.failures {
            return Err(UpstreamError::Status {
                status: 503,
                message: format!("service unavailable (call {call})"),
            }
            .into());
        }
        Ok(self.reply.clone())
    }
}

/// Panics on every call.
#[allow(dead_code)]
pub struct PanickingBackend;

#[async_trait::async_trait]
impl ChatCompletion for PanickingBackend {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Value, CompletionError> {
        panic!("backend exploded with secret detail");
    }
}
