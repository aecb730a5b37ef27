//! Renders a validated alert into the instruction sent to the model.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::Alert;

const UNKNOWN: &str = "unknown";

/// System message preceding every rendered prompt.
pub const SYSTEM_PROMPT: &str = "You are an infrastructure AI agent. You diagnose monitoring \
alerts for cloud resources and propose safe, concrete remediation.";

/// Log excerpt embedded in the prompt. Field order is the serialization order.
#[derive(Serialize)]
struct Logs<'a> {
    #[serde(rename = "alertRule")]
    alert_rule: &'a str,
    #[serde(rename = "monitorCondition")]
    monitor_condition: &'a str,
    raw_context: &'a Map<String, Value>,
}

/// Build the user prompt for `alert`. Pure: the same alert always renders to
/// the same bytes.
pub fn build_prompt(alert: &Alert) -> String {
    let essentials = &alert.data.essentials;
    let alert_context = &alert.data.alert_context;

    let resource = non_empty(essentials.resource_name.as_deref()).unwrap_or(UNKNOWN);
    let metric = non_empty(alert_context.condition.metric_name.as_deref()).unwrap_or(UNKNOWN);
    let time_generated = non_empty(Some(essentials.time_generated.as_str())).unwrap_or(UNKNOWN);
    let value = render_value(&alert_context.value);

    let logs = Logs {
        alert_rule: &essentials.alert_rule,
        monitor_condition: &essentials.monitor_condition,
        raw_context: &alert_context.context,
    };
    let logs_json = serde_json::to_string(&logs).unwrap_or_else(|_| "{}".to_string());

    format!(
        "You are an infrastructure AI agent. Analyze the following monitoring alert and logs.\n\
         Resource: {resource}\n\
         Time generated: {time_generated}\n\
         Metric: {metric}\n\
         Value: {value}\n\
         Logs: {logs_json}\n\
         \n\
         Respond with:\n\
         1. Root cause: a concise explanation in 1-2 sentences.\n\
         2. Remediation: 3-6 prioritized steps, most urgent first.\n\
         3. Follow-up: checks that confirm the fix and prevent recurrence.\n"
    )
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => UNKNOWN.to_string(),
        Value::String(s) if s.trim().is_empty() => UNKNOWN.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
