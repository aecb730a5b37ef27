//! Inbound alert payload and its validation.
//!
//! Every field is optional. A payload that is structurally minimal (`{}`) or
//! only partially populated validates and comes back fully defaulted; an
//! explicit `null` behaves exactly like an absent field. Only fields whose
//! JSON type contradicts the schema are reported, and all of them are
//! reported at once.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct Alert {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Data,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default, deserialize_with = "null_as_default")]
    pub essentials: Essentials,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alert_context: AlertContext,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Essentials {
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alert_rule: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub monitor_condition: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_generated: String,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AlertContext {
    #[serde(default, deserialize_with = "null_as_default")]
    pub condition: Condition,
    /// Metric reading as sent by the monitor; any JSON value.
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub metric_name: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One rejected field. `loc` is the path from the payload root.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("alert payload failed validation ({} field error(s))", .errors.len())]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

/// Expected JSON shape of a schema node. `null` is accepted everywhere.
enum Shape {
    Model(&'static [(&'static str, Shape)]),
    Text,
    Dict,
    Any,
}

const CONDITION: &[(&str, Shape)] = &[("metricName", Shape::Text)];

const ALERT_CONTEXT: &[(&str, Shape)] = &[
    ("condition", Shape::Model(CONDITION)),
    ("value", Shape::Any),
    ("context", Shape::Dict),
];

const ESSENTIALS: &[(&str, Shape)] = &[
    ("resourceName", Shape::Text),
    ("alertRule", Shape::Text),
    ("monitorCondition", Shape::Text),
    ("timeGenerated", Shape::Text),
];

const DATA: &[(&str, Shape)] = &[
    ("essentials", Shape::Model(ESSENTIALS)),
    ("alertContext", Shape::Model(ALERT_CONTEXT)),
];

const ALERT: Shape = Shape::Model(&[("data", Shape::Model(DATA))]);

/// Validate a parsed request body and build the defaulted [`Alert`].
pub fn validate(value: Value) -> Result<Alert, ValidationError> {
    let mut errors = Vec::new();
    let mut path = Vec::new();
    if value.is_null() {
        errors.push(model_error(&path));
    } else {
        check(&value, &ALERT, &mut path, &mut errors);
    }
    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }
    serde_json::from_value(value).map_err(|err| ValidationError {
        errors: vec![FieldError {
            loc: Vec::new(),
            msg: err.to_string(),
            kind: "value_error".into(),
        }],
    })
}

fn check(
    value: &Value,
    shape: &Shape,
    path: &mut Vec<&'static str>,
    errors: &mut Vec<FieldError>,
) {
    if value.is_null() {
        return;
    }
    match shape {
        Shape::Any => {}
        Shape::Text => {
            if !value.is_string() {
                errors.push(field_error(
                    path,
                    "Input should be a valid string",
                    "string_type",
                ));
            }
        }
        Shape::Dict => {
            if !value.is_object() {
                errors.push(field_error(
                    path,
                    "Input should be a valid dictionary",
                    "dict_type",
                ));
            }
        }
        Shape::Model(fields) => {
            let Some(obj) = value.as_object() else {
                errors.push(model_error(path));
                return;
            };
            for &(name, ref child) in fields.iter() {
                if let Some(v) = obj.get(name) {
                    path.push(name);
                    check(v, child, path, errors);
                    path.pop();
                }
            }
        }
    }
}

fn model_error(path: &[&str]) -> FieldError {
    field_error(
        path,
        "Input should be a valid dictionary or object",
        "model_type",
    )
}

fn field_error(path: &[&str], msg: &str, kind: &str) -> FieldError {
    FieldError {
        loc: path.iter().map(|s| s.to_string()).collect(),
        msg: msg.to_string(),
        kind: kind.to_string(),
    }
}
