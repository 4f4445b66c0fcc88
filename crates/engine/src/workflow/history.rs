//! History snapshot assembly.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::cache::WorkflowCache;
use crate::definition::WorkflowDefinition;

/// Build the snapshot appended to the history log after a completed run.
///
/// Each field holds the JSON encoding of its source result as a string;
/// `createAt` is an RFC 3339 timestamp with millisecond precision.
pub fn build_snapshot(definition: &WorkflowDefinition, cache: &WorkflowCache, created_at: DateTime<Utc>) -> Value {
    let mut snapshot = Map::new();
    snapshot.insert(
        "createAt".into(),
        Value::String(created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    for field in &definition.history.fields {
        let source = definition
            .step(field.step)
            .and_then(|step| cache.get(definition.kind, step.step))
            .map(|result| result.payload)
            .unwrap_or(Value::Null);
        let value = match field.pointer {
            Some(pointer) => source.pointer(pointer).cloned().unwrap_or(Value::Null),
            None => source,
        };
        snapshot.insert(field.name.to_string(), Value::String(encode(&value)));
    }
    snapshot.into()
}

fn encode(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Decode one field of a listed history entry back into JSON.
pub fn decode_field(entry: &Value, name: &str) -> Option<Value> {
    match entry.get(name)? {
        Value::String(raw) => serde_json::from_str(raw).ok().or_else(|| Some(Value::String(raw.clone()))),
        other => Some(other.clone()),
    }
}
