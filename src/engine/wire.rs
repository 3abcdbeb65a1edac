//! JSON-lines event codec for the detector's stdout.
//!
//! Each line is either `{"event": "<name>", "data": <payload>}` or plain text. Plain
//! text and anything that does not decode as a known event becomes a `detailedLog`.

use crate::model::{EngineEvent, EventKind};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct WireProgress {
    #[serde(default)]
    title: String,
    #[serde(default)]
    percent: Option<f64>,
}

/// Decode one output line. Returns `None` for blank lines.
pub(crate) fn parse_line(line: &str) -> Option<EngineEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('{') {
        return Some(EngineEvent::DetailedLog(trimmed.to_string()));
    }

    let wire: WireEvent = match serde_json::from_str(trimmed) {
        Ok(w) => w,
        Err(e) => {
            tracing::debug!(error = %e, "engine line is not an event object");
            return Some(EngineEvent::DetailedLog(trimmed.to_string()));
        }
    };

    let Some(kind) = EventKind::from_wire(&wire.event) else {
        tracing::debug!(event = %wire.event, "unknown engine event");
        return Some(EngineEvent::DetailedLog(format!(
            "unrecognised engine event: {trimmed}"
        )));
    };

    let event = match kind {
        EventKind::ProgressUpdate => {
            let p = match wire.data {
                Value::Null => WireProgress::default(),
                data => match serde_json::from_value::<WireProgress>(data) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed progress payload");
                        return Some(EngineEvent::DetailedLog(format!(
                            "malformed progress update: {trimmed}"
                        )));
                    }
                },
            };
            EngineEvent::ProgressUpdate {
                title: p.title,
                percent: p.percent,
            }
        }
        EventKind::DetailedLog => EngineEvent::DetailedLog(value_text(wire.data)),
        EventKind::ErrorUpdate => EngineEvent::ErrorUpdate(value_text(wire.data)),
        EventKind::ExecutionFinished => {
            let artifact = match wire.data {
                Value::String(s) if !s.is_empty() => Some(PathBuf::from(s)),
                _ => None,
            };
            EngineEvent::ExecutionFinished { artifact }
        }
    };
    Some(event)
}

/// Encode an event in the same shape `parse_line` accepts.
#[cfg(test)]
pub(crate) fn encode_event(ev: &EngineEvent) -> String {
    let data = match ev {
        EngineEvent::ProgressUpdate { title, percent } => {
            serde_json::json!({ "title": title, "percent": percent })
        }
        EngineEvent::DetailedLog(m) | EngineEvent::ErrorUpdate(m) => Value::String(m.clone()),
        EngineEvent::ExecutionFinished { artifact } => artifact
            .as_ref()
            .map(|p| Value::String(p.to_string_lossy().into_owned()))
            .unwrap_or(Value::Null),
    };
    serde_json::json!({ "event": ev.kind().as_str(), "data": data }).to_string()
}

fn value_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
