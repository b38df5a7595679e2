//! JSON extraction and intent validation for LLM output.
//!
//! Models return markdown fences, prose wrappers, and trailing commas often
//! enough that extraction has to be layered: find the first balanced JSON
//! object, try to parse it, repair the common malformations, and give up
//! gracefully to an `unknown` intent rather than erroring.

use super::types::Intent;
use crate::actions::{normalize_action, Action};
use crate::normalize::value_as_i64;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Extract the first JSON object from raw model output, repairing common
/// malformations. Returns `None` when nothing parseable remains.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let cleaned = strip_fences(raw);
    let candidate = first_balanced_object(cleaned)?;

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return value.is_object().then_some(value);
    }

    let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
    serde_json::from_str::<Value>(&repaired)
        .ok()
        .filter(Value::is_object)
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest).trim()
}

/// Slice out the first `{...}` with balanced braces, respecting strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate a raw intent object against the Action Registry and clamp its
/// fields. Anything unusable becomes an `unknown` intent with confidence 0.
pub fn intent_from_json(value: &Value) -> Intent {
    let Some(object) = value.as_object() else {
        return Intent::unknown();
    };

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .map(normalize_action)
        .unwrap_or(Action::Unknown);

    let confidence = if action == Action::Unknown {
        0.0
    } else {
        object
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    };

    Intent {
        action,
        target_label: object
            .get("target_label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty()),
        target_entity_id: object.get("target_entity_id").and_then(value_as_i64),
        target_time: object
            .get("target_time")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty()),
        parameters: object
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new),
        confidence,
        clarify: object.get("clarify").and_then(Value::as_bool).unwrap_or(false),
        clarify_options: object
            .get("clarify_options")
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        explanation: object
            .get("explanation")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
