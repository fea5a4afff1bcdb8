//! Response interpreter — turns a raw model completion into a [`Score`].
//!
//! Models wrap their answer in all sorts of packaging: reasoning blocks,
//! markdown fences, chatty preambles. Extraction runs in a fixed order:
//!
//! 1. Reject empty / whitespace-only text.
//! 2. Drop everything up to the first `</think>` when a `<think>` pair exists.
//! 3. Unwrap a ```` ```json ```` fence, or failing that a bare ```` ``` ```` fence.
//! 4. Take the first `{...}` with at most one nested level of braces.
//! 5. Parse it as JSON and coerce the known keys.
//!
//! Pure: no I/O, no logging.

use serde_json::{Map, Value};

use crate::error::InterpretError;
use crate::pipeline::types::{Score, category};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// Deepest brace nesting accepted by the object scanner.
const MAX_OBJECT_DEPTH: usize = 2;

const DEFAULT_IMPORTANCE: f64 = 5.0;
const DEFAULT_SPAM: f64 = 0.0;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const DEFAULT_REASONING: &str = "No reasoning provided";

/// Interpret a raw completion.
pub fn interpret(raw: &str) -> Result<Score, InterpretError> {
    if raw.trim().is_empty() {
        return Err(InterpretError::Empty);
    }

    let text = strip_thinking(raw);
    let text = unfence(text);
    let candidate = find_json_object(text).ok_or(InterpretError::NoJson)?;

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| InterpretError::Json(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| InterpretError::Json("expected a JSON object".into()))?;

    score_from_object(object)
}

/// Drop a leading reasoning block. Needs both markers; cuts at the first close.
fn strip_thinking(text: &str) -> &str {
    if !text.contains(THINK_OPEN) {
        return text;
    }
    match text.find(THINK_CLOSE) {
        Some(close) => text[close + THINK_CLOSE.len()..].trim(),
        None => text,
    }
}

/// Unwrap a markdown code fence, if any.
///
/// A `json`-tagged fence ends at the next fence after it; an untagged fence
/// spans from the first fence to the last one in the text.
fn unfence(text: &str) -> &str {
    if let Some(open) = text.find(JSON_FENCE) {
        let body_start = open + JSON_FENCE.len();
        return match text[body_start..].find(FENCE) {
            Some(len) => text[body_start..body_start + len].trim(),
            None => text,
        };
    }

    if let Some(open) = text.find(FENCE) {
        let body_start = open + FENCE.len();
        if let Some(close) = text.rfind(FENCE) {
            if close >= body_start {
                return text[body_start..close].trim();
            }
        }
    }

    text
}

/// Find the first brace-balanced object of depth <= [`MAX_OBJECT_DEPTH`].
///
/// Each `{` is tried as a start in order. Braces inside string literals are
/// counted like any other, so `{"a": "}"}` yields `{"a": "}`.
fn find_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{')
        .find_map(|(start, _)| match_object_at(bytes, start).map(|end| &text[start..=end]))
}

/// Index of the brace closing the object opened at `start`, if it closes
/// without exceeding the depth bound.
fn match_object_at(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => {
                depth += 1;
                if depth > MAX_OBJECT_DEPTH {
                    return None;
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn score_from_object(object: &Map<String, Value>) -> Result<Score, InterpretError> {
    Ok(Score {
        importance_score: number_field(object, "importance_score", DEFAULT_IMPORTANCE)?,
        spam_score: number_field(object, "spam_score", DEFAULT_SPAM)?,
        category: text_field(object, "category", category::UNKNOWN),
        reasoning: text_field(object, "reasoning", DEFAULT_REASONING),
        confidence: number_field(object, "confidence", DEFAULT_CONFIDENCE)?,
    })
}

/// Absent → default. Numbers and numeric strings coerce; anything else fails
/// the whole response.
fn number_field(
    object: &Map<String, Value>,
    field: &'static str,
    default: f64,
) -> Result<f64, InterpretError> {
    let non_numeric = |value: &Value| InterpretError::NonNumeric {
        field,
        value: value.to_string(),
    };

    match object.get(field) {
        None => Ok(default),
        Some(value @ Value::Number(n)) => n.as_f64().ok_or_else(|| non_numeric(value)),
        Some(value @ Value::String(s)) => s.trim().parse::<f64>().map_err(|_| non_numeric(value)),
        Some(value) => Err(non_numeric(value)),
    }
}

/// Absent or non-string → default.
fn text_field(object: &Map<String, Value>, field: &str, default: &str) -> String {
    match object.get(field) {
        Some(Value::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}
