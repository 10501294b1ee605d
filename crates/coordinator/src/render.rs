//! Human-readable rendering of long-term memory values.

use serde_json::Value;

/// Render a decoded record value.
///
/// Conversation snapshots show their quoted message contents, strings show
/// verbatim, anything else is compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("messages") {
            Some(Value::Array(messages)) => render_messages(messages),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

fn render_messages(messages: &[Value]) -> String {
    let quoted: Vec<String> = messages
        .iter()
        .filter_map(|msg| match msg {
            Value::String(text) => Some(text.as_str()),
            Value::Object(obj) => obj.get("content").and_then(Value::as_str),
            _ => None,
        })
        .map(|text| format!("\"{text}\""))
        .collect();
    if quoted.is_empty() {
        "[empty conversation]".to_string()
    } else {
        quoted.join(", ")
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
