//! Result normalization shared by local and provider tools.
//!
//! Text that parses as JSON becomes that value, otherwise a JSON string.
//! Provider text blocks are joined with `\n` first; `structuredContent`
//! wins over content blocks when present.

use serde_json::Value;

use crate::provider::RemoteOutput;

/// Normalize a provider result. `Err` carries the message of an `isError` result.
pub fn normalize_remote(output: RemoteOutput) -> Result<Value, String> {
    if output.is_error {
        let text = joined_text(&output.content);
        return Err(if text.trim().is_empty() {
            "provider reported an error without a message".to_string()
        } else {
            text
        });
    }

    if let Some(structured) = output.structured_content {
        return Ok(structured);
    }

    if output.content.is_empty() {
        return Ok(Value::Null);
    }

    if output.content.iter().all(|block| text_of(block).is_some()) {
        return Ok(parse_text(&joined_text(&output.content)));
    }

    // Mixed content: text blocks are parsed individually, the rest kept raw.
    Ok(Value::Array(
        output
            .content
            .into_iter()
            .map(|block| match text_of(&block) {
                Some(text) => parse_text(text),
                None => block,
            })
            .collect(),
    ))
}

/// Normalize a local handler's return value.
///
/// Strings get the provider text rule, so a local and a remote tool that
/// return the same text produce the same output.
pub fn normalize_local(value: Value) -> Value {
    match value {
        Value::String(text) => parse_text(&text),
        other => other,
    }
}

fn text_of(block: &Value) -> Option<&str> {
    if block.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    block.get("text").and_then(Value::as_str)
}

fn joined_text(content: &[Value]) -> String {
    content.iter().filter_map(text_of).collect::<Vec<_>>().join("\n")
}

fn parse_text(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.to_string()))
}
