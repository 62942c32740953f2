//! Pull a JSON object out of free-form model output.
//!
//! Models asked for JSON still wrap it in code fences or prose now and
//! then. Try, in order: the whole reply, the first fenced block, the first
//! balanced `{...}` span.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use finsource_shared::ModelError;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid regex")
});

/// Parse the first JSON object found in `text`.
pub fn extract_json(text: &str) -> Result<Value, ModelError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ModelError::schema("empty reply"));
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(caps) = FENCE_RE.captures(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(value);
        }
    }

    if let Some(span) = first_object_span(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(span) {
            return Ok(value);
        }
    }

    Err(ModelError::schema(format!(
        "no JSON object in reply: {}",
        truncate(trimmed, 120)
    )))
}

/// The first brace-balanced span, skipping braces inside string literals.
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
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

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        let v = extract_json(r#"{"url": "https://acme.com", "fiscal_year": 2023}"#).expect("json");
        assert_eq!(v["fiscal_year"], 2023);
    }

    #[test]
    fn fenced_block() {
        let text = "Here you go:\n```json\n{\"prompt\": \"find it\"}\n```\nGood luck.";
        let v = extract_json(text).expect("json");
        assert_eq!(v["prompt"], "find it");
    }

    #[test]
    fn object_embedded_in_prose() {
        let text = r#"The answer is {"url": "https://x.com/a}b.pdf", "fiscal_year": "2022"} as requested."#;
        let v = extract_json(text).expect("json");
        assert_eq!(v["url"], "https://x.com/a}b.pdf");
    }

    #[test]
    fn prose_only_is_schema_error() {
        let err = extract_json("I could not find a report for this company.").unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));
    }

    #[test]
    fn arrays_are_not_objects() {
        assert!(extract_json("[1, 2, 3]").is_err());
    }
}
