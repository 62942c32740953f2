//! Decode model replies into domain values.
//!
//! The transport only guarantees a JSON object with the required keys.
//! Field types and placeholder values are dealt with here, and anything that
//! still does not fit is a [`ModelError::Schema`].

use serde_json::{Map, Value};

use finsource_shared::{Answer, ModelError, Verdict};

/// Strings models use to mean "I don't know".
const PLACEHOLDERS: &[&str] = &[
    "", "n/a", "na", "none", "null", "unknown", "not found", "not available", "-",
];

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ModelError> {
    value
        .as_object()
        .ok_or_else(|| ModelError::schema(format!("{what}: expected a JSON object")))
}

fn optional_text(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, ModelError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if PLACEHOLDERS.contains(&trimmed.to_lowercase().as_str()) {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(other) => Err(ModelError::schema(format!(
            "`{key}` should be a string, got {other}"
        ))),
    }
}

/// Parse a fiscal year from an integer or text such as `"2023"`,
/// `"FY2023"`, or `"2023-2024"` (the later year wins).
pub fn parse_fiscal_year(value: &Value) -> Result<Option<i32>, ModelError> {
    let year = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| ModelError::schema(format!("fiscal year {n} is not an integer")))?,
        Value::String(s) => {
            if PLACEHOLDERS.contains(&s.trim().to_lowercase().as_str()) {
                return Ok(None);
            }
            let latest = s
                .split(|c: char| !c.is_ascii_digit())
                .filter(|run| run.len() == 4)
                .filter_map(|run| run.parse::<i32>().ok())
                .filter(|y| (MIN_YEAR..=MAX_YEAR).contains(y))
                .max();
            match latest {
                Some(y) => y,
                None => {
                    return Err(ModelError::schema(format!(
                        "fiscal year {s:?} has no YYYY year"
                    )));
                }
            }
        }
        other => {
            return Err(ModelError::schema(format!(
                "fiscal year should be a number or string, got {other}"
            )));
        }
    };

    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(Some(year))
    } else {
        Err(ModelError::schema(format!("fiscal year {year} out of range")))
    }
}

/// Decode an answer-model reply. Accepts `year` as an alias of `fiscal_year`.
pub fn decode_answer(value: &Value) -> Result<Answer, ModelError> {
    let obj = as_object(value, "answer")?;

    let url = optional_text(obj, "url")?;
    let year_value = ["fiscal_year", "year"]
        .into_iter()
        .filter_map(|key| obj.get(key))
        .find(|v| !v.is_null())
        .unwrap_or(&Value::Null);
    let fiscal_year = parse_fiscal_year(year_value)?;

    Ok(Answer {
        url,
        fiscal_year,
        source_description: optional_text(obj, "source_description")
            .ok()
            .flatten(),
        confidence: optional_text(obj, "confidence").ok().flatten(),
    })
}

fn flag(obj: &Map<String, Value>, key: &str) -> Result<bool, ModelError> {
    match obj.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(ModelError::schema(format!(
            "`{key}` should be a boolean, got {other}"
        ))),
        None => Err(ModelError::schema(format!("missing field `{key}`"))),
    }
}

/// Decode a judge reply. Feedback may be a string or a list of strings.
pub fn decode_verdict(value: &Value) -> Result<Verdict, ModelError> {
    let obj = as_object(value, "verdict")?;

    let feedback = match obj.get("feedback") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::Null) | None => String::new(),
        Some(other) => {
            return Err(ModelError::schema(format!(
                "`feedback` should be text, got {other}"
            )));
        }
    };

    Ok(Verdict::from_judge(
        flag(obj, "accepted")?,
        flag(obj, "url_valid")?,
        flag(obj, "url_specific")?,
        flag(obj, "year_correct")?,
        flag(obj, "year_recent")?,
        feedback,
    ))
}

/// Decode a rewrite reply into the new prompt text.
pub fn decode_rewrite(value: &Value) -> Result<String, ModelError> {
    let obj = as_object(value, "rewrite")?;
    match obj.get("prompt") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(ModelError::schema("rewritten prompt is empty")),
        _ => Err(ModelError::schema("missing string field `prompt`")),
    }
}
