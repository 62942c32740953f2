//! Response schemas requested from the model.

use serde_json::{Value, json};

use finsource_shared::ModelError;

/// A named JSON schema plus the keys a reply must carry to be decodable.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub schema: Value,
}

impl ResponseSchema {
    /// `{url, fiscal_year}` guess from the answer model.
    pub fn answer() -> Self {
        Self {
            name: "financial_source",
            // `fiscal_year` may arrive as `year`; the decoder resolves it.
            required: &["url"],
            schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": ["string", "null"] },
                    "fiscal_year": { "type": ["integer", "string", "null"] },
                    "source_description": { "type": ["string", "null"] },
                    "confidence": { "type": ["string", "null"] }
                },
                "required": ["url", "fiscal_year"]
            }),
        }
    }

    /// Criteria scores and feedback from the judge model.
    pub fn verdict() -> Self {
        Self {
            name: "judge_verdict",
            required: &[
                "accepted",
                "url_valid",
                "url_specific",
                "year_correct",
                "year_recent",
            ],
            schema: json!({
                "type": "object",
                "properties": {
                    "accepted": { "type": "boolean" },
                    "url_valid": { "type": "boolean" },
                    "url_specific": { "type": "boolean" },
                    "year_correct": { "type": "boolean" },
                    "year_recent": { "type": "boolean" },
                    "feedback": { "type": "string" }
                },
                "required": [
                    "accepted", "url_valid", "url_specific",
                    "year_correct", "year_recent", "feedback"
                ]
            }),
        }
    }

    /// Rewritten search prompt.
    pub fn rewrite() -> Self {
        Self {
            name: "rewritten_prompt",
            required: &["prompt"],
            schema: json!({
                "type": "object",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"]
            }),
        }
    }

    /// Check that `value` is an object carrying every required key.
    pub fn check(&self, value: &Value) -> Result<(), ModelError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ModelError::schema(format!("{}: reply is not a JSON object", self.name)))?;

        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|key| !obj.contains_key(*key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ModelError::schema(format!(
                "{}: missing field(s) {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}
