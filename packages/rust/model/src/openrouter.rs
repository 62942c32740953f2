//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use finsource_shared::{FinSourceError, ModelConfig, ModelError, Result};

use crate::CompletionModel;
use crate::extract::extract_json;
use crate::schema::ResponseSchema;

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("finsource/", env!("CARGO_PKG_VERSION"));

/// Upper bound on a single HTTP exchange. The caller's per-call timeout is
/// normally tighter; this only guards against a hung connection.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection settings for one model id.
#[derive(Debug, Clone)]
pub struct OpenRouterOptions {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Optional system message sent before every prompt.
    pub system_prompt: Option<String>,
}

impl OpenRouterOptions {
    /// Options for the search/rewrite model.
    pub fn search(config: &ModelConfig, api_key: &str) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: api_key.to_string(),
            model: config.search_model.clone(),
            temperature: config.search_temperature,
            max_tokens: 1024,
            system_prompt: Some(
                "You are a financial research assistant. You locate official financial \
                 disclosure documents published by companies and regulators. Always reply \
                 with a single JSON object and nothing else."
                    .into(),
            ),
        }
    }

    /// Options for the judge model.
    pub fn judge(config: &ModelConfig, api_key: &str) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: api_key.to_string(),
            model: config.judge_model.clone(),
            temperature: config.judge_temperature,
            max_tokens: 512,
            system_prompt: Some(
                "You are a strict reviewer of financial source citations. You score a \
                 candidate URL against fixed criteria. Always reply with a single JSON \
                 object and nothing else."
                    .into(),
            ),
        }
    }
}

/// Chat-completions client requesting `json_schema` structured output.
pub struct OpenRouterClient {
    options: OpenRouterOptions,
    client: Client,
}

impl OpenRouterClient {
    pub fn new(options: OpenRouterOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FinSourceError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { options, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.options.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, prompt: &str, schema: &ResponseSchema) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.options.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        json!({
            "model": self.options.model,
            "messages": messages,
            "temperature": self.options.temperature,
            "max_tokens": self.options.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": false,
                    "schema": schema.schema,
                }
            }
        })
    }
}

#[async_trait]
impl CompletionModel for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.options.model, schema = schema.name))]
    async fn complete(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
    ) -> std::result::Result<Value, ModelError> {
        let body = self.request_body(prompt, schema);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.options.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::transport(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ModelError::transport(format!("unreadable response body: {e}")))?;

        // OpenRouter reports upstream provider failures in a 200 body.
        if let Some(err) = payload.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return Err(ModelError::transport(format!("provider error: {message}")));
        }

        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::schema("response missing message content"))?;

        debug!(chars = content.len(), "model replied");

        let value = extract_json(content)?;
        schema.check(&value)?;
        Ok(value)
    }

    fn model_name(&self) -> &str {
        &self.options.model
    }
}
