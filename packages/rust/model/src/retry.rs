//! Per-call timeout and bounded retry around [`CompletionModel::complete`].

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use finsource_shared::{ModelError, RunConfig};

use crate::CompletionModel;
use crate::schema::ResponseSchema;

/// Base delay between transport retries; grows linearly per attempt.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// How a single logical model call is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub per_call_timeout: Duration,
    /// Extra attempts after the first transport failure.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl From<&RunConfig> for RetryPolicy {
    fn from(config: &RunConfig) -> Self {
        Self {
            per_call_timeout: config.per_call_timeout,
            max_retries: config.max_transport_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Call `model`, retrying transport failures (timeouts included) up to
/// `policy.max_retries` times. Schema errors are returned immediately.
pub async fn complete_with_retry(
    model: &dyn CompletionModel,
    prompt: &str,
    schema: &ResponseSchema,
    policy: &RetryPolicy,
) -> Result<Value, ModelError> {
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(policy.per_call_timeout, model.complete(prompt, schema))
            .await
            .unwrap_or(Err(ModelError::Timeout(policy.per_call_timeout)));

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transport() => return Err(err),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                warn!(
                    model = model.model_name(),
                    schema = schema.name,
                    attempt,
                    attempts,
                    error = %err,
                    "model call failed, retrying"
                );
                tokio::time::sleep(policy.backoff.saturating_mul(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// Replays scripted outcomes; an empty script means "hang".
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<Value, ModelError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Value, ModelError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for Scripted {
        async fn complete(&self, _: &str, _: &ResponseSchema) -> Result<Value, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(ModelError::transport("unreachable"))
                }
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            per_call_timeout: Duration::from_millis(50),
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let model = Scripted::new(vec![
            Err(ModelError::transport("connection reset")),
            Ok(json!({"prompt": "ok"})),
        ]);
        let value = complete_with_retry(&model, "p", &ResponseSchema::rewrite(), &policy(2))
            .await
            .unwrap();
        assert_eq!(value["prompt"], "ok");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn schema_error_is_not_retried() {
        let model = Scripted::new(vec![
            Err(ModelError::schema("not json")),
            Ok(json!({"prompt": "never reached"})),
        ]);
        let err = complete_with_retry(&model, "p", &ResponseSchema::rewrite(), &policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let model = Scripted::new(vec![
            Err(ModelError::transport("503")),
            Err(ModelError::transport("503")),
            Err(ModelError::transport("503")),
            Ok(json!({"prompt": "too late"})),
        ]);
        let err = complete_with_retry(&model, "p", &ResponseSchema::rewrite(), &policy(2))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unbounded_retry_count_does_not_overflow() {
        let model = Scripted::new(vec![
            Err(ModelError::transport("503")),
            Ok(json!({"prompt": "ok"})),
        ]);
        let value = complete_with_retry(&model, "p", &ResponseSchema::rewrite(), &policy(u32::MAX))
            .await
            .unwrap();
        assert_eq!(value["prompt"], "ok");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_is_a_transport_failure() {
        let model = Scripted::new(vec![]);
        let err = complete_with_retry(&model, "p", &ResponseSchema::rewrite(), &policy(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Timeout(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
