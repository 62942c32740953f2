//! Model transport for finsource.
//!
//! The refinement loop only sees [`CompletionModel`]: a prompt plus a
//! [`ResponseSchema`] in, a JSON value out. This crate provides:
//! - the trait itself and the schemas the loop asks for
//! - [`OpenRouterClient`], an OpenAI-compatible chat-completions adapter
//! - [`complete_with_retry`], the per-call timeout and bounded retry wrapper

pub mod extract;
pub mod openrouter;
pub mod retry;
pub mod schema;

use async_trait::async_trait;

use finsource_shared::ModelError;

pub use extract::extract_json;
pub use openrouter::{OpenRouterClient, OpenRouterOptions};
pub use retry::{RetryPolicy, complete_with_retry};
pub use schema::ResponseSchema;

/// A text model that answers with structured JSON.
///
/// Implementations must be cheap to share across tasks (`Send + Sync`);
/// the coordinator hands the same instance to every refinement loop.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Submit `prompt` and return a JSON value shaped like `schema`.
    ///
    /// Network, auth, and quota failures are [`ModelError::Transport`];
    /// a reply that is not the requested structure is [`ModelError::Schema`].
    async fn complete(
        &self,
        prompt: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, ModelError>;

    /// Short identifier for logs.
    fn model_name(&self) -> &str;
}
