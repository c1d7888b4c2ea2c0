//! AI generation provider interface

use async_trait::async_trait;
use serde_json::Value;

use stocktalk_core::Result;

/// Source of generated analysis text and structured extractions
///
/// With no schema the provider answers free text (wrapped as a JSON string);
/// with a schema it must answer a JSON value of that shape. The schema is
/// taken by value: it is built per call and small next to the prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Generate a completion for the prompt
    async fn complete(&self, prompt: &str, schema: Option<Value>) -> Result<Value>;

    /// Provider name, for logs
    fn name(&self) -> &str;
}

/// Pull plain text out of a completion value.
///
/// Free-text completions arrive as a JSON string; anything else is rendered
/// compactly so callers always have something to show.
pub fn completion_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
