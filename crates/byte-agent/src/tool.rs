//! Tool trait and argument validation

use async_trait::async_trait;
use byte_ai::Content;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a tool hands back to the worker that called it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    /// Set when the content is an explanatory sentence rather than data
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Text blocks joined by newlines; this is what lands in a state slot
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An external lookup a worker agent can bind.
///
/// `execute` never fails past its boundary: upstream errors come back as
/// [`ToolResult::error`] with a short sentence.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by
    fn name(&self) -> &str;

    /// Human-readable label for logs and events
    fn label(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

pub type BoxedTool = Arc<dyn Tool>;

/// The declaration sent to the model alongside the context
pub fn to_api_tool(tool: &dyn Tool) -> byte_ai::Tool {
    byte_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Compile a tool's schema once. Returns `None` (and logs) if the schema itself is invalid.
pub fn compile_schema(tool: &dyn Tool) -> Option<jsonschema::Validator> {
    match jsonschema::validator_for(&tool.parameters_schema()) {
        Ok(validator) => Some(validator),
        Err(e) => {
            tracing::warn!(tool = tool.name(), "invalid parameter schema: {}", e);
            None
        }
    }
}

/// Every violation of `validator` in `value`, joined with `; `. `None` when it conforms.
pub fn schema_violations(
    value: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    (!errors.is_empty()).then(|| errors.join("; "))
}
