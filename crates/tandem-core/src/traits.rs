use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Model-invocation collaborator. Calls may be slow and may fail.
///
/// Agent nodes are built with an already-resolved client; nothing consults
/// process-wide state while a run executes.
pub trait ModelClient: Send + Sync + 'static {
    /// Ask the model for either a final answer or a batch of tool calls.
    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>>;
}

/// Function tool: a direct input to result capability.
pub trait FunctionTool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(&self, input: serde_json::Value, ctx: ToolContext)
        -> BoxFuture<'_, Result<ToolResult>>;

    /// Per-tool timeout override in seconds.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
