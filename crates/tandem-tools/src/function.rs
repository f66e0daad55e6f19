use futures::future::BoxFuture;

use tandem_core::error::Result;
use tandem_core::traits::FunctionTool;
use tandem_core::types::{ToolContext, ToolResult};

type ToolFn = dyn Fn(serde_json::Value, &ToolContext) -> ToolResult + Send + Sync;

/// A function tool backed by a synchronous closure.
///
/// The closure receives the call arguments and the tool context (for state
/// reads and writes) and returns the tagged result directly.
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    timeout_secs: Option<u64>,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(serde_json::Value, &ToolContext) -> ToolResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({ "type": "object", "properties": {} }),
            timeout_secs: None,
            func: Box::new(func),
        }
    }

    /// Set the JSON Schema describing the expected input fields.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl FunctionTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        let result = (self.func)(input, &ctx);
        Box::pin(async move { Ok(result) })
    }
}
