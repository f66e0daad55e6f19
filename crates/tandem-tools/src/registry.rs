use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::FunctionTool;
use tandem_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available function tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn FunctionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl FunctionTool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn FunctionTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionTool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get tool definitions for sending to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
        default_timeout: Duration,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| TandemError::ToolNotFound(name.to_string()))?;
        Ok(execute_tool(tool.as_ref(), input, ctx, default_timeout).await)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate, run under timeout, and fold every failure into a
/// `{status: error}` result so the caller can hand it back to the model.
pub async fn execute_tool(
    tool: &dyn FunctionTool,
    input: serde_json::Value,
    ctx: ToolContext,
    default_timeout: Duration,
) -> ToolResult {
    let name = tool.name();
    if let Err(e) = validate_input(&tool.input_schema(), &input) {
        debug!(tool = %name, error = %e, "Rejected tool input");
        return ToolResult::error(e.to_string());
    }

    let timeout = tool
        .timeout_secs()
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    let result = match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(TandemError::ToolTimeout {
            tool: name.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    };

    match result {
        Ok(r) => r,
        Err(e) => {
            warn!(tool = %name, error = %e, "Tool execution failed");
            ToolResult::error(e.to_string())
        }
    }
}

/// Check that an object input carries every field the schema marks required.
pub fn validate_input(schema: &serde_json::Value, input: &serde_json::Value) -> Result<()> {
    let required = match schema.get("required").and_then(|r| r.as_array()) {
        Some(r) if !r.is_empty() => r,
        _ => return Ok(()),
    };

    let obj = input
        .as_object()
        .ok_or_else(|| TandemError::ToolValidation("input must be a JSON object".into()))?;

    let missing: Vec<&str> = required
        .iter()
        .filter_map(|f| f.as_str())
        .filter(|f| !obj.contains_key(*f))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TandemError::ToolValidation(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}
