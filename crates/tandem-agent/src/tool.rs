use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use tandem_core::context::Context;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::FunctionTool;
use tandem_core::types::{ToolContext, ToolDefinition, ToolResult};
use tandem_tools::execute_tool;

use crate::graph::Node;
use crate::scope::RunScope;

/// Something an agent node can call during its tool loop.
#[derive(Clone)]
pub enum Tool {
    /// A plain function tool.
    Function(Arc<dyn FunctionTool>),
    /// Another node, run to completion on an isolated context.
    Agent(AgentTool),
}

impl Tool {
    pub fn function(tool: impl FunctionTool) -> Self {
        Self::Function(Arc::new(tool))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Function(t) => t.name(),
            Self::Agent(t) => t.name(),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::Function(t) => t.definition(),
            Self::Agent(t) => t.definition(),
        }
    }

    /// Invoke the tool on behalf of `node`.
    ///
    /// Returns the tagged result plus any state writes the tool recorded
    /// for the caller's context. Only cancellation escapes as an error;
    /// every other failure comes back as an error result.
    pub async fn invoke(
        &self,
        args: serde_json::Value,
        caller: &Context,
        node: &str,
        scope: &RunScope,
    ) -> Result<(ToolResult, Vec<(String, serde_json::Value)>)> {
        match self {
            Self::Function(tool) => {
                let tool_ctx = ToolContext::new(scope.run_id().clone(), node, caller.fork());
                let result = tokio::select! {
                    r = execute_tool(tool.as_ref(), args, tool_ctx.clone(), scope.tool_timeout()) => r,
                    _ = scope.cancel_token().cancelled() => {
                        return Err(TandemError::Cancelled { node: node.to_string() });
                    }
                };
                Ok((result, tool_ctx.take_writes()))
            }
            Self::Agent(tool) => Ok((tool.invoke(&args, caller, scope).await?, Vec::new())),
        }
    }
}

impl<T: FunctionTool> From<Arc<T>> for Tool {
    fn from(tool: Arc<T>) -> Self {
        Self::Function(tool)
    }
}

impl From<AgentTool> for Tool {
    fn from(tool: AgentTool) -> Self {
        Self::Agent(tool)
    }
}

/// Wraps a node so another agent can call it like a function.
///
/// Each call runs the wrapped node on a fresh fork of the caller's context
/// with the call arguments layered on top. Nothing the nested run writes
/// reaches the caller; the caller only sees the returned result.
#[derive(Clone)]
pub struct AgentTool {
    node: Arc<Node>,
    description: String,
    input_schema: serde_json::Value,
}

impl AgentTool {
    /// Wrap `node`. The node must declare at least one output key, since
    /// that is what the call returns.
    pub fn new(node: impl Into<Arc<Node>>) -> Result<Self> {
        let node = node.into();
        if node.output_keys().is_empty() {
            return Err(TandemError::InvalidWorkflow(format!(
                "agent tool '{}' wraps a node with no output key",
                node.name()
            )));
        }
        let description = node.description().to_string();
        Ok(Self {
            node,
            description,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "request": { "type": "string", "description": "The request for this agent" }
                },
                "required": ["request"]
            }),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn input_schema(&self) -> &serde_json::Value {
        &self.input_schema
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Run the wrapped node and return its declared output.
    ///
    /// A single output key yields its value directly; several yield an
    /// object keyed by output name.
    pub async fn invoke(
        &self,
        args: &serde_json::Value,
        caller: &Context,
        scope: &RunScope,
    ) -> Result<ToolResult> {
        if let Err(e) = tandem_tools::validate_input(&self.input_schema, args) {
            return Ok(ToolResult::error(e.to_string()));
        }

        let mut derived = caller.fork();
        match args {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    derived.set(key.clone(), value.clone());
                }
            }
            serde_json::Value::Null => {}
            other => derived.set("request", other.clone()),
        }

        let nested = scope.delegated();
        info!(tool = %self.name(), depth = nested.depth(), "Delegating to agent tool");

        match self.node.execute(&mut derived, &nested).await {
            Ok(()) => Ok(ToolResult::success(self.collect_output(&derived))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(tool = %self.name(), error = %e, "Agent tool failed");
                Ok(ToolResult::error(e.to_string()))
            }
        }
    }

    fn collect_output(&self, ctx: &Context) -> serde_json::Value {
        let keys = self.node.output_keys();
        if let [key] = keys.as_slice() {
            return ctx.get(key).cloned().unwrap_or(serde_json::Value::Null);
        }
        let mut out = serde_json::Map::new();
        for key in keys {
            let value = ctx.get(&key).cloned().unwrap_or(serde_json::Value::Null);
            out.insert(key, value);
        }
        serde_json::Value::Object(out)
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(t) => write!(f, "Tool::Function({})", t.name()),
            Self::Agent(t) => write!(f, "Tool::Agent({})", t.name()),
        }
    }
}
