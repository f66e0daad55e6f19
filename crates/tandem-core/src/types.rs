use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Context;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a node's conversation with its model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        name: String,
        result: ToolResult,
    },
}

/// A message in the conversation state handed to the model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Assistant message recording the tool calls the model requested.
    pub fn tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: Role::Assistant,
            content: calls
                .iter()
                .map(|c| ContentBlock::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.args.clone(),
                })
                .collect(),
        }
    }

    /// User message carrying tool results back to the model.
    pub fn tool_results(results: Vec<(ToolCall, ToolResult)>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(|(call, result)| ContentBlock::ToolResult {
                    tool_use_id: call.id,
                    name: call.name,
                    result,
                })
                .collect(),
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool results from this message as (tool name, result).
    pub fn results(&self) -> Vec<(&str, &ToolResult)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { name, result, .. } => Some((name.as_str(), result)),
                _ => None,
            })
            .collect()
    }
}

/// A tool invocation requested by the model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    /// A call whose id is the tool name. Use `with_id` when a model requests
    /// the same tool more than once in a turn.
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Everything the model collaborator sees for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    /// Name of the invoking node.
    pub node: &'a str,
    /// The rendered instruction.
    pub instruction: &'a str,
    /// Schemas of the tools the node may call.
    pub tools: &'a [ToolDefinition],
    /// Conversation so far (input data, tool calls, tool results).
    pub conversation: &'a [ChatMessage],
}

impl ModelRequest<'_> {
    /// Tool results from the most recent message, if it carried any.
    pub fn last_tool_results(&self) -> Vec<(&str, &ToolResult)> {
        self.conversation
            .last()
            .map(|m| m.results())
            .unwrap_or_default()
    }

    /// Number of completed tool rounds so far.
    pub fn tool_rounds(&self) -> usize {
        self.conversation
            .iter()
            .filter(|m| !m.results().is_empty())
            .count()
    }
}

/// What the model collaborator returns for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// A final textual answer; the node is done.
    FinalAnswer(String),
    /// The model wants these tools invoked before it answers.
    ToolCalls(Vec<ToolCall>),
}

impl ModelResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self::FinalAnswer(text.into())
    }

    pub fn call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCalls(vec![ToolCall::new(name, args)])
    }
}

/// Tagged result of a tool invocation.
///
/// Serializes as `{"status":"success","result":...}` or
/// `{"status":"error","error_message":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { result: serde_json::Value },
    Error { error_message: String },
}

impl ToolResult {
    pub fn success(result: impl Into<serde_json::Value>) -> Self {
        Self::Success {
            result: result.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The success payload, if any.
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Success { result } => Some(result),
            Self::Error { .. } => None,
        }
    }
}

/// Tool definition for sending to the model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to function tools during execution.
///
/// `state` is a read-only snapshot of the calling node's context. Writes
/// recorded with `set_state` are applied to the caller's context after the
/// tool returns.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: RunId,
    pub node: String,
    pub state: Context,
    writes: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl ToolContext {
    pub fn new(run_id: RunId, node: impl Into<String>, state: Context) -> Self {
        Self {
            run_id,
            node: node.into(),
            state,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a state write to apply to the caller's context.
    pub fn set_state(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut writes = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        writes.push((key.into(), value));
    }

    /// Drain the recorded writes, in recording order.
    pub fn take_writes(&self) -> Vec<(String, serde_json::Value)> {
        let mut writes = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *writes)
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("node", &self.node)
            .field("state_keys", &self.state.len())
            .finish()
    }
}

/// Which variant of node an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Sequential,
    Parallel,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// Run lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Run started.
    RunStarted { run_id: RunId },
    /// A node started executing.
    NodeStarted { run_id: RunId, node: String, kind: NodeKind },
    /// A node finished successfully.
    NodeCompleted { run_id: RunId, node: String, elapsed_ms: u64 },
    /// A node failed (or was cancelled).
    NodeFailed { run_id: RunId, node: String, error: String },
    /// An agent node invoked a tool.
    ToolStart { node: String, tool: String, args: serde_json::Value },
    /// Tool invocation finished.
    ToolEnd { node: String, tool: String, result: ToolResult },
    /// A parallel group merged branch outputs.
    BranchesMerged { node: String, keys: Vec<String> },
    /// Run finished.
    RunComplete { run_id: RunId, succeeded: bool, elapsed_ms: u64 },
}
