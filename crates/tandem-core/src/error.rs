use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TandemError {
    // Structural run failures
    #[error("Missing context key '{key}' referenced by node {node}")]
    MissingContextKey { node: String, key: String },

    #[error("Node {node} exceeded tool loop limit ({max_turns} turns)")]
    ToolLoopExceeded { node: String, max_turns: usize },

    #[error("Model invocation failed in node {node}: {message}")]
    ModelInvocation { node: String, message: String },

    #[error("Key conflict in parallel group {node}: '{key}' written by both {first} and {second}")]
    KeyConflict {
        node: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("Parallel group {node}: {} branch(es) failed, {} key(s) merged", failures.len(), successes.len())]
    PartialFailure {
        node: String,
        successes: Vec<(String, serde_json::Value)>,
        failures: Vec<BranchFailure>,
    },

    #[error("Node {node} cancelled")]
    Cancelled { node: String },

    #[error("Internal orchestration error: {0}")]
    Internal(String),

    #[error("Internal orchestration error: node {node} panicked: {message}")]
    NodePanicked { node: String, message: String },

    // Model collaborator errors (raised by ModelClient implementations)
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Workflow construction errors
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One failed (or cancelled) branch of a parallel group.
#[derive(Debug)]
pub struct BranchFailure {
    pub branch: String,
    pub error: Box<TandemError>,
}

impl std::fmt::Display for BranchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.branch, self.error)
    }
}

/// Failure classification surfaced at the run boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    MissingContextKey,
    ToolLoopExceeded,
    ModelInvocationError,
    KeyConflict,
    PartialFailure,
    Cancelled,
    InternalOrchestrationError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingContextKey => "MissingContextKey",
            Self::ToolLoopExceeded => "ToolLoopExceeded",
            Self::ModelInvocationError => "ModelInvocationError",
            Self::KeyConflict => "KeyConflict",
            Self::PartialFailure => "PartialFailure",
            Self::Cancelled => "Cancelled",
            Self::InternalOrchestrationError => "InternalOrchestrationError",
        };
        f.write_str(s)
    }
}

impl TandemError {
    /// The structural kind of this error. Anything outside the run taxonomy
    /// is reported as an internal orchestration error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingContextKey { .. } => FailureKind::MissingContextKey,
            Self::ToolLoopExceeded { .. } => FailureKind::ToolLoopExceeded,
            Self::ModelInvocation { .. } => FailureKind::ModelInvocationError,
            Self::KeyConflict { .. } => FailureKind::KeyConflict,
            Self::PartialFailure { .. } => FailureKind::PartialFailure,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            _ => FailureKind::InternalOrchestrationError,
        }
    }

    /// Name of the node that raised this error, if it carries one.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::MissingContextKey { node, .. }
            | Self::ToolLoopExceeded { node, .. }
            | Self::ModelInvocation { node, .. }
            | Self::KeyConflict { node, .. }
            | Self::PartialFailure { node, .. }
            | Self::Cancelled { node }
            | Self::NodePanicked { node, .. } => Some(node),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, TandemError>;
