//! Workflow graph: a tree of nodes executed against a shared Context.
//!
//! A node is one of three variants. An `AgentNode` runs a model collaborator
//! (with tools) and writes its answer under one declared key. A
//! `SequentialComposite` runs its children in order on the caller's context.
//! A `ParallelComposite` runs its children concurrently on forks of the
//! caller's context and merges their writes at the join.
//!
//! Every variant is driven through `Node::execute`, which mutates the context
//! in place. On failure the context keeps whatever was written before the
//! failure point.

pub mod agent;
pub mod parallel;
pub mod sequential;

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info};

use tandem_core::context::Context;
use tandem_core::error::{Result, TandemError};
use tandem_core::types::{NodeKind, RunEvent};

pub use agent::AgentNode;
pub use parallel::ParallelComposite;
pub use sequential::SequentialComposite;

use crate::scope::RunScope;

/// A node in the workflow graph.
pub enum Node {
    Agent(AgentNode),
    Sequential(SequentialComposite),
    Parallel(ParallelComposite),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(n) => n.name(),
            Self::Sequential(n) => n.name(),
            Self::Parallel(n) => n.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Agent(n) => n.description(),
            Self::Sequential(n) => n.description(),
            Self::Parallel(n) => n.description(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Agent(_) => NodeKind::Agent,
            Self::Sequential(_) => NodeKind::Sequential,
            Self::Parallel(_) => NodeKind::Parallel,
        }
    }

    /// Direct children (empty for agent nodes).
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Agent(_) => &[],
            Self::Sequential(n) => n.children(),
            Self::Parallel(n) => n.children(),
        }
    }

    /// Keys this node promises to write: its own key for an agent, the union
    /// of its children's keys (first-declaration order) for a composite.
    pub fn output_keys(&self) -> Vec<String> {
        match self {
            Self::Agent(n) => n.output_key().map(|k| vec![k.to_string()]).unwrap_or_default(),
            Self::Sequential(_) | Self::Parallel(_) => {
                let mut keys: Vec<String> = Vec::new();
                for child in self.children() {
                    for key in child.output_keys() {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
                keys
            }
        }
    }

    /// Execute this node against `ctx`.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        scope: &'a RunScope,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let start = Instant::now();
            let kind = self.kind();
            debug!(node = %self.name(), %kind, "Executing node");
            scope.publish(RunEvent::NodeStarted {
                run_id: scope.run_id().clone(),
                node: self.name().to_string(),
                kind,
            });

            let result = match self {
                // Collaborators run only inside agents; a panic there stays
                // local to the node so siblings and the report are unaffected.
                Self::Agent(n) => match AssertUnwindSafe(n.execute(ctx, scope)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(node = %n.name(), panic = %message, "Node panicked");
                        Err(TandemError::NodePanicked {
                            node: n.name().to_string(),
                            message,
                        })
                    }
                },
                Self::Sequential(n) => n.execute(ctx, scope).await,
                Self::Parallel(n) => n.execute(ctx, scope).await,
            };

            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => {
                    info!(node = %self.name(), %kind, elapsed_ms, "Node complete");
                    scope.publish(RunEvent::NodeCompleted {
                        run_id: scope.run_id().clone(),
                        node: self.name().to_string(),
                        elapsed_ms,
                    });
                }
                Err(e) => {
                    scope.publish(RunEvent::NodeFailed {
                        run_id: scope.run_id().clone(),
                        node: self.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
            result
        })
    }

    /// Render the tree as indented lines, one node per line.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        let keys = self.output_keys();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} ({})", self.name(), self.kind()));
        if !keys.is_empty() {
            out.push_str(&format!(" -> {}", keys.join(", ")));
        }
        if let Self::Agent(agent) = self {
            let tools: Vec<&str> = agent.tools().iter().map(|t| t.name()).collect();
            if !tools.is_empty() {
                out.push_str(&format!(" [tools: {}]", tools.join(", ")));
            }
        }
        out.push('\n');
        for child in self.children() {
            child.write_outline(depth + 1, out);
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl From<AgentNode> for Node {
    fn from(node: AgentNode) -> Self {
        Self::Agent(node)
    }
}

impl From<SequentialComposite> for Node {
    fn from(node: SequentialComposite) -> Self {
        Self::Sequential(node)
    }
}

impl From<ParallelComposite> for Node {
    fn from(node: ParallelComposite) -> Self {
        Self::Parallel(node)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("outputs", &self.output_keys())
            .field("children", &self.children())
            .finish()
    }
}
