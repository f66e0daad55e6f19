use tracing::{debug, warn};

use tandem_core::context::Context;
use tandem_core::error::{Result, TandemError};

use super::Node;
use crate::scope::RunScope;

/// Runs its children one after another on the same context.
///
/// Each child sees every write made by the children before it. The first
/// failing child aborts the sequence; later children never start and the
/// context keeps what the earlier children wrote.
pub struct SequentialComposite {
    name: String,
    description: String,
    children: Vec<Node>,
}

impl SequentialComposite {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) async fn execute(&self, ctx: &mut Context, scope: &RunScope) -> Result<()> {
        for (step, child) in self.children.iter().enumerate() {
            if scope.is_cancelled() {
                return Err(TandemError::Cancelled {
                    node: self.name.clone(),
                });
            }

            debug!(sequence = %self.name, step, child = %child.name(), "Running step");
            if let Err(e) = child.execute(ctx, scope).await {
                warn!(
                    sequence = %self.name,
                    aborted_at = %child.name(),
                    step,
                    error = %e,
                    "Sequence aborted"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
