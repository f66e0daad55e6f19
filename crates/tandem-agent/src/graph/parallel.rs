use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use tandem_core::config::JoinPolicy;
use tandem_core::context::Context;
use tandem_core::error::{BranchFailure, Result, TandemError};
use tandem_core::types::RunEvent;

use super::Node;
use crate::scope::RunScope;

/// Runs its children concurrently, each on its own fork of the context.
///
/// Branches never see each other's writes. At the join the successful
/// branches' writes are merged into the caller's context in declaration
/// order, so the merged result does not depend on completion order. Two
/// branches writing the same key is a `KeyConflict` and nothing is merged.
pub struct ParallelComposite {
    name: String,
    description: String,
    children: Vec<Node>,
    join_policy: Option<JoinPolicy>,
    max_concurrency: Option<usize>,
}

struct BranchOutcome {
    name: String,
    result: Result<()>,
    writes: Vec<(String, serde_json::Value)>,
}

impl ParallelComposite {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            children,
            join_policy: None,
            max_concurrency: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the engine-wide join policy for this group.
    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = Some(policy);
        self
    }

    /// Cap the branches in flight at once (0 = unbounded).
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
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
        if scope.is_cancelled() {
            return Err(TandemError::Cancelled {
                node: self.name.clone(),
            });
        }

        let policy = self.join_policy.unwrap_or(scope.parallel().join_policy);
        let limit = self.max_concurrency.unwrap_or(scope.parallel().max_concurrency);

        let branches: Vec<_> = self
            .children
            .iter()
            .map(|child| {
                let mut branch_ctx = ctx.fork();
                let branch_scope = scope.child();
                async move {
                    let result = child.execute(&mut branch_ctx, &branch_scope).await;
                    BranchOutcome {
                        name: child.name().to_string(),
                        result,
                        writes: branch_ctx.writes(),
                    }
                }
            })
            .collect();

        debug!(group = %self.name, branches = branches.len(), limit, "Forking branches");
        let outcomes: Vec<BranchOutcome> = if limit == 0 || limit >= branches.len() {
            join_all(branches).await
        } else {
            stream::iter(branches).buffered(limit).collect().await
        };

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => successes.push((outcome.name, outcome.writes)),
                Err(e) => {
                    warn!(group = %self.name, branch = %outcome.name, error = %e, "Branch failed");
                    failures.push(BranchFailure {
                        branch: outcome.name,
                        error: Box::new(e),
                    });
                }
            }
        }

        if !failures.is_empty() && policy == JoinPolicy::AllOrNothing {
            successes.clear();
        }

        let merged = ctx.merge(&successes).map_err(|c| TandemError::KeyConflict {
            node: self.name.clone(),
            key: c.key,
            first: c.first,
            second: c.second,
        })?;

        info!(
            group = %self.name,
            merged = merged.len(),
            failed = failures.len(),
            "Branches joined"
        );
        scope.publish(RunEvent::BranchesMerged {
            node: self.name.clone(),
            keys: merged,
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TandemError::PartialFailure {
                node: self.name.clone(),
                successes: successes.into_iter().flat_map(|(_, writes)| writes).collect(),
                failures,
            })
        }
    }
}
