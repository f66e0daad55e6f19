use std::collections::BTreeMap;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tandem_core::config::EngineConfig;
use tandem_core::context::Context;
use tandem_core::error::{FailureKind, TandemError};
use tandem_core::event::EventBus;
use tandem_core::types::{RunEvent, RunId};

use crate::graph::{panic_message, Node};
use crate::scope::RunScope;
use crate::validate::validate;

/// Outcome of `Runner::run`.
pub type RunResult = std::result::Result<RunOutput, FailureReport>;

/// A completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: RunId,
    pub context: Context,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunOutput {
    /// Final context flattened to text values.
    pub fn final_context(&self) -> BTreeMap<String, String> {
        self.context.to_string_map()
    }
}

/// A failed run: where it stopped, why, and what had been written so far.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub run_id: RunId,
    pub at_node: String,
    pub kind: FailureKind,
    pub message: String,
    /// Per-branch causes when a parallel group failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchReport>,
    /// Keys a failed parallel group still merged from successful branches.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<String>,
    pub partial_context: Context,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub at_node: String,
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.at_node, self.message)
    }
}

/// Executes a node tree from an initial context.
///
/// The runner owns the run boundary: it assigns the run id, validates the
/// tree, enforces the deadline, and turns every failure (panics included)
/// into a `FailureReport`.
pub struct Runner {
    config: EngineConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(config: EngineConfig) -> Self {
        let events = Arc::new(EventBus::new(config.runner.event_capacity));
        Self {
            config,
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Token that cancels every run started by this runner.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, root: &Node, initial: impl Into<Context>) -> RunResult {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut ctx: Context = initial.into();

        info!(run_id = %run_id, root = %root.name(), keys = ctx.len(), "Run started");
        self.events.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
        });

        if self.config.runner.validate {
            match validate(root, ctx.keys()) {
                Ok(report) => {
                    for warning in &report.warnings {
                        warn!(run_id = %run_id, "{}", warning);
                    }
                }
                Err(e) => return Err(self.finish_failed(run_id, root, e, ctx, start)),
            }
        }

        let scope = RunScope::new(
            run_id.clone(),
            self.config.agent.clone(),
            self.config.parallel.clone(),
        )
        .with_cancel(self.cancel.child_token())
        .with_events(self.events.clone());

        let deadline = self.config.runner.max_duration();
        let watchdog = {
            let scope = scope.clone();
            async move {
                if let Some(limit) = deadline {
                    tokio::time::sleep(limit).await;
                    warn!(run_id = %scope.run_id(), limit_secs = limit.as_secs(), "Run deadline reached, cancelling");
                    scope.cancel();
                }
                futures::future::pending::<Infallible>().await
            }
        };

        let execution = AssertUnwindSafe(root.execute(&mut ctx, &scope)).catch_unwind();
        let outcome = tokio::select! {
            outcome = execution => outcome,
            never = watchdog => match never {},
        };

        match outcome {
            Ok(Ok(())) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(run_id = %run_id, elapsed_ms, keys = ctx.len(), "Run complete");
                self.events.publish(RunEvent::RunComplete {
                    run_id: run_id.clone(),
                    succeeded: true,
                    elapsed_ms,
                });
                Ok(RunOutput {
                    run_id,
                    context: ctx,
                    started_at,
                    elapsed_ms,
                })
            }
            Ok(Err(e)) => Err(self.finish_failed(run_id, root, e, ctx, start)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(run_id = %run_id, panic = %message, "Node panicked");
                let e = TandemError::Internal(format!("node panicked: {}", message));
                Err(self.finish_failed(run_id, root, e, ctx, start))
            }
        }
    }

    fn finish_failed(
        &self,
        run_id: RunId,
        root: &Node,
        error: TandemError,
        ctx: Context,
        start: Instant,
    ) -> FailureReport {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let report = failure_report(run_id, root.name(), error, ctx);
        warn!(
            run_id = %report.run_id,
            at_node = %report.at_node,
            kind = %report.kind,
            elapsed_ms,
            "Run failed: {}",
            report.message
        );
        self.events.publish(RunEvent::RunComplete {
            run_id: report.run_id.clone(),
            succeeded: false,
            elapsed_ms,
        });
        report
    }
}

fn failure_report(run_id: RunId, root: &str, error: TandemError, ctx: Context) -> FailureReport {
    let kind = error.kind();
    let at_node = error.node().unwrap_or(root).to_string();
    let message = match kind {
        FailureKind::InternalOrchestrationError
            if !matches!(error, TandemError::Internal(_) | TandemError::NodePanicked { .. }) =>
        {
            TandemError::Internal(error.to_string()).to_string()
        }
        _ => error.to_string(),
    };

    let (branches, merged) = match error {
        TandemError::PartialFailure {
            successes,
            failures,
            ..
        } => (
            failures
                .into_iter()
                .map(|f| BranchReport {
                    at_node: f.error.node().unwrap_or(&f.branch).to_string(),
                    kind: f.error.kind(),
                    message: f.error.to_string(),
                    branch: f.branch,
                })
                .collect(),
            successes.into_iter().map(|(key, _)| key).collect(),
        ),
        _ => (Vec::new(), Vec::new()),
    };

    FailureReport {
        run_id,
        at_node,
        kind,
        message,
        branches,
        merged,
        partial_context: ctx,
        finished_at: Utc::now(),
    }
}
