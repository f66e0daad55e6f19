use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tandem_core::config::{AgentConfig, ParallelConfig};
use tandem_core::event::EventBus;
use tandem_core::types::{RunEvent, RunId};

/// Per-run execution state handed down the node tree.
///
/// Cloning is cheap. Parallel branches and nested agent-tool runs receive a
/// `child()` scope whose cancellation token is cancelled with the parent.
#[derive(Clone)]
pub struct RunScope {
    run_id: RunId,
    cancel: CancellationToken,
    agent: Arc<AgentConfig>,
    parallel: Arc<ParallelConfig>,
    events: Option<Arc<EventBus>>,
    depth: usize,
}

impl RunScope {
    pub fn new(run_id: RunId, agent: AgentConfig, parallel: ParallelConfig) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
            agent: Arc::new(agent),
            parallel: Arc::new(parallel),
            events: None,
            depth: 0,
        }
    }

    /// Scope with default agent and parallel settings.
    pub fn detached() -> Self {
        Self::new(RunId::new(), AgentConfig::default(), ParallelConfig::default())
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Scope for a parallel branch or delegated run.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Scope for a nested agent-tool run, one level deeper.
    pub fn delegated(&self) -> Self {
        let mut scope = self.child();
        scope.depth += 1;
        scope
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }

    /// Nesting level of agent-tool delegation (0 = top-level run).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn publish(&self, event: RunEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }
}
