//! Mock model clients and fixtures shared by the Tandem test suites.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use tandem_core::context::Context;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::{ChatMessage, ModelRequest, ModelResponse};

/// Owned copy of a `ModelRequest`, captured for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub node: String,
    pub instruction: String,
    pub tools: Vec<String>,
    pub conversation: Vec<ChatMessage>,
}

impl RecordedRequest {
    fn capture(request: &ModelRequest<'_>) -> Self {
        Self {
            node: request.node.to_string(),
            instruction: request.instruction.to_string(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            conversation: request.conversation.to_vec(),
        }
    }
}

/// Replays a fixed sequence of responses and records every request.
///
/// Once the script runs out every further call fails.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model that answers once with `text`.
    pub fn answering(text: &str) -> Self {
        Self::new(vec![ModelResponse::answer(text)])
    }

    pub fn then_fail(self, message: &str) -> Self {
        self.lock_script()
            .push_back(Err(TandemError::ModelRequest(message.to_string())));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ModelResponse>>> {
        self.script.lock().unwrap()
    }
}

impl ModelClient for ScriptedModel {
    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        self.requests
            .lock()
            .unwrap()
            .push(RecordedRequest::capture(&request));
        let next = self
            .lock_script()
            .pop_front()
            .unwrap_or_else(|| Err(TandemError::ModelRequest("script exhausted".into())));
        Box::pin(async move { next })
    }
}

type ResponderFn = dyn Fn(&ModelRequest<'_>) -> Result<ModelResponse> + Send + Sync;

/// Computes each response from the request with a closure.
pub struct FnModel {
    responder: Box<ResponderFn>,
    calls: AtomicUsize,
}

impl FnModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ModelRequest<'_>) -> Result<ModelResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers with the rendered instruction, unchanged.
    pub fn echo() -> Self {
        Self::new(|req| Ok(ModelResponse::answer(req.instruction)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for FnModel {
    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = (self.responder)(&request);
        Box::pin(async move { response })
    }
}

/// Always fails with a model request error.
pub struct FailingModel {
    message: String,
}

impl FailingModel {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl ModelClient for FailingModel {
    fn invoke<'a>(&'a self, _request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        let message = self.message.clone();
        Box::pin(async move { Err(TandemError::ModelRequest(message)) })
    }
}

/// Sleeps before delegating to an inner model.
pub struct DelayedModel {
    inner: Arc<dyn ModelClient>,
    delay: Duration,
}

impl DelayedModel {
    pub fn new(inner: Arc<dyn ModelClient>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl ModelClient for DelayedModel {
    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.invoke(request).await
        })
    }
}

/// Never responds. Counts how many calls are in flight or were made.
#[derive(Default)]
pub struct PendingModel {
    calls: AtomicUsize,
}

impl PendingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for PendingModel {
    fn invoke<'a>(&'a self, _request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::future::pending())
    }
}

/// Shorthand for building a context from string pairs.
pub fn context(pairs: &[(&str, &str)]) -> Context {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

/// Write `content` to a file named `name` in a fresh temp dir.
///
/// Keep the returned `TempDir` alive for as long as the file is needed.
pub fn write_temp_file(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (dir, path)
}
