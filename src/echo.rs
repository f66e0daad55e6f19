use futures::future::BoxFuture;

use tandem_core::context::render_value;
use tandem_core::error::Result;
use tandem_core::traits::ModelClient;
use tandem_core::types::{ModelRequest, ModelResponse, ToolResult};

/// Offline stand-in for a real model, used by `tandem run`.
///
/// Answers immediately with the node name and its rendered instruction, so a
/// dry run shows exactly what each node would have been asked. When `probe`
/// is set, the first turn calls every tool whose schema needs only a
/// `request` string, and the answer then lists the tool results.
pub struct EchoModel {
    probe: bool,
}

impl EchoModel {
    pub fn new(probe: bool) -> Self {
        Self { probe }
    }
}

impl ModelClient for EchoModel {
    fn invoke<'a>(&'a self, request: ModelRequest<'a>) -> BoxFuture<'a, Result<ModelResponse>> {
        Box::pin(async move {
            if self.probe && request.tool_rounds() == 0 {
                let calls: Vec<_> = request
                    .tools
                    .iter()
                    .filter(|t| takes_request_only(&t.input_schema))
                    .map(|t| {
                        tandem_core::types::ToolCall::new(
                            &t.name,
                            serde_json::json!({ "request": request.instruction }),
                        )
                    })
                    .collect();
                if !calls.is_empty() {
                    return Ok(ModelResponse::ToolCalls(calls));
                }
            }

            let mut answer = format!("[{}] {}", request.node, request.instruction.trim());
            for (tool, result) in request.last_tool_results() {
                let line = match result {
                    ToolResult::Success { result } => render_value(result),
                    ToolResult::Error { error_message } => format!("error: {}", error_message),
                };
                answer.push_str(&format!("\n[{}] {}", tool, line));
            }
            Ok(ModelResponse::FinalAnswer(answer))
        })
    }
}

fn takes_request_only(schema: &serde_json::Value) -> bool {
    matches!(
        schema["required"].as_array().map(|r| r.as_slice()),
        Some([field]) if field == "request"
    )
}
