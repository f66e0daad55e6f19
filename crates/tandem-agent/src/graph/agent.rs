use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use tandem_core::context::{render_value, Context};
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_core::types::{
    ChatMessage, ModelRequest, ModelResponse, RunEvent, ToolCall, ToolDefinition, ToolResult,
};

use crate::scope::RunScope;
use crate::template::Template;
use crate::tool::Tool;

type StateWrites = Vec<(String, serde_json::Value)>;

/// A leaf node backed by a model collaborator.
///
/// The node renders its instruction from the context, then loops: ask the
/// model, run any requested tools, feed the results back, until the model
/// gives a final answer. The answer is written under the output key.
pub struct AgentNode {
    name: String,
    description: String,
    instruction: Template,
    model: Arc<dyn ModelClient>,
    tools: Vec<Tool>,
    output_key: Option<String>,
    input_keys: Vec<String>,
    max_tool_turns: Option<usize>,
}

impl AgentNode {
    pub fn new(name: impl Into<String>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: Template::parse(""),
            model,
            tools: Vec::new(),
            output_key: None,
            input_keys: Vec::new(),
            max_tool_turns: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Instruction template; `{key}` placeholders are filled from the context.
    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = Template::parse(instruction);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<Tool>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Context keys presented to the model as input data.
    pub fn with_inputs(mut self, keys: Vec<String>) -> Self {
        self.input_keys = keys;
        self
    }

    /// Override the engine-wide tool turn limit for this node. The model is
    /// always invoked at least once, so 0 behaves like 1.
    pub fn with_max_tool_turns(mut self, turns: usize) -> Self {
        self.max_tool_turns = Some(turns);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instruction(&self) -> &Template {
        &self.instruction
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    pub(crate) async fn execute(&self, ctx: &mut Context, scope: &RunScope) -> Result<()> {
        if scope.is_cancelled() {
            return Err(self.cancelled());
        }

        let instruction = self
            .instruction
            .render(ctx)
            .map_err(|key| TandemError::MissingContextKey {
                node: self.name.clone(),
                key,
            })?;

        let definitions: Vec<ToolDefinition> = self.tools.iter().map(Tool::definition).collect();
        let mut conversation: Vec<ChatMessage> = Vec::new();
        if let Some(input) = self.input_message(ctx) {
            conversation.push(input);
        }

        let max_turns = self
            .max_tool_turns
            .unwrap_or(scope.agent().max_tool_turns)
            .max(1);

        for turn in 0..max_turns {
            debug!(node = %self.name, turn, "Invoking model");
            let request = ModelRequest {
                node: &self.name,
                instruction: &instruction,
                tools: &definitions,
                conversation: &conversation,
            };

            let response = tokio::select! {
                r = self.model.invoke(request) => r,
                _ = scope.cancel_token().cancelled() => return Err(self.cancelled()),
            };

            let calls = match response {
                Ok(ModelResponse::FinalAnswer(text)) => {
                    info!(node = %self.name, turns = turn + 1, "Agent answered");
                    if let Some(key) = &self.output_key {
                        ctx.set_str(key.clone(), text);
                    }
                    return Ok(());
                }
                Ok(ModelResponse::ToolCalls(calls)) if calls.is_empty() => {
                    return Err(TandemError::ModelInvocation {
                        node: self.name.clone(),
                        message: "model returned neither an answer nor tool calls".into(),
                    });
                }
                Ok(ModelResponse::ToolCalls(calls)) => calls,
                Err(e) if e.is_cancelled() => return Err(self.cancelled()),
                Err(e) => {
                    return Err(TandemError::ModelInvocation {
                        node: self.name.clone(),
                        message: e.to_string(),
                    });
                }
            };

            let results = self.run_tools(&calls, ctx, scope).await?;
            conversation.push(ChatMessage::tool_calls(&calls));
            conversation.push(ChatMessage::tool_results(calls.into_iter().zip(results).collect()));
        }

        warn!(node = %self.name, max_turns, "Tool loop limit reached");
        Err(TandemError::ToolLoopExceeded {
            node: self.name.clone(),
            max_turns,
        })
    }

    /// Run one turn's tool calls and apply their state writes to `ctx`
    /// in call order.
    async fn run_tools(
        &self,
        calls: &[ToolCall],
        ctx: &mut Context,
        scope: &RunScope,
    ) -> Result<Vec<ToolResult>> {
        let mut results = Vec::with_capacity(calls.len());

        if scope.agent().parallel_tools && calls.len() > 1 {
            let snapshot = ctx.fork();
            let outcomes = join_all(calls.iter().map(|c| self.run_tool(c, &snapshot, scope))).await;
            for outcome in outcomes {
                let (result, writes) = outcome?;
                apply_writes(ctx, writes);
                results.push(result);
            }
        } else {
            for call in calls {
                let (result, writes) = self.run_tool(call, ctx, scope).await?;
                apply_writes(ctx, writes);
                results.push(result);
            }
        }

        Ok(results)
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        ctx: &Context,
        scope: &RunScope,
    ) -> Result<(ToolResult, StateWrites)> {
        scope.publish(RunEvent::ToolStart {
            node: self.name.clone(),
            tool: call.name.clone(),
            args: call.args.clone(),
        });

        let (result, writes) = match self.tools.iter().find(|t| t.name() == call.name) {
            Some(tool) => tool.invoke(call.args.clone(), ctx, &self.name, scope).await?,
            None => {
                warn!(node = %self.name, tool = %call.name, "Model requested unknown tool");
                (ToolResult::error(format!("Tool not found: {}", call.name)), Vec::new())
            }
        };

        debug!(
            node = %self.name,
            tool = %call.name,
            is_error = result.is_error(),
            writes = writes.len(),
            "Tool finished"
        );
        scope.publish(RunEvent::ToolEnd {
            node: self.name.clone(),
            tool: call.name.clone(),
            result: result.clone(),
        });

        Ok((result, writes))
    }

    /// Present the declared input keys to the model as a data block.
    fn input_message(&self, ctx: &Context) -> Option<ChatMessage> {
        if self.input_keys.is_empty() {
            return None;
        }

        let mut text = String::from("## Context Data\n\n");
        let mut present = 0;
        for key in &self.input_keys {
            match ctx.get(key) {
                Some(value) => {
                    text.push_str(&format!("**{}**: {}\n", key, render_value(value)));
                    present += 1;
                }
                None => warn!(node = %self.name, key = %key, "Declared input key is absent"),
            }
        }

        (present > 0).then(|| ChatMessage::user(text))
    }

    fn cancelled(&self) -> TandemError {
        TandemError::Cancelled {
            node: self.name.clone(),
        }
    }
}

fn apply_writes(ctx: &mut Context, writes: StateWrites) {
    for (key, value) in writes {
        ctx.set(key, value);
    }
}
