//! Declarative workflow files.
//!
//! A workflow file is TOML with a `[root]` node tree, optional `[[tools]]`
//! lookup tables, and optional `[[agent_tools]]` node trees that agents can
//! call by name. Nodes name their model by string; the caller supplies a
//! `ModelRegistry` that resolves those names to clients.
//!
//! ```toml
//! [root]
//! type = "sequential"
//! name = "pipeline"
//!
//! [[root.children]]
//! type = "agent"
//! name = "topic_identifier"
//! model = "local"
//! instruction = "Pick a topic."
//! output_key = "user_topic"
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_core::config::{expand_env_vars, JoinPolicy};
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::ModelClient;
use tandem_tools::{LookupTool, LookupToolConfig, ToolRegistry};

use crate::graph::{AgentNode, Node, ParallelComposite, SequentialComposite};
use crate::tool::{AgentTool, Tool};

/// Resolves model names used in workflow files to clients.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn ModelClient>>,
    fallback: Option<Arc<dyn ModelClient>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn ModelClient>) {
        self.models.insert(name.into(), client);
    }

    /// Client used for any name without an explicit registration.
    pub fn with_fallback(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.fallback = Some(client);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ModelClient>> {
        self.models.get(name).cloned().or_else(|| self.fallback.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub tools: Vec<LookupToolConfig>,
    #[serde(default)]
    pub agent_tools: Vec<AgentToolSpec>,
    pub root: NodeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Agent(AgentSpec),
    Sequential(SequentialSpec),
    Parallel(ParallelSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub output_key: Option<String>,
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Names of `[[tools]]`, `[[agent_tools]]`, or registry tools.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub max_tool_turns: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    #[serde(default)]
    pub join_policy: Option<JoinPolicy>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// A node tree exposed to agents as a callable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolSpec {
    /// Overrides the wrapped node's description as the tool description.
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides the default `{request: string}` input schema.
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    pub node: NodeSpec,
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(s) => &s.name,
            Self::Sequential(s) => &s.name,
            Self::Parallel(s) => &s.name,
        }
    }

    fn collect_models<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Agent(s) => {
                out.insert(&s.model);
            }
            Self::Sequential(SequentialSpec { children, .. })
            | Self::Parallel(ParallelSpec { children, .. }) => {
                for child in children {
                    child.collect_models(out);
                }
            }
        }
    }
}

impl WorkflowDefinition {
    /// Load a workflow from a TOML file, expanding `${VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TandemError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| TandemError::Config(e.to_string()))
    }

    /// Every model name referenced anywhere in the workflow.
    pub fn model_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.root.collect_models(&mut names);
        for spec in &self.agent_tools {
            spec.node.collect_models(&mut names);
        }
        names
    }

    /// Build the runnable node tree.
    ///
    /// Tool names resolve against, in order of registration: `registry`,
    /// the file's `[[tools]]`, then `[[agent_tools]]` (each of which may
    /// use the ones declared before it).
    pub fn build(&self, models: &ModelRegistry, registry: &ToolRegistry) -> Result<Node> {
        let mut tools: HashMap<String, Tool> = HashMap::new();

        for name in registry.list() {
            if let Some(tool) = registry.get(name) {
                tools.insert(name.to_string(), Tool::Function(tool));
            }
        }

        for config in &self.tools {
            let tool = Tool::function(LookupTool::new(config.clone()));
            insert_unique(&mut tools, tool)?;
        }

        for spec in &self.agent_tools {
            let node = build_node(&spec.node, models, &tools)?;
            let mut agent_tool = AgentTool::new(node)?;
            if let Some(description) = &spec.description {
                agent_tool = agent_tool.with_description(description.clone());
            }
            if let Some(schema) = &spec.input_schema {
                agent_tool = agent_tool.with_input_schema(schema.clone());
            }
            insert_unique(&mut tools, Tool::Agent(agent_tool))?;
        }

        let root = build_node(&self.root, models, &tools)?;
        debug!(root = %root.name(), tools = tools.len(), "Workflow built");
        Ok(root)
    }
}

fn insert_unique(tools: &mut HashMap<String, Tool>, tool: Tool) -> Result<()> {
    let name = tool.name().to_string();
    if tools.contains_key(&name) {
        return Err(TandemError::InvalidWorkflow(format!(
            "tool '{}' is defined more than once",
            name
        )));
    }
    tools.insert(name, tool);
    Ok(())
}

fn build_node(spec: &NodeSpec, models: &ModelRegistry, tools: &HashMap<String, Tool>) -> Result<Node> {
    match spec {
        NodeSpec::Agent(s) => {
            let model = models.resolve(&s.model).ok_or_else(|| {
                TandemError::InvalidWorkflow(format!("{}: unknown model '{}'", s.name, s.model))
            })?;

            let mut node = AgentNode::new(&s.name, model)
                .with_description(&s.description)
                .with_instruction(&s.instruction)
                .with_inputs(s.input_keys.clone());
            if let Some(key) = &s.output_key {
                node = node.with_output_key(key);
            }
            if let Some(turns) = s.max_tool_turns {
                node = node.with_max_tool_turns(turns);
            }
            for name in &s.tools {
                let tool = tools.get(name).ok_or_else(|| {
                    TandemError::InvalidWorkflow(format!("{}: unknown tool '{}'", s.name, name))
                })?;
                node = node.with_tool(tool.clone());
            }
            Ok(node.into())
        }
        NodeSpec::Sequential(s) => {
            let children = s
                .children
                .iter()
                .map(|c| build_node(c, models, tools))
                .collect::<Result<Vec<_>>>()?;
            Ok(SequentialComposite::new(&s.name, children)
                .with_description(&s.description)
                .into())
        }
        NodeSpec::Parallel(s) => {
            let children = s
                .children
                .iter()
                .map(|c| build_node(c, models, tools))
                .collect::<Result<Vec<_>>>()?;
            let mut node = ParallelComposite::new(&s.name, children).with_description(&s.description);
            if let Some(policy) = s.join_policy {
                node = node.with_join_policy(policy);
            }
            if let Some(limit) = s.max_concurrency {
                node = node.with_max_concurrency(limit);
            }
            Ok(node.into())
        }
    }
}
