pub mod definition;
pub mod graph;
pub mod runner;
pub mod scope;
pub mod template;
pub mod tool;
pub mod validate;

pub use definition::{ModelRegistry, NodeSpec, WorkflowDefinition};
pub use graph::{AgentNode, Node, ParallelComposite, SequentialComposite};
pub use runner::{BranchReport, FailureReport, RunOutput, RunResult, Runner};
pub use scope::RunScope;
pub use template::Template;
pub use tool::{AgentTool, Tool};
pub use validate::{validate, ValidationReport};
