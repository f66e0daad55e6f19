pub mod builtin;
pub mod function;
pub mod registry;

pub use builtin::lookup::{LookupTool, LookupToolConfig};
pub use function::FnTool;
pub use registry::{execute_tool, validate_input, ToolRegistry};
