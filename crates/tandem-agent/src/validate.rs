//! Static checks on a node tree before it runs.
//!
//! Structural problems that would make a run ill-defined are errors:
//! duplicate sibling names, duplicate tool names on one agent, and two
//! parallel branches declaring the same output key. Data-flow gaps (an
//! instruction referencing a key nothing upstream provides) are warnings,
//! since tools can write keys at run time.

use std::collections::{BTreeMap, BTreeSet};

use tandem_core::error::{Result, TandemError};

use crate::graph::Node;
use crate::tool::Tool;

/// Non-fatal findings from `validate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Validate `root`, assuming `initial_keys` are present when the run starts.
pub fn validate<'a>(
    root: &Node,
    initial_keys: impl IntoIterator<Item = &'a str>,
) -> Result<ValidationReport> {
    let mut available: BTreeSet<String> = initial_keys.into_iter().map(String::from).collect();
    let mut report = ValidationReport::default();
    walk(root, &mut available, &mut report)?;
    Ok(report)
}

fn walk(node: &Node, available: &mut BTreeSet<String>, report: &mut ValidationReport) -> Result<()> {
    match node {
        Node::Agent(agent) => {
            for key in agent.instruction().required_keys() {
                if !available.contains(key) {
                    report.warnings.push(format!(
                        "{}: instruction references '{}' which nothing upstream provides",
                        agent.name(),
                        key
                    ));
                }
            }
            for key in agent.input_keys() {
                if !available.contains(key) {
                    report.warnings.push(format!(
                        "{}: input key '{}' is not provided upstream",
                        agent.name(),
                        key
                    ));
                }
            }

            let mut tool_names = BTreeSet::new();
            for tool in agent.tools() {
                if !tool_names.insert(tool.name()) {
                    return Err(TandemError::InvalidWorkflow(format!(
                        "{}: tool '{}' is attached twice",
                        agent.name(),
                        tool.name()
                    )));
                }
                if let Tool::Agent(agent_tool) = tool {
                    // A nested run sees the caller's context plus the call arguments.
                    let mut nested = available.clone();
                    if let Some(props) = agent_tool.input_schema()["properties"].as_object() {
                        nested.extend(props.keys().cloned());
                    }
                    walk(agent_tool.node(), &mut nested, report)?;
                }
            }

            if let Some(key) = agent.output_key() {
                available.insert(key.to_string());
            }
        }
        Node::Sequential(seq) => {
            check_unique_children(seq.name(), seq.children())?;
            for child in seq.children() {
                walk(child, available, report)?;
            }
        }
        Node::Parallel(par) => {
            check_unique_children(par.name(), par.children())?;

            let mut owners: BTreeMap<String, &str> = BTreeMap::new();
            for child in par.children() {
                let mut branch = available.clone();
                walk(child, &mut branch, report)?;

                for key in child.output_keys() {
                    if let Some(first) = owners.get(&key) {
                        return Err(TandemError::KeyConflict {
                            node: par.name().to_string(),
                            key,
                            first: first.to_string(),
                            second: child.name().to_string(),
                        });
                    }
                    owners.insert(key, child.name());
                }
            }
            available.extend(owners.into_keys());
        }
    }
    Ok(())
}

fn check_unique_children(parent: &str, children: &[Node]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for child in children {
        if !seen.insert(child.name()) {
            return Err(TandemError::InvalidWorkflow(format!(
                "{}: two children are named '{}'",
                parent,
                child.name()
            )));
        }
    }
    Ok(())
}
