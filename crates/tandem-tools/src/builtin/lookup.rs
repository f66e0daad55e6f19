use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::FunctionTool;
use tandem_core::types::{ToolContext, ToolResult};

/// Configuration for a table-backed lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupToolConfig {
    pub name: String,
    pub description: String,
    /// Input field whose value selects the entry.
    pub field: String,
    #[serde(default)]
    pub field_description: Option<String>,
    /// Entry key → result payload.
    pub entries: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive: bool,
    /// Error text for unknown keys; `{value}` is replaced by the requested key.
    #[serde(default)]
    pub missing_message: Option<String>,
}

fn default_case_insensitive() -> bool {
    true
}

/// Answers from a fixed table keyed by one input field.
pub struct LookupTool {
    config: LookupToolConfig,
}

impl LookupTool {
    pub fn new(config: LookupToolConfig) -> Self {
        Self { config }
    }

    fn find(&self, value: &str) -> Option<&serde_json::Value> {
        if self.config.case_insensitive {
            let wanted = value.trim().to_lowercase();
            self.config
                .entries
                .iter()
                .find(|(k, _)| k.to_lowercase() == wanted)
                .map(|(_, v)| v)
        } else {
            self.config.entries.get(value)
        }
    }

    fn missing(&self, value: &str) -> String {
        match &self.config.missing_message {
            Some(template) => template.replace("{value}", value),
            None => format!("No entry for '{}'", value),
        }
    }
}

impl FunctionTool for LookupTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn input_schema(&self) -> serde_json::Value {
        let description = self
            .config
            .field_description
            .clone()
            .unwrap_or_else(|| {
                let keys: Vec<&str> = self.config.entries.keys().map(|k| k.as_str()).collect();
                format!("One of: {}", keys.join(", "))
            });
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.config.field.clone(),
            json!({ "type": "string", "description": description }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": [self.config.field]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let value = input[&self.config.field].as_str().ok_or_else(|| {
                TandemError::ToolValidation(format!("'{}' must be a string", self.config.field))
            })?;

            match self.find(value) {
                Some(entry) => {
                    debug!(tool = %self.config.name, key = %value, "Lookup hit");
                    Ok(ToolResult::success(entry.clone()))
                }
                None => Ok(ToolResult::error(self.missing(value))),
            }
        })
    }
}
