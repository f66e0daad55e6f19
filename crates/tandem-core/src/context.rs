use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared blackboard threaded through a workflow run.
///
/// Keys are strings; values are JSON so nodes may store text or structured
/// results. The map is ordered by key, which keeps serialized contexts
/// byte-identical across runs with deterministic collaborators.
///
/// Storage is copy-on-write: `fork()` is O(1) and the first write in a fork
/// clones the underlying map. Every context tracks the keys written since it
/// was created or forked, which is what a parallel join merges back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, serde_json::Value>", into = "BTreeMap<String, serde_json::Value>")]
pub struct Context {
    data: Arc<BTreeMap<String, serde_json::Value>>,
    written: Vec<String>,
    version: u64,
}

/// Two parallel branches wrote the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("key '{key}' written by both {first} and {second}")]
pub struct MergeConflict {
    pub key: String,
    pub first: String,
    pub second: String,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Context from initial data. Initial keys do not count as writes.
    pub fn from_map(data: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            data: Arc::new(data),
            written: Vec::new(),
            version: 0,
        }
    }

    /// Get a value by key. `None` means the key is absent.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set a value, overwriting any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if !self.written.contains(&key) {
            self.written.push(key.clone());
        }
        Arc::make_mut(&mut self.data).insert(key, value);
        self.version += 1;
    }

    /// Set a string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, serde_json::Value::String(value.into()));
    }

    /// Independent snapshot sharing storage with `self` until either side
    /// writes. The fork starts with an empty write set.
    pub fn fork(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            written: Vec::new(),
            version: self.version,
        }
    }

    /// Keys written since creation or fork, in first-write order, with their
    /// current values.
    pub fn writes(&self) -> Vec<(String, serde_json::Value)> {
        self.written
            .iter()
            .filter_map(|k| self.data.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Merge the writes of finished branches into this context.
    ///
    /// Branches are applied in the order given (declaration order), so the
    /// result does not depend on which branch finished first. If two branches
    /// wrote the same key nothing is applied and the conflict is returned.
    /// Returns the merged keys in application order.
    pub fn merge(
        &mut self,
        branches: &[(String, Vec<(String, serde_json::Value)>)],
    ) -> std::result::Result<Vec<String>, MergeConflict> {
        // Owners are tracked by position: two branches may share a name.
        let mut owners: HashMap<&str, usize> = HashMap::new();
        for (index, (branch, writes)) in branches.iter().enumerate() {
            for (key, _) in writes {
                if let Some(first) = owners.insert(key.as_str(), index) {
                    if first != index {
                        return Err(MergeConflict {
                            key: key.clone(),
                            first: branches[first].0.clone(),
                            second: branch.clone(),
                        });
                    }
                }
            }
        }

        let mut merged = Vec::new();
        for (_, writes) in branches {
            for (key, value) in writes {
                self.set(key.clone(), value.clone());
                merged.push(key.clone());
            }
        }
        Ok(merged)
    }

    /// Monotonic write counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.data
    }

    /// Flatten to text values: strings as-is, everything else as JSON.
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), render_value(v)))
            .collect()
    }
}

/// Render a context value as prompt text.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Context {
    fn from(data: BTreeMap<String, serde_json::Value>) -> Self {
        Self::from_map(data)
    }
}

impl From<BTreeMap<String, String>> for Context {
    fn from(data: BTreeMap<String, String>) -> Self {
        data.into_iter().collect()
    }
}

impl From<Context> for BTreeMap<String, serde_json::Value> {
    fn from(ctx: Context) -> Self {
        Arc::try_unwrap(ctx.data).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl<K, V> FromIterator<(K, V)> for Context
where
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
