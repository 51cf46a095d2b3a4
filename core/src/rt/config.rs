use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables for one runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Nested non-tail invocations allowed before `StackOverflow`.
    pub max_call_depth: usize,
    /// Slots reserved up front in the activation stack.
    pub initial_stack_slots: usize,
    /// Longest `__index` / `__newindex` / `__call` handler chain followed.
    pub max_meta_chain: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_call_depth: 200,
            initial_stack_slots: 256,
            max_meta_chain: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_initial_stack_slots(mut self, slots: usize) -> Self {
        self.initial_stack_slots = slots;
        self
    }

    pub fn with_max_meta_chain(mut self, limit: usize) -> Self {
        self.max_meta_chain = limit;
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid runtime config")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render runtime config")
    }
}
