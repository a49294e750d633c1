//! Adapter registry keyed by tool name

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BenchError, BenchResult};
use crate::traits::BenchmarkAdapter;

/// Tool name -> adapter
///
/// Populated while the engine is assembled; read-only afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn BenchmarkAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its tool name, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn BenchmarkAdapter>) {
        let name = adapter.tool_name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!(tool = %name, "Replaced previously registered adapter");
        }
    }

    /// Builder-style registration
    pub fn with(mut self, adapter: Arc<dyn BenchmarkAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter for a tool
    pub fn get(&self, tool: &str) -> BenchResult<Arc<dyn BenchmarkAdapter>> {
        self.adapters
            .get(tool)
            .cloned()
            .ok_or_else(|| BenchError::not_found("adapter", tool))
    }

    /// Registered tool names, sorted
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        tools.sort_unstable();
        tools
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("tools", &self.tools())
            .finish()
    }
}
