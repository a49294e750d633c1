//! Builder pattern for Orchestrator construction

use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::config::EngineConfig;
use crate::error::{BenchError, BenchResult};
use crate::registry::AdapterRegistry;
use crate::traits::{BenchmarkAdapter, ConnectionLookup, RunRepository, TemplateLookup};

use super::executor::Orchestrator;

/// Builder for creating an Orchestrator with proper configuration
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .grace_period(Duration::from_secs(10))
///     .adapter(Arc::new(SysbenchAdapter::new()))
///     .connections(connections)
///     .templates(templates)
///     .repository(Arc::new(MemoryRunRepository::new()))
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: EngineConfig,
    channel_config: ChannelConfig,
    registry: AdapterRegistry,
    connections: Option<Arc<dyn ConnectionLookup>>,
    templates: Option<Arc<dyn TemplateLookup>>,
    repository: Option<Arc<dyn RunRepository>>,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            channel_config: ChannelConfig::default(),
            registry: AdapterRegistry::new(),
            connections: None,
            templates: None,
            repository: None,
        }
    }

    /// Set the full engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the termination grace period
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    /// Set the minimum free disk space (0 disables the check)
    pub fn min_free_disk_bytes(mut self, bytes: u64) -> Self {
        self.config.min_free_disk_bytes = bytes;
        self
    }

    /// Set the channel configuration
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Register an adapter
    pub fn adapter(mut self, adapter: Arc<dyn BenchmarkAdapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    /// Replace the adapter registry
    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the connection lookup
    pub fn connections(mut self, lookup: Arc<dyn ConnectionLookup>) -> Self {
        self.connections = Some(lookup);
        self
    }

    /// Set the template lookup
    pub fn templates(mut self, lookup: Arc<dyn TemplateLookup>) -> Self {
        self.templates = Some(lookup);
        self
    }

    /// Set the run repository
    pub fn repository(mut self, repository: Arc<dyn RunRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup or the repository is not set, if no adapter
    /// is registered, or if configuration validation fails.
    pub fn build(self) -> BenchResult<Orchestrator> {
        let connections = self
            .connections
            .ok_or_else(|| BenchError::missing_config("connections"))?;

        let templates = self
            .templates
            .ok_or_else(|| BenchError::missing_config("templates"))?;

        let repository = self
            .repository
            .ok_or_else(|| BenchError::missing_config("repository"))?;

        if self.registry.is_empty() {
            return Err(BenchError::missing_config("adapter"));
        }

        self.config.validate()?;

        tracing::debug!(
            tools = ?self.registry.tools(),
            grace_ms = self.config.grace_period.as_millis() as u64,
            "Orchestrator assembled"
        );

        Ok(Orchestrator::new(
            self.config,
            self.channel_config,
            self.registry,
            connections,
            templates,
            repository,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
