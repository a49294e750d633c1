//! Core traits for adapters, connections, lookups and persistence
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (adapters/, storage/, the binary).

use crate::channel::ChannelConfig;
use crate::classify::{DefaultClassifier, FailureClassifier};
use crate::collector::RealtimeCollection;
use crate::metrics::{BenchmarkResult, MetricSample};
use crate::process::ProcessStreams;
use crate::run::{ExecutionOptions, LogEntry, Run, RunFilter, RunId};
use crate::state::{RunState, StateError};
use crate::template::{DatabaseKind, Template};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Benchmark Adapter Trait
// ============================================================================

/// A built command: line to split, environment overrides and working directory
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Full command line, split with shell-like quoting rules
    pub command_line: String,
    /// Environment variables added to the inherited environment
    pub env: BTreeMap<String, String>,
    /// Working directory for the process
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Spec with no environment overrides
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            env: BTreeMap::new(),
            work_dir: None,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    /// Set the working directory
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Command line with secrets masked, for logs
    pub fn redacted(&self) -> String {
        crate::process::redact_command_line(&self.command_line)
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env: BTreeMap<&str, &str> = self
            .env
            .iter()
            .map(|(k, v)| {
                let shown = if crate::process::is_secret_key(k) {
                    crate::process::REDACTED
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("CommandSpec")
            .field("command_line", &self.redacted())
            .field("env", &env)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

/// Everything an adapter needs to build commands for one run
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Run being executed
    pub run_id: RunId,
    /// Resolved template
    pub template: Template,
    /// Target database
    pub connection: ConnectionParams,
    /// Template defaults merged with task overrides
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Task execution switches
    pub options: ExecutionOptions,
    /// Per-run scratch directory
    pub work_dir: PathBuf,
}

impl BenchmarkConfig {
    /// Parameter value by name
    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }

    /// Integer parameter, accepting numeric strings
    pub fn parameter_u64(&self, name: &str) -> Option<u64> {
        match self.parameters.get(name)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Benchmark tool strategy
///
/// Implementations translate a [`BenchmarkConfig`] into per-phase commands and
/// interpret the tool's output. Optional capabilities are exposed through
/// defaulted methods.
pub trait BenchmarkAdapter: Send + Sync {
    /// Tool identifier (e.g., "sysbench"); also the executable looked up on PATH
    fn tool_name(&self) -> &str;

    /// Reject configurations the tool cannot run
    fn validate_config(&self, config: &BenchmarkConfig) -> Result<(), AdapterError>;

    /// Command for the prepare phase
    fn build_prepare_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError>;

    /// Command for the run phase
    fn build_run_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError>;

    /// Command for the cleanup phase
    fn build_cleanup_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError>;

    /// Begin consuming a live run-phase process's output
    fn start_realtime_collection(
        &self,
        streams: ProcessStreams,
        channels: &ChannelConfig,
    ) -> RealtimeCollection;

    /// Parse the buffered run-phase output into the final result
    fn parse_final_results(&self, output: &str) -> Result<BenchmarkResult, AdapterError>;

    /// Maps failure output to an outcome
    fn failure_classifier(&self) -> &dyn FailureClassifier {
        &DefaultClassifier
    }

    /// Tables the prepare phase creates, used to explain run failures
    fn expected_tables(&self, _config: &BenchmarkConfig) -> Vec<String> {
        Vec::new()
    }

    /// Locate the tool executable
    fn check_tool_available(&self) -> Result<PathBuf, AdapterError> {
        which::which(self.tool_name())
            .map_err(|e| AdapterError::ToolUnavailable(format!("{}: {e}", self.tool_name())))
    }

    /// Optional database creation capability
    fn as_database_creator(&self) -> Option<&dyn DatabaseCreator> {
        None
    }
}

/// Adapters able to create the target database before prepare
pub trait DatabaseCreator: Send + Sync {
    /// Command creating the database, or `None` when nothing needs creating
    fn build_create_database_command(
        &self,
        config: &BenchmarkConfig,
    ) -> Result<Option<CommandSpec>, AdapterError>;
}

/// Adapter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Configuration the tool cannot run
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Database kind not supported by the tool
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// Executable not found
    #[error("Tool not available: {0}")]
    ToolUnavailable(String),

    /// Command template could not be rendered
    #[error("Command template error: {0}")]
    Template(String),

    /// Output could not be interpreted
    #[error("Output parse error: {0}")]
    Parse(String),
}

impl From<crate::template::TemplateError> for AdapterError {
    fn from(err: crate::template::TemplateError) -> Self {
        AdapterError::Template(err.to_string())
    }
}

impl From<AdapterError> for crate::error::BenchError {
    fn from(err: AdapterError) -> Self {
        use crate::error::BenchError;
        match err {
            AdapterError::InvalidConfig(_)
            | AdapterError::UnsupportedDatabase(_)
            | AdapterError::ToolUnavailable(_) => BenchError::pre_check(err.to_string()),
            AdapterError::Template(_) | AdapterError::Parse(_) => BenchError::adapter(err.to_string()),
        }
    }
}

// ============================================================================
// Connections
// ============================================================================

/// Target database coordinates and credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Database engine
    pub kind: DatabaseKind,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Login password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database (schema) name
    pub database: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| crate::process::REDACTED))
            .field("database", &self.database)
            .finish()
    }
}

/// Live connectivity probe
#[async_trait]
pub trait Testable: Send + Sync {
    /// Succeeds when the target accepts connections
    async fn test_connection(&self) -> Result<(), ConnectionError>;
}

/// Access to connection parameters and credentials
pub trait Credentialed: Send + Sync {
    /// Coordinates and credentials
    fn params(&self) -> &ConnectionParams;
}

/// Optional schema inspection
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    /// Subset of `tables` present in the target database
    async fn existing_tables(&self, tables: &[String]) -> Result<Vec<String>, ConnectionError>;
}

/// A resolved target database
pub trait Connection: Testable + Credentialed {
    /// Connection identity
    fn id(&self) -> &str;

    /// Schema inspection capability, when the connection offers one
    fn schema_inspector(&self) -> Option<&dyn SchemaInspector> {
        None
    }
}

/// Connection errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Target not reachable
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Inspection query failed
    #[error("Query failed: {0}")]
    Query(String),
}

// ============================================================================
// Lookups
// ============================================================================

/// Resolves connection references
#[async_trait]
pub trait ConnectionLookup: Send + Sync {
    /// Connection by id
    async fn connection(&self, id: &str) -> Result<Arc<dyn Connection>, LookupError>;
}

/// Resolves template references
#[async_trait]
pub trait TemplateLookup: Send + Sync {
    /// Template by id
    async fn template(&self, id: &str) -> Result<Template, LookupError>;
}

/// Lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Unknown reference
    #[error("{what} not found: {id}")]
    NotFound {
        /// Kind of object
        what: &'static str,
        /// Reference
        id: String,
    },

    /// Backend failure
    #[error("Lookup failed: {0}")]
    Backend(String),
}

impl From<LookupError> for crate::error::BenchError {
    fn from(err: LookupError) -> Self {
        use crate::error::{BenchError, ErrorKind};
        match err {
            LookupError::NotFound { what, id } => BenchError::not_found(what, id),
            LookupError::Backend(msg) => BenchError::new(ErrorKind::Repository, msg),
        }
    }
}

// ============================================================================
// Run Repository
// ============================================================================

/// Persistence boundary for runs, samples and logs
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert or replace a run
    async fn save(&self, run: &Run) -> Result<(), RepositoryError>;

    /// Run by id
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError>;

    /// Runs matching the filter, newest first
    async fn find_all(&self, filter: &RunFilter) -> Result<Vec<Run>, RepositoryError>;

    /// Move a stored run to `state`, enforcing the transition table
    async fn update_state(&self, id: &RunId, state: RunState) -> Result<Run, RepositoryError>;

    /// Append a metric sample
    async fn save_metric_sample(
        &self,
        id: &RunId,
        sample: &MetricSample,
    ) -> Result<(), RepositoryError>;

    /// Append a log entry
    async fn save_log_entry(&self, id: &RunId, entry: &LogEntry) -> Result<(), RepositoryError>;

    /// Remove a run with its samples and logs
    async fn delete(&self, id: &RunId) -> Result<(), RepositoryError>;

    /// Samples of a run in arrival order
    async fn metric_samples(&self, id: &RunId) -> Result<Vec<MetricSample>, RepositoryError>;

    /// Log entries of a run in arrival order
    async fn log_entries(&self, id: &RunId) -> Result<Vec<LogEntry>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Unknown run
    #[error("run not found: {0}")]
    NotFound(RunId),

    /// Rejected state change
    #[error(transparent)]
    InvalidTransition(#[from] StateError),

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for crate::error::BenchError {
    fn from(err: RepositoryError) -> Self {
        use crate::error::BenchError;
        match err {
            RepositoryError::NotFound(id) => BenchError::not_found("run", id),
            RepositoryError::InvalidTransition(e) => e.into(),
            RepositoryError::Storage(msg) => BenchError::repository(msg),
        }
    }
}
