//! Runs, tasks and per-run log entries

use crate::metrics::BenchmarkResult;
use crate::state::{RunState, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Opaque unique run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Caller-supplied task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Per-task execution switches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Do not run the prepare command
    pub skip_prepare: bool,
    /// Do not run the cleanup command after the run phase
    pub skip_cleanup: bool,
    /// Length of the warm-up window at the start of the run phase
    pub warmup_seconds: u64,
    /// Deadline for prepare / create-database
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub prepare_timeout: Option<Duration>,
    /// Deadline for the run phase
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<Duration>,
    /// Deadline for cleanup
    #[serde(with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub cleanup_timeout: Option<Duration>,
    /// Build and log commands without executing them
    pub dry_run: bool,
}

/// Serialize optional durations as whole seconds
mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Serialize optional time deltas as nanoseconds
mod opt_nanos {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<chrono::Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value.and_then(|d| d.num_nanoseconds()) {
            Some(nanos) => s.serialize_some(&nanos),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<chrono::Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(d)?.map(chrono::Duration::nanoseconds))
    }
}

/// A submitted benchmark request; immutable once submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTask {
    /// Task identity
    pub id: TaskId,
    /// Connection reference resolved through the connection lookup
    pub connection_ref: String,
    /// Template reference resolved through the template lookup
    pub template_ref: String,
    /// Parameter overrides applied on top of template defaults
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Execution switches
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BenchmarkTask {
    /// Create a task with no overrides
    pub fn new(
        id: impl Into<String>,
        connection_ref: impl Into<String>,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId(id.into()),
            connection_ref: connection_ref.into(),
            template_ref: template_ref.into(),
            parameters: BTreeMap::new(),
            options: ExecutionOptions::default(),
            tags: Vec::new(),
        }
    }

    /// Add a parameter override
    pub fn with_parameter(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }

    /// Replace the execution options
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the identity fields are present
    pub fn validate(&self) -> Result<(), crate::error::BenchError> {
        use crate::error::BenchError;

        if self.id.0.trim().is_empty() {
            return Err(BenchError::validation("task id must not be empty"));
        }
        if self.connection_ref.trim().is_empty() {
            return Err(BenchError::validation("connection reference must not be empty"));
        }
        if self.template_ref.trim().is_empty() {
            return Err(BenchError::validation("template reference must not be empty"));
        }
        Ok(())
    }
}

/// One execution instance of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identity
    pub id: RunId,
    /// Back-reference to the task
    pub task_id: TaskId,
    /// Current lifecycle state
    pub state: RunState,
    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Set on entering `running`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Set on entering a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// `completed_at - started_at`, set once both are known
    #[serde(default, with = "opt_nanos", skip_serializing_if = "Option::is_none")]
    pub duration: Option<chrono::Duration>,
    /// Parsed result, only on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BenchmarkResult>,
    /// Failure explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Private scratch directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Tags copied from the task
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Run {
    /// Create a `pending` run for a task
    pub fn new(task: &BenchmarkTask) -> Self {
        Self {
            id: RunId::generate(),
            task_id: task.id.clone(),
            state: RunState::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            result: None,
            error_message: None,
            work_dir: None,
            tags: task.tags.clone(),
        }
    }

    /// Move to `to` if the table allows it, maintaining the timestamps
    pub fn transition_to(
        &mut self,
        to: RunState,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StateError> {
        self.state = self.state.transition(to)?;
        if to == RunState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
            self.duration = match (self.started_at, self.completed_at) {
                (Some(start), Some(end)) => Some(end - start),
                _ => None,
            };
        }
        Ok(())
    }

    /// Whether the run reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Source of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    /// Process standard output
    Stdout,
    /// Process standard error
    Stderr,
    /// Engine progress message
    Info,
    /// Engine error message
    Error,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
            LogStream::Info => write!(f, "info"),
            LogStream::Error => write!(f, "error"),
        }
    }
}

/// One append-only log line of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was recorded
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Stream tag
    pub stream: LogStream,
    /// Line content
    pub content: String,
}

impl LogEntry {
    /// Create an entry stamped now
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            stream,
            content: content.into(),
        }
    }

    /// Engine progress line
    pub fn info(content: impl Into<String>) -> Self {
        Self::new(LogStream::Info, content)
    }

    /// Engine error line
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(LogStream::Error, content)
    }
}

/// Lifecycle phase a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Best-effort target database creation
    CreateDatabase,
    /// Data set preparation
    Prepare,
    /// Metrics-bearing run, including the warm-up window
    Run,
    /// Data set removal
    Cleanup,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::CreateDatabase => write!(f, "create_database"),
            Phase::Prepare => write!(f, "prepare"),
            Phase::Run => write!(f, "run"),
            Phase::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Query options for listing runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunFilter {
    /// Only runs in this state
    pub state: Option<RunState>,
    /// Only runs of this task
    pub task_id: Option<TaskId>,
    /// Only runs carrying this tag
    pub tag: Option<String>,
    /// Skip this many runs (newest first)
    pub offset: usize,
    /// Return at most this many runs
    pub limit: Option<usize>,
}

impl RunFilter {
    /// Whether a run satisfies the predicates (paging is applied separately)
    pub fn matches(&self, run: &Run) -> bool {
        self.state.map_or(true, |s| run.state == s)
            && self.task_id.as_ref().map_or(true, |t| &run.task_id == t)
            && self.tag.as_ref().map_or(true, |t| run.tags.contains(t))
    }
}
