//! sysbench adapter
//!
//! Supports the MySQL (`mysql`) and PostgreSQL (`pgsql`) drivers. Parameters
//! understood directly:
//!
//! | name              | default           |
//! |-------------------|-------------------|
//! | `workload`        | `oltp_read_write` |
//! | `threads`         | 1                 |
//! | `time`            | 60                |
//! | `tables`          | 1                 |
//! | `table_size`      | 10000             |
//! | `report_interval` | 1                 |
//! | `percentile`      | 95                |
//!
//! Any other parameter is passed through as `--name=value`.

mod commands;
mod parser;

pub use commands::{
    builtin_command, create_database_command, database_client, driver, is_plain_identifier,
    phase_command, placeholders, KNOWN_PARAMS,
};
pub use parser::{
    is_diagnostic_line, parse_output, parse_progress_line, parse_summary, SysbenchLineParser,
};

use std::path::PathBuf;
use std::sync::Arc;

use dbbench_core::orchestrator::DURATION_PARAM;
use dbbench_core::process::ProcessStreams;
use dbbench_core::{
    collect, AdapterError, BenchmarkAdapter, BenchmarkConfig, BenchmarkResult, ChannelConfig,
    CommandSpec, DatabaseCreator, Phase, RealtimeCollection,
};

use commands::{number, workload, DEFAULT_TABLES};

/// Tool name templates refer to
pub const TOOL_NAME: &str = "sysbench";

/// Adapter driving the `sysbench` executable
#[derive(Debug, Clone)]
pub struct SysbenchAdapter {
    executable: String,
    create_database: bool,
}

impl Default for SysbenchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SysbenchAdapter {
    /// Adapter using `sysbench` from `PATH`
    pub fn new() -> Self {
        Self {
            executable: TOOL_NAME.to_string(),
            create_database: true,
        }
    }

    /// Use a specific executable for the availability check
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Enable or disable creating the target database before prepare
    pub fn with_database_creation(mut self, enabled: bool) -> Self {
        self.create_database = enabled;
        self
    }
}

impl BenchmarkAdapter for SysbenchAdapter {
    fn tool_name(&self) -> &str {
        TOOL_NAME
    }

    fn validate_config(&self, config: &BenchmarkConfig) -> Result<(), AdapterError> {
        let workload = workload(config);
        if workload
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')))
        {
            return Err(AdapterError::InvalidConfig(format!(
                "workload {workload:?} is not a sysbench test name or script path"
            )));
        }

        for name in ["threads", "tables", "table_size", "report_interval"] {
            if let Some(value) = config.parameter(name) {
                match config.parameter_u64(name) {
                    Some(n) if n >= 1 => {}
                    _ => {
                        return Err(AdapterError::InvalidConfig(format!(
                            "{name} must be a positive integer, got {value}"
                        )))
                    }
                }
            }
        }

        if config.parameter(DURATION_PARAM).is_some()
            && config.parameter_u64(DURATION_PARAM).is_none()
        {
            return Err(AdapterError::InvalidConfig(format!(
                "{DURATION_PARAM} must be a non-negative integer number of seconds"
            )));
        }

        if let Some(p) = config.parameter_u64("percentile") {
            if !(1..=100).contains(&p) {
                return Err(AdapterError::InvalidConfig(format!(
                    "percentile must be between 1 and 100, got {p}"
                )));
            }
        }

        if config.connection.database.trim().is_empty() {
            return Err(AdapterError::InvalidConfig("database name is empty".into()));
        }

        Ok(())
    }

    fn build_prepare_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError> {
        phase_command(config, Phase::Prepare)
    }

    fn build_run_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError> {
        phase_command(config, Phase::Run)
    }

    fn build_cleanup_command(&self, config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError> {
        phase_command(config, Phase::Cleanup)
    }

    fn start_realtime_collection(
        &self,
        streams: ProcessStreams,
        channels: &ChannelConfig,
    ) -> RealtimeCollection {
        collect(streams, Arc::new(SysbenchLineParser), channels)
    }

    fn parse_final_results(&self, output: &str) -> Result<BenchmarkResult, AdapterError> {
        Ok(parse_output(output))
    }

    fn expected_tables(&self, config: &BenchmarkConfig) -> Vec<String> {
        (1..=number(config, "tables", DEFAULT_TABLES))
            .map(|i| format!("sbtest{i}"))
            .collect()
    }

    fn check_tool_available(&self) -> Result<PathBuf, AdapterError> {
        which::which(&self.executable)
            .map_err(|e| AdapterError::ToolUnavailable(format!("{}: {e}", self.executable)))
    }

    fn as_database_creator(&self) -> Option<&dyn DatabaseCreator> {
        self.create_database.then_some(self as &dyn DatabaseCreator)
    }
}

impl DatabaseCreator for SysbenchAdapter {
    fn build_create_database_command(
        &self,
        config: &BenchmarkConfig,
    ) -> Result<Option<CommandSpec>, AdapterError> {
        let client = database_client(config.connection.kind);
        if which::which(client).is_err() {
            tracing::debug!(client, "Database client not installed, skipping database creation");
            return Ok(None);
        }
        create_database_command(config).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbbench_core::{
        Classification, ConnectionParams, DatabaseKind, ExecutionOptions, FailureClassifier, RunId,
        Template,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> BenchmarkConfig {
        BenchmarkConfig {
            run_id: RunId::from("r1"),
            template: Template::new("oltp", TOOL_NAME),
            connection: ConnectionParams {
                kind: DatabaseKind::Mysql,
                host: "127.0.0.1".into(),
                port: 3306,
                user: "bench".into(),
                password: None,
                database: "sbtest".into(),
            },
            parameters: BTreeMap::new(),
            options: ExecutionOptions::default(),
            work_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(SysbenchAdapter::new().validate_config(&config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let adapter = SysbenchAdapter::new();
        for (name, value) in [
            ("threads", json!(0)),
            ("tables", json!("many")),
            ("time", json!(-5)),
            ("percentile", json!(101)),
            ("workload", json!("oltp; rm -rf /")),
        ] {
            let mut cfg = config();
            cfg.parameters.insert(name.into(), value);
            assert!(
                matches!(adapter.validate_config(&cfg), Err(AdapterError::InvalidConfig(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_time_is_valid() {
        let mut cfg = config();
        cfg.parameters.insert("time".into(), json!(0));
        assert!(SysbenchAdapter::new().validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_expected_tables() {
        let mut cfg = config();
        cfg.parameters.insert("tables".into(), json!(3));
        assert_eq!(
            SysbenchAdapter::new().expected_tables(&cfg),
            vec!["sbtest1", "sbtest2", "sbtest3"]
        );
    }

    #[test]
    fn test_missing_executable_is_reported() {
        let adapter = SysbenchAdapter::new().with_executable("definitely-not-sysbench-xyz");
        assert!(matches!(
            adapter.check_tool_available(),
            Err(AdapterError::ToolUnavailable(_))
        ));
    }

    #[test]
    fn test_database_creation_can_be_disabled() {
        assert!(SysbenchAdapter::new().as_database_creator().is_some());
        assert!(SysbenchAdapter::new()
            .with_database_creation(false)
            .as_database_creator()
            .is_none());
    }

    #[test]
    fn test_classifier_on_sysbench_messages() {
        let adapter = SysbenchAdapter::new();
        let classifier = adapter.failure_classifier();

        let prepare = "FATAL: MySQL error: 1050 \"Table 'sbtest1' already exists\"";
        assert!(matches!(
            classifier.classify(Phase::Prepare, prepare),
            Classification::BenignContinue(_)
        ));

        let run = "FATAL: MySQL error: 1146 \"Table 'sbtest.sbtest1' doesn't exist\"";
        match classifier.classify(Phase::Run, run) {
            Classification::Fatal(hint) => {
                assert!(hint.message(Phase::Run, run).contains("run Prepare first"))
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_results_never_fails() {
        let result = SysbenchAdapter::new().parse_final_results("").unwrap();
        assert_eq!(result, BenchmarkResult::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_realtime_collection_feeds_final_parse() {
        use dbbench_core::process::ProcessSupervisor;
        use std::time::Duration;

        let script = "echo '[ 1s ] thds: 2 tps: 100.00 qps: 2000.00 (r/w/o: 1400.00/400.00/200.00) lat (ms,95%): 12.08 err/s: 0.00 reconn/s: 0.00'; \
                      echo 'FATAL: transient hiccup'; \
                      echo '[ 2s ] thds: 2 tps: 120.00 qps: 2400.00 (r/w/o: 1680.00/480.00/240.00) lat (ms,95%): 11.65 err/s: 0.00 reconn/s: 0.00'; \
                      echo '    transactions:                        220    (110.00 per sec.)'; \
                      echo '    total time:                          2.0004s'";
        let spec = CommandSpec::new(format!("sh -c {}", dbbench_core::quote_arg(script)));
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1), Duration::from_millis(50));
        let (mut child, streams) = supervisor
            .start(&RunId::from("r1"), Phase::Run, &spec)
            .unwrap();

        let adapter = SysbenchAdapter::new();
        let mut collection = adapter.start_realtime_collection(streams, &ChannelConfig::default());
        (&mut collection.completion).await.unwrap();
        assert!(child.wait().await.unwrap().success());

        let mut seconds = Vec::new();
        while let Ok(sample) = collection.samples.try_recv() {
            seconds.push(sample.second);
        }
        assert_eq!(seconds, vec![1, 2]);
        assert_eq!(
            collection.errors.try_recv().unwrap(),
            "FATAL: transient hiccup"
        );

        let result = adapter.parse_final_results(&collection.output()).unwrap();
        assert_eq!(result.time_series.len(), 2);
        assert_eq!(result.sql.transactions, 220);
        assert!((result.tps - 110.0).abs() < 1e-9);
    }
}
