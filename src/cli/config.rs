//! Configuration file loading and the static lookups built from it

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dbbench_core::{
    AdapterRegistry, BenchmarkConfig, BenchmarkTask, Connection, ConnectionError,
    ConnectionLookup, ConnectionParams, Credentialed, EngineConfig, LookupError, RunId, Template,
    TemplateLookup, Testable,
};
use serde::Deserialize;

/// Time allowed for the connectivity probe
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection entry of the config file
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEntry {
    /// Reference used by tasks
    pub id: String,
    /// Coordinates and credentials
    #[serde(flatten)]
    pub params: ConnectionParams,
    /// Environment variable holding the password, read at load time
    #[serde(default)]
    pub password_env: Option<String>,
}

/// Top-level config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Engine settings
    pub engine: EngineConfig,
    /// Target databases
    pub connections: Vec<ConnectionEntry>,
    /// Tool invocations
    pub templates: Vec<Template>,
    /// Benchmarks that can be run by id
    pub tasks: Vec<BenchmarkTask>,
}

impl FileConfig {
    /// Read and parse a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: FileConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.resolve_passwords()?;
        Ok(config)
    }

    fn resolve_passwords(&mut self) -> Result<()> {
        for entry in &mut self.connections {
            if let Some(var) = &entry.password_env {
                let password = std::env::var(var).with_context(|| {
                    format!("connection {}: environment variable {var} is not set", entry.id)
                })?;
                entry.params.password = Some(password);
            }
        }
        Ok(())
    }

    /// Task by id
    pub fn task(&self, id: &str) -> Result<&BenchmarkTask> {
        self.tasks
            .iter()
            .find(|t| t.id.0 == id)
            .with_context(|| format!("task {id} not found in config"))
    }

    /// Check every task resolves and passes its adapter's validation
    ///
    /// Returns one line per checked task.
    pub fn validate(&self, registry: &AdapterRegistry) -> Result<Vec<String>> {
        self.engine.validate().context("invalid engine config")?;

        let mut seen = HashSet::new();
        for entry in &self.connections {
            if !seen.insert(entry.id.as_str()) {
                bail!("duplicate connection id {}", entry.id);
            }
        }

        let mut report = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            task.validate()
                .with_context(|| format!("task {}", task.id))?;
            let connection = self
                .connections
                .iter()
                .find(|c| c.id == task.connection_ref)
                .with_context(|| {
                    format!("task {}: unknown connection {}", task.id, task.connection_ref)
                })?;
            let template = self
                .templates
                .iter()
                .find(|t| t.id == task.template_ref)
                .with_context(|| {
                    format!("task {}: unknown template {}", task.id, task.template_ref)
                })?;
            if !template.supports(connection.params.kind) {
                bail!(
                    "task {}: template {} does not support {} connections",
                    task.id,
                    template.id,
                    connection.params.kind
                );
            }

            let adapter = registry
                .get(&template.tool)
                .with_context(|| format!("task {}", task.id))?;
            let parameters = template
                .resolve_parameters(&task.parameters)
                .with_context(|| format!("task {}", task.id))?;
            let config = BenchmarkConfig {
                run_id: RunId::from("validate"),
                template: template.clone(),
                connection: connection.params.clone(),
                parameters,
                options: task.options.clone(),
                work_dir: self.engine.scratch_root(),
            };
            adapter
                .validate_config(&config)
                .with_context(|| format!("task {}", task.id))?;

            report.push(format!(
                "{}: {} via {} on {}",
                task.id, template.id, template.tool, connection.id
            ));
        }
        Ok(report)
    }

    /// Lookups serving this file's connections and templates
    pub fn lookups(&self) -> StaticLookups {
        StaticLookups {
            connections: self
                .connections
                .iter()
                .map(|entry| {
                    let connection: Arc<dyn Connection> = Arc::new(TcpConnection {
                        id: entry.id.clone(),
                        params: entry.params.clone(),
                    });
                    (entry.id.clone(), connection)
                })
                .collect(),
            templates: self
                .templates
                .iter()
                .map(|t| (t.id.clone(), t.clone()))
                .collect(),
        }
    }
}

/// Lookups over a fixed set of connections and templates
#[derive(Clone, Default)]
pub struct StaticLookups {
    connections: HashMap<String, Arc<dyn Connection>>,
    templates: HashMap<String, Template>,
}

#[async_trait]
impl ConnectionLookup for StaticLookups {
    async fn connection(&self, id: &str) -> Result<Arc<dyn Connection>, LookupError> {
        self.connections
            .get(id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                what: "connection",
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl TemplateLookup for StaticLookups {
    async fn template(&self, id: &str) -> Result<Template, LookupError> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                what: "template",
                id: id.to_string(),
            })
    }
}

/// Connection probed with a plain TCP connect
#[derive(Debug)]
pub struct TcpConnection {
    id: String,
    params: ConnectionParams,
}

#[async_trait]
impl Testable for TcpConnection {
    async fn test_connection(&self) -> Result<(), ConnectionError> {
        let addr = (self.params.host.as_str(), self.params.port);
        match tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Unreachable(format!(
                "{}:{}: {e}",
                self.params.host, self.params.port
            ))),
            Err(_) => Err(ConnectionError::Unreachable(format!(
                "{}:{}: no answer within {}s",
                self.params.host,
                self.params.port,
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }
}

impl Credentialed for TcpConnection {
    fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "engine": {"grace_period": 5000, "min_free_disk_bytes": 0},
        "connections": [
            {"id": "primary", "kind": "mysql", "host": "127.0.0.1", "port": 1,
             "user": "bench", "password": "pw", "database": "sbtest"}
        ],
        "templates": [
            {"id": "oltp", "tool": "sysbench", "database_kinds": ["mysql"],
             "parameters": [{"name": "threads", "type": "integer", "default": 4, "min": 1}]}
        ],
        "tasks": [
            {"id": "smoke", "connection_ref": "primary", "template_ref": "oltp",
             "parameters": {"time": 10}}
        ]
    }"#;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_and_validate() {
        let file = write_config(CONFIG);
        let config = FileConfig::load(file.path()).unwrap();

        assert_eq!(config.engine.grace_period, Duration::from_secs(5));
        assert_eq!(config.connections[0].params.password.as_deref(), Some("pw"));
        assert!(config.task("smoke").is_ok());
        assert!(config.task("missing").is_err());

        let report = config.validate(&dbbench_adapters::default_registry()).unwrap();
        assert_eq!(report, vec!["smoke: oltp via sysbench on primary"]);
    }

    #[test]
    fn test_validate_reports_unknown_refs() {
        let body = CONFIG.replace("\"template_ref\": \"oltp\"", "\"template_ref\": \"tpcc\"");
        let config = FileConfig::load(write_config(&body).path()).unwrap();
        let err = config
            .validate(&dbbench_adapters::default_registry())
            .unwrap_err();
        assert!(err.to_string().contains("unknown template tpcc"));
    }

    #[test]
    fn test_validate_runs_adapter_checks() {
        let body = CONFIG.replace("{\"time\": 10}", "{\"time\": 10, \"table_size\": 0}");
        let config = FileConfig::load(write_config(&body).path()).unwrap();
        let err = config
            .validate(&dbbench_adapters::default_registry())
            .unwrap_err();
        assert!(format!("{err:#}").contains("table_size"));
    }

    #[test]
    fn test_missing_password_env_is_an_error() {
        let body = CONFIG.replace(
            "\"password\": \"pw\"",
            "\"password_env\": \"DBBENCH_TEST_UNSET_PASSWORD_VAR\"",
        );
        let err = FileConfig::load(write_config(&body).path()).unwrap_err();
        assert!(err.to_string().contains("DBBENCH_TEST_UNSET_PASSWORD_VAR"));
    }

    #[tokio::test]
    async fn test_lookups_resolve_config_entries() {
        let config = FileConfig::load(write_config(CONFIG).path()).unwrap();
        let lookups = config.lookups();

        let connection = lookups.connection("primary").await.unwrap();
        assert_eq!(connection.id(), "primary");
        assert_eq!(connection.params().port, 1);
        assert!(matches!(
            lookups.connection("replica").await,
            Err(LookupError::NotFound { what: "connection", .. })
        ));
        assert_eq!(lookups.template("oltp").await.unwrap().tool, "sysbench");
    }

    #[tokio::test]
    async fn test_tcp_probe_reports_refused_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connection = TcpConnection {
            id: "closed".into(),
            params: ConnectionParams {
                kind: dbbench_core::DatabaseKind::Mysql,
                host: "127.0.0.1".into(),
                port,
                user: "bench".into(),
                password: None,
                database: "sbtest".into(),
            },
        };
        assert!(matches!(
            connection.test_connection().await,
            Err(ConnectionError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_probe_accepts_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection = TcpConnection {
            id: "open".into(),
            params: ConnectionParams {
                kind: dbbench_core::DatabaseKind::Postgresql,
                host: "127.0.0.1".into(),
                port,
                user: "bench".into(),
                password: None,
                database: "sbtest".into(),
            },
        };
        assert!(connection.test_connection().await.is_ok());
    }
}
