//! Sysbench command lines
//!
//! Templates may carry their own `{placeholder}` patterns per phase; phases
//! without one use the built-in command line.

use std::collections::BTreeMap;

use dbbench_core::orchestrator::{DURATION_PARAM, PREPARE_ONLY_MARKER};
use dbbench_core::{
    quote_arg, render, value_to_string, AdapterError, BenchmarkConfig, CommandSpec,
    ConnectionParams, DatabaseKind, Phase,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Parameters with a dedicated place in the built-in command line
pub const KNOWN_PARAMS: &[&str] = &[
    "workload",
    "threads",
    DURATION_PARAM,
    "tables",
    "table_size",
    "report_interval",
    "percentile",
];

pub(crate) const DEFAULT_WORKLOAD: &str = "oltp_read_write";
pub(crate) const DEFAULT_THREADS: u64 = 1;
pub(crate) const DEFAULT_TIME: u64 = 60;
pub(crate) const DEFAULT_TABLES: u64 = 1;
pub(crate) const DEFAULT_TABLE_SIZE: u64 = 10_000;
pub(crate) const DEFAULT_REPORT_INTERVAL: u64 = 1;
pub(crate) const DEFAULT_PERCENTILE: u64 = 95;

static EXTRA_FLAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid flag pattern"));
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$-]*$").expect("valid identifier pattern"));

/// sysbench `--db-driver` value
pub fn driver(kind: DatabaseKind) -> &'static str {
    match kind {
        DatabaseKind::Mysql => "mysql",
        DatabaseKind::Postgresql => "pgsql",
    }
}

pub(crate) fn workload(config: &BenchmarkConfig) -> String {
    config
        .parameter("workload")
        .map(value_to_string)
        .filter(|w| !w.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_WORKLOAD.to_string())
}

pub(crate) fn number(config: &BenchmarkConfig, name: &str, default: u64) -> u64 {
    config.parameter_u64(name).unwrap_or(default)
}

/// Whether a database name can be embedded in DDL without quoting surprises
pub fn is_plain_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn connection_flags(conn: &ConnectionParams) -> Vec<String> {
    let prefix = driver(conn.kind);
    let mut flags = vec![
        format!("--db-driver={prefix}"),
        format!("--{prefix}-host={}", quote_arg(&conn.host)),
        format!("--{prefix}-port={}", conn.port),
        format!("--{prefix}-user={}", quote_arg(&conn.user)),
    ];
    if let Some(password) = conn.password.as_deref().filter(|p| !p.is_empty()) {
        flags.push(format!("--{prefix}-password={}", quote_arg(password)));
    }
    flags.push(format!("--{prefix}-db={}", quote_arg(&conn.database)));
    flags
}

/// Pass-through flags for parameters outside [`KNOWN_PARAMS`]
fn extra_flags(config: &BenchmarkConfig) -> Vec<String> {
    config
        .parameters
        .iter()
        .filter(|(name, _)| {
            !KNOWN_PARAMS.contains(&name.as_str()) && name.as_str() != PREPARE_ONLY_MARKER
        })
        .filter_map(|(name, value)| {
            if !EXTRA_FLAG.is_match(name) {
                tracing::warn!(parameter = %name, "Ignoring parameter that is not a valid sysbench flag");
                return None;
            }
            Some(format!(
                "--{}={}",
                name.replace('_', "-"),
                quote_arg(&value_to_string(value))
            ))
        })
        .collect()
}

/// Built-in command line for a phase
pub fn builtin_command(config: &BenchmarkConfig, phase: Phase) -> String {
    let mut parts = vec!["sysbench".to_string(), quote_arg(&workload(config))];
    parts.extend(connection_flags(&config.connection));
    parts.push(format!("--tables={}", number(config, "tables", DEFAULT_TABLES)));

    match phase {
        Phase::Prepare => {
            parts.push(format!(
                "--table-size={}",
                number(config, "table_size", DEFAULT_TABLE_SIZE)
            ));
            parts.push(format!("--threads={}", number(config, "threads", DEFAULT_THREADS)));
            parts.extend(extra_flags(config));
            parts.push("prepare".into());
        }
        Phase::Run => {
            parts.push(format!(
                "--table-size={}",
                number(config, "table_size", DEFAULT_TABLE_SIZE)
            ));
            parts.push(format!("--threads={}", number(config, "threads", DEFAULT_THREADS)));
            parts.push(format!("--time={}", number(config, DURATION_PARAM, DEFAULT_TIME)));
            parts.push(format!(
                "--report-interval={}",
                number(config, "report_interval", DEFAULT_REPORT_INTERVAL)
            ));
            parts.push(format!(
                "--percentile={}",
                number(config, "percentile", DEFAULT_PERCENTILE)
            ));
            parts.extend(extra_flags(config));
            parts.push("run".into());
        }
        Phase::Cleanup | Phase::CreateDatabase => parts.push("cleanup".into()),
    }

    parts.join(" ")
}

/// Placeholder values available to template patterns
pub fn placeholders(config: &BenchmarkConfig) -> BTreeMap<String, String> {
    let conn = &config.connection;
    let mut vars: BTreeMap<String, String> = config
        .parameters
        .iter()
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect();

    vars.entry("workload".into())
        .or_insert_with(|| DEFAULT_WORKLOAD.to_string());
    for (name, default) in [
        ("threads", DEFAULT_THREADS),
        (DURATION_PARAM, DEFAULT_TIME),
        ("tables", DEFAULT_TABLES),
        ("table_size", DEFAULT_TABLE_SIZE),
        ("report_interval", DEFAULT_REPORT_INTERVAL),
        ("percentile", DEFAULT_PERCENTILE),
    ] {
        vars.entry(name.into()).or_insert_with(|| default.to_string());
    }

    vars.insert("db_driver".into(), driver(conn.kind).into());
    vars.insert("host".into(), conn.host.clone());
    vars.insert("port".into(), conn.port.to_string());
    vars.insert("user".into(), conn.user.clone());
    vars.insert("password".into(), conn.password.clone().unwrap_or_default());
    vars.insert("database".into(), conn.database.clone());
    vars.insert("work_dir".into(), config.work_dir.display().to_string());
    vars
}

/// Command for a sysbench phase, from the template pattern or the built-in line
pub fn phase_command(config: &BenchmarkConfig, phase: Phase) -> Result<CommandSpec, AdapterError> {
    let commands = &config.template.commands;
    let pattern = match phase {
        Phase::Prepare => commands.prepare.as_deref(),
        Phase::Run => commands.run.as_deref(),
        Phase::Cleanup => commands.cleanup.as_deref(),
        Phase::CreateDatabase => None,
    }
    .filter(|p| !p.trim().is_empty());

    let line = match pattern {
        Some(pattern) => render(pattern, &placeholders(config))?,
        None => builtin_command(config, phase),
    };

    Ok(CommandSpec::new(line).with_work_dir(&config.work_dir))
}

/// Client command creating the target database
pub fn create_database_command(config: &BenchmarkConfig) -> Result<CommandSpec, AdapterError> {
    let conn = &config.connection;
    if !is_plain_identifier(&conn.database) {
        return Err(AdapterError::InvalidConfig(format!(
            "database name {:?} cannot be created automatically",
            conn.database
        )));
    }

    let password = conn.password.clone().unwrap_or_default();
    let spec = match conn.kind {
        DatabaseKind::Mysql => {
            let sql = format!("CREATE DATABASE IF NOT EXISTS `{}`", conn.database);
            CommandSpec::new(format!(
                "mysql --host={} --port={} --user={} -e {}",
                quote_arg(&conn.host),
                conn.port,
                quote_arg(&conn.user),
                quote_arg(&sql)
            ))
            .with_env("MYSQL_PWD", password)
        }
        DatabaseKind::Postgresql => {
            let sql = format!("CREATE DATABASE \"{}\"", conn.database);
            CommandSpec::new(format!(
                "psql -h {} -p {} -U {} -d postgres -v ON_ERROR_STOP=1 -c {}",
                quote_arg(&conn.host),
                conn.port,
                quote_arg(&conn.user),
                quote_arg(&sql)
            ))
            .with_env("PGPASSWORD", password)
        }
    };

    Ok(spec.with_work_dir(&config.work_dir))
}

/// Name of the client used by [`create_database_command`]
pub fn database_client(kind: DatabaseKind) -> &'static str {
    match kind {
        DatabaseKind::Mysql => "mysql",
        DatabaseKind::Postgresql => "psql",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbbench_core::process::split_command_line;
    use dbbench_core::{ExecutionOptions, RunId, Template};
    use serde_json::json;

    fn config(kind: DatabaseKind) -> BenchmarkConfig {
        BenchmarkConfig {
            run_id: RunId::from("r1"),
            template: Template::new("oltp", "sysbench"),
            connection: ConnectionParams {
                kind,
                host: "db.internal".into(),
                port: if kind == DatabaseKind::Mysql { 3306 } else { 5432 },
                user: "bench".into(),
                password: Some("s3cret pass".into()),
                database: "sbtest".into(),
            },
            parameters: BTreeMap::new(),
            options: ExecutionOptions::default(),
            work_dir: "/tmp/dbbench-r1".into(),
        }
    }

    #[test]
    fn test_builtin_run_command() {
        let mut cfg = config(DatabaseKind::Mysql);
        cfg.parameters.insert("threads".into(), json!(8));
        cfg.parameters.insert("time".into(), json!(30));
        cfg.parameters.insert("rand_type".into(), json!("uniform"));
        cfg.parameters.insert("original_time".into(), json!(30));

        let line = builtin_command(&cfg, Phase::Run);
        let tokens = split_command_line(&line).unwrap();

        assert_eq!(tokens[0], "sysbench");
        assert_eq!(tokens[1], "oltp_read_write");
        assert!(tokens.contains(&"--db-driver=mysql".to_string()));
        assert!(tokens.contains(&"--mysql-password=s3cret pass".to_string()));
        assert!(tokens.contains(&"--threads=8".to_string()));
        assert!(tokens.contains(&"--time=30".to_string()));
        assert!(tokens.contains(&"--report-interval=1".to_string()));
        assert!(tokens.contains(&"--rand-type=uniform".to_string()));
        assert!(!line.contains("original"));
        assert_eq!(tokens.last().map(String::as_str), Some("run"));
    }

    #[test]
    fn test_builtin_pgsql_cleanup_without_password() {
        let mut cfg = config(DatabaseKind::Postgresql);
        cfg.connection.password = None;
        cfg.parameters.insert("tables".into(), json!("4"));

        let tokens = split_command_line(&builtin_command(&cfg, Phase::Cleanup)).unwrap();
        assert!(tokens.contains(&"--pgsql-host=db.internal".to_string()));
        assert!(tokens.contains(&"--tables=4".to_string()));
        assert!(!tokens.iter().any(|t| t.contains("password")));
        assert!(!tokens.iter().any(|t| t.starts_with("--time")));
        assert_eq!(tokens.last().map(String::as_str), Some("cleanup"));
    }

    #[test]
    fn test_template_pattern_wins() {
        let mut cfg = config(DatabaseKind::Mysql);
        cfg.template.commands.run =
            Some("sysbench {workload} --db-driver={db_driver} --time={time} run".into());
        cfg.parameters.insert("workload".into(), json!("oltp_point_select"));

        let spec = phase_command(&cfg, Phase::Run).unwrap();
        assert_eq!(
            spec.command_line,
            "sysbench oltp_point_select --db-driver=mysql --time=60 run"
        );
        assert_eq!(spec.work_dir.as_deref(), Some(std::path::Path::new("/tmp/dbbench-r1")));
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let mut cfg = config(DatabaseKind::Mysql);
        cfg.template.commands.prepare = Some("sysbench {nonexistent} prepare".into());
        assert!(matches!(
            phase_command(&cfg, Phase::Prepare),
            Err(AdapterError::Template(_))
        ));
    }

    #[test]
    fn test_invalid_extra_flag_is_dropped() {
        let mut cfg = config(DatabaseKind::Mysql);
        cfg.parameters.insert("Bad Flag".into(), json!(1));
        assert!(!builtin_command(&cfg, Phase::Run).contains("Bad"));
    }

    #[test]
    fn test_create_database_commands() {
        let spec = create_database_command(&config(DatabaseKind::Mysql)).unwrap();
        let tokens = split_command_line(&spec.command_line).unwrap();
        assert_eq!(tokens[0], "mysql");
        assert_eq!(
            tokens.last().map(String::as_str),
            Some("CREATE DATABASE IF NOT EXISTS `sbtest`")
        );
        assert_eq!(spec.env.get("MYSQL_PWD").map(String::as_str), Some("s3cret pass"));
        assert!(!spec.command_line.contains("s3cret"));

        let spec = create_database_command(&config(DatabaseKind::Postgresql)).unwrap();
        let tokens = split_command_line(&spec.command_line).unwrap();
        assert_eq!(tokens[0], "psql");
        assert!(tokens.contains(&"postgres".to_string()));
        assert_eq!(
            tokens.last().map(String::as_str),
            Some("CREATE DATABASE \"sbtest\"")
        );
        assert!(spec.env.contains_key("PGPASSWORD"));
    }

    #[test]
    fn test_create_database_rejects_odd_names() {
        let mut cfg = config(DatabaseKind::Mysql);
        cfg.connection.database = "x`; DROP DATABASE y".into();
        assert!(matches!(
            create_database_command(&cfg),
            Err(AdapterError::InvalidConfig(_))
        ));
    }
}
