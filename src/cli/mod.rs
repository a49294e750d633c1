//! CLI argument parsing and command dispatch

mod config;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dbbench_core::{canonical_params, variant_id, OrchestratorBuilder, RunRepository, RunState};
use dbbench_storage::MemoryRunRepository;

use config::FileConfig;

#[derive(Parser)]
#[command(name = "dbbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a benchmark task from a configuration file
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Task id to run
        #[arg(short, long)]
        task: String,
        /// Force-stop the run after this many seconds
        #[arg(long, value_name = "SECONDS")]
        force_stop_after: Option<u64>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Parse captured sysbench output into a JSON result
    Parse {
        /// File holding the output, `-` for stdin
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the fingerprint of a parameter set
    Variant {
        /// Parameter as key=value, repeatable
        #[arg(short, long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_val(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {arg:?}")),
    }
}

/// Execute a parsed command line
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            task,
            force_stop_after,
        } => run(&config, &task, force_stop_after.map(Duration::from_secs)).await,
        Commands::Validate { config } => validate(&config),
        Commands::Parse { input } => parse(&input),
        Commands::Variant { params } => {
            let params: BTreeMap<String, String> = params.into_iter().collect();
            println!("{}  {}", variant_id(&params), canonical_params(&params));
            Ok(())
        }
    }
}

async fn run(config_path: &Path, task_id: &str, force_stop_after: Option<Duration>) -> Result<()> {
    let config = FileConfig::load(config_path)?;
    let task = config.task(task_id)?.clone();
    let lookups = Arc::new(config.lookups());
    let repository = Arc::new(MemoryRunRepository::new());

    let orchestrator = OrchestratorBuilder::new()
        .config(config.engine.clone())
        .registry(dbbench_adapters::default_registry())
        .connections(lookups.clone())
        .templates(lookups)
        .repository(repository.clone())
        .build()
        .context("failed to assemble the engine")?;

    orchestrator.set_realtime_callback(|run_id, sample| {
        tracing::info!(
            run_id = %run_id,
            second = sample.second,
            phase = %sample.phase,
            tps = sample.tps,
            qps = sample.qps,
            p95_ms = sample.latency_p95_ms,
            "Sample"
        );
    });

    let handle = orchestrator
        .start_benchmark(task)
        .await
        .context("failed to start benchmark")?;
    let run_id = handle.id().clone();

    if let Some(after) = force_stop_after {
        let orchestrator = orchestrator.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match orchestrator.stop_benchmark(&run_id, true).await {
                Ok(run) => tracing::info!(run_id = %run_id, state = %run.state, "Force-stopped run"),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Force stop skipped"),
            }
        });
    }

    orchestrator.wait_with_signal_handling(handle).await?;
    // Detached cleanup finishes before the process exits unless interrupted
    tokio::select! {
        _ = orchestrator.shutdown() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run_id = %run_id, "Received Ctrl+C, stopping cleanup");
            orchestrator.shutdown_now().await;
        }
    }

    let run = orchestrator.get_benchmark_status(&run_id).await?;
    let logs = repository.log_entries(&run_id).await?;
    let report = serde_json::json!({ "run": run, "logs": logs });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if run.state != RunState::Completed {
        bail!("run {run_id} finished in state {}", run.state);
    }
    Ok(())
}

fn validate(config_path: &Path) -> Result<()> {
    let config = FileConfig::load(config_path)?;
    let report = config.validate(&dbbench_adapters::default_registry())?;
    for line in &report {
        println!("ok  {line}");
    }
    println!(
        "{} connection(s), {} template(s), {} task(s)",
        config.connections.len(),
        config.templates.len(),
        config.tasks.len()
    );
    Ok(())
}

fn parse(input: &Path) -> Result<()> {
    let output = if input == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?
    };

    let result = dbbench_adapters::sysbench::parse_output(&output);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "dbbench",
            "run",
            "--config",
            "bench.json",
            "--task",
            "smoke",
            "--force-stop-after",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                task,
                force_stop_after,
            } => {
                assert_eq!(config, PathBuf::from("bench.json"));
                assert_eq!(task, "smoke");
                assert_eq!(force_stop_after, Some(30));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_key_val_parsing() {
        assert_eq!(
            parse_key_val("threads=8").unwrap(),
            ("threads".to_string(), "8".to_string())
        );
        assert_eq!(
            parse_key_val("filter=a=b").unwrap(),
            ("filter".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("threads").is_err());
        assert!(parse_key_val("=8").is_err());
    }

    #[test]
    fn test_variant_params_repeat() {
        let cli = Cli::try_parse_from(["dbbench", "variant", "-p", "b=2", "--param", "a=1"]).unwrap();
        let Commands::Variant { params } = cli.command else {
            panic!("expected variant");
        };
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_parse_command_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "    transactions:                        600    (10.00 per sec.)\n").unwrap();
        assert!(parse(&path).is_ok());
        assert!(parse(&dir.path().join("missing.txt")).is_err());
    }
}
