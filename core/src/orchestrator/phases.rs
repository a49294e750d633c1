//! Per-run execution: scratch directory, pre-checks, phases and the terminal write
//!
//! A run walks one of three paths:
//!
//! - full: `preparing -> prepared -> warming_up -> running -> completed`, with
//!   best-effort database creation before prepare and a detached cleanup once
//!   the run is recorded `completed`
//! - prepare-only (`time = 0` with the `original_time` marker):
//!   `preparing_only -> completed`
//! - cleanup-only (`time = 0` without the marker): `cleaning_only -> completed`

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::Disks;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::classify::{Classification, FailureCause, FailureHint};
use crate::error::{BenchError, BenchResult, ErrorKind};
use crate::metrics::{BenchmarkResult, MetricSample, SamplePhase};
use crate::process::ProcessError;
use crate::run::{BenchmarkTask, ExecutionOptions, LogEntry, LogStream, Phase, Run, RunId};
use crate::state::RunState;
use crate::template::Template;
use crate::traits::{BenchmarkAdapter, BenchmarkConfig, CommandSpec, Connection};

use super::executor::Engine;

/// Parameter holding the run duration in seconds
pub const DURATION_PARAM: &str = "time";

/// Parameter whose presence turns a zero-duration run into prepare-only
pub const PREPARE_ONLY_MARKER: &str = "original_time";

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Create database, prepare, warm-up, run, cleanup
    Full,
    /// Prepare only
    PrepareOnly,
    /// Cleanup only
    CleanupOnly,
}

impl ExecutionMode {
    /// Derive the mode from the effective parameters
    ///
    /// A zero duration selects prepare-only when the marker is present and
    /// cleanup-only otherwise, unless cleanup is skipped.
    pub fn detect(
        parameters: &BTreeMap<String, serde_json::Value>,
        options: &ExecutionOptions,
    ) -> Self {
        let zero_duration = match parameters.get(DURATION_PARAM) {
            Some(serde_json::Value::Number(n)) => n.as_f64() == Some(0.0),
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok() == Some(0.0),
            _ => false,
        };

        if !zero_duration {
            ExecutionMode::Full
        } else if parameters.contains_key(PREPARE_ONLY_MARKER) {
            ExecutionMode::PrepareOnly
        } else if !options.skip_cleanup {
            ExecutionMode::CleanupOnly
        } else {
            ExecutionMode::Full
        }
    }

    fn entry_state(self) -> RunState {
        match self {
            ExecutionMode::Full => RunState::Preparing,
            ExecutionMode::PrepareOnly => RunState::PreparingOnly,
            ExecutionMode::CleanupOnly => RunState::CleaningOnly,
        }
    }
}

/// Phase tag for a sample reported at `second`
pub fn sample_phase(second: u64, warmup_seconds: u64) -> SamplePhase {
    if warmup_seconds > 0 && second <= warmup_seconds {
        SamplePhase::Warmup
    } else {
        SamplePhase::Run
    }
}

/// Fail when the filesystem holding `path` has less than `min_free` bytes available
///
/// Paths on no known disk pass.
pub fn check_disk_space(path: &Path, min_free: u64) -> BenchResult<()> {
    if min_free == 0 {
        return Ok(());
    }

    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    match disk {
        Some(disk) if disk.available_space() < min_free => Err(BenchError::pre_check(format!(
            "insufficient disk space at {}: {} bytes available, {min_free} required",
            disk.mount_point().display(),
            disk.available_space()
        ))),
        Some(_) => Ok(()),
        None => {
            tracing::debug!(path = %path.display(), "No disk found for scratch path, skipping space check");
            Ok(())
        }
    }
}

/// Everything a run task needs besides the engine
pub(crate) struct RunContext {
    pub(crate) run_id: RunId,
    pub(crate) task: BenchmarkTask,
    pub(crate) template: Template,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) adapter: Arc<dyn BenchmarkAdapter>,
    pub(crate) parameters: BTreeMap<String, serde_json::Value>,
    pub(crate) cancel: CancellationToken,
}

/// Result of a run-to-completion phase that did not fail the run
#[derive(Debug, Clone, PartialEq, Eq)]
enum PhaseOutcome {
    Succeeded,
    Tolerated(String),
}

/// Cleanup owed by a full run, started after the terminal write
struct PendingCleanup {
    spec: CommandSpec,
    /// Kept alive until cleanup exits
    scratch: Arc<TempDir>,
}

/// What a run produced besides its terminal state
#[derive(Default)]
struct Finished {
    result: Option<BenchmarkResult>,
    cleanup: Option<PendingCleanup>,
}

/// Run task entry point; returns the terminal state
pub(crate) async fn execute(engine: Arc<Engine>, ctx: RunContext) -> RunState {
    let exec = Execution {
        engine,
        ctx: Arc::new(ctx),
    };
    let (outcome, cleanup) = match exec.run().await {
        Ok(finished) => (Ok(finished.result), finished.cleanup),
        Err(e) => (Err(e), None),
    };
    let state = exec.finish(outcome).await;

    if let Some(cleanup) = cleanup {
        if state == RunState::Completed {
            exec.spawn_cleanup(cleanup);
        } else {
            exec.info(format!("Cleanup skipped, run finished as {state}"))
                .await;
        }
    }

    exec.engine.deactivate(&exec.ctx.run_id);
    state
}

#[derive(Clone)]
struct Execution {
    engine: Arc<Engine>,
    ctx: Arc<RunContext>,
}

impl Execution {
    fn run_id(&self) -> &RunId {
        &self.ctx.run_id
    }

    fn options(&self) -> &ExecutionOptions {
        &self.ctx.task.options
    }

    async fn log(&self, entry: LogEntry) {
        self.engine.append_log(self.run_id(), entry).await;
    }

    async fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run_id = %self.run_id(), "{message}");
        self.log(LogEntry::info(message)).await;
    }

    async fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(run_id = %self.run_id(), "{message}");
        self.log(LogEntry::error(message)).await;
    }

    /// Persist a state change unless the run was finished by someone else
    async fn advance(&self, to: RunState) -> BenchResult<Run> {
        if self.ctx.cancel.is_cancelled() {
            return Err(BenchError::cancelled("run was cancelled"));
        }

        let _guard = self.engine.persist_lock.lock().await;
        let run = self.load().await?;
        if run.is_finished() {
            return Err(BenchError::cancelled(format!(
                "run already finished as {}",
                run.state
            )));
        }
        let run = self.engine.repository.update_state(self.run_id(), to).await?;
        tracing::debug!(run_id = %self.run_id(), state = %to, "State changed");
        Ok(run)
    }

    async fn load(&self) -> BenchResult<Run> {
        self.engine
            .repository
            .find_by_id(self.run_id())
            .await?
            .ok_or_else(|| BenchError::not_found("run", self.run_id()))
    }

    async fn record_work_dir(&self, dir: &Path) -> BenchResult<()> {
        let _guard = self.engine.persist_lock.lock().await;
        let mut run = self.load().await?;
        run.work_dir = Some(dir.to_path_buf());
        self.engine.repository.save(&run).await?;
        Ok(())
    }

    async fn run(&self) -> BenchResult<Finished> {
        let mode = ExecutionMode::detect(&self.ctx.parameters, self.options());
        self.advance(mode.entry_state()).await?;

        let root = self.engine.config.scratch_root();
        let scratch = tempfile::Builder::new()
            .prefix("dbbench-")
            .tempdir_in(&root)
            .map_err(|e| {
                BenchError::pre_check(format!(
                    "cannot create scratch directory in {}: {e}",
                    root.display()
                ))
            })?;
        let scratch = Arc::new(scratch);
        self.record_work_dir(scratch.path()).await?;

        let config = BenchmarkConfig {
            run_id: self.run_id().clone(),
            template: self.ctx.template.clone(),
            connection: self.ctx.connection.params().clone(),
            parameters: self.ctx.parameters.clone(),
            options: self.options().clone(),
            work_dir: scratch.path().to_path_buf(),
        };

        self.pre_checks(&config).await?;

        if self.options().dry_run {
            return self.dry_run(mode, &config).await;
        }

        match mode {
            ExecutionMode::PrepareOnly => {
                self.info("Prepare-only run: creating the data set, the benchmark itself is not executed")
                    .await;
                let spec = self.ctx.adapter.build_prepare_command(&config)?;
                self.run_command(Phase::Prepare, &spec, self.options().prepare_timeout, &self.ctx.cancel)
                    .await?;
                Ok(Finished::default())
            }
            ExecutionMode::CleanupOnly => {
                self.info("Cleanup-only run: removing the data set, the benchmark itself is not executed")
                    .await;
                let spec = self.ctx.adapter.build_cleanup_command(&config)?;
                self.run_command(Phase::Cleanup, &spec, self.options().cleanup_timeout, &self.ctx.cancel)
                    .await?;
                Ok(Finished::default())
            }
            ExecutionMode::Full => self.full(&config, scratch).await,
        }
    }

    async fn pre_checks(&self, config: &BenchmarkConfig) -> BenchResult<()> {
        let adapter = &self.ctx.adapter;

        adapter.validate_config(config)?;

        let tool = adapter.check_tool_available()?;
        tracing::debug!(run_id = %self.run_id(), tool = %tool.display(), "Tool located");

        self.ctx
            .connection
            .test_connection()
            .await
            .map_err(|e| BenchError::pre_check(format!("connection check failed: {e}")))?;

        check_disk_space(&config.work_dir, self.engine.config.min_free_disk_bytes)?;

        self.info("Pre-checks passed").await;
        Ok(())
    }

    async fn dry_run(
        &self,
        mode: ExecutionMode,
        config: &BenchmarkConfig,
    ) -> BenchResult<Finished> {
        let adapter = &self.ctx.adapter;
        let mut commands: Vec<(Phase, CommandSpec)> = Vec::new();

        match mode {
            ExecutionMode::PrepareOnly => {
                commands.push((Phase::Prepare, adapter.build_prepare_command(config)?));
            }
            ExecutionMode::CleanupOnly => {
                commands.push((Phase::Cleanup, adapter.build_cleanup_command(config)?));
            }
            ExecutionMode::Full => {
                if let Some(creator) = adapter.as_database_creator() {
                    if let Some(spec) = creator.build_create_database_command(config)? {
                        commands.push((Phase::CreateDatabase, spec));
                    }
                }
                if !self.options().skip_prepare {
                    commands.push((Phase::Prepare, adapter.build_prepare_command(config)?));
                }
                commands.push((Phase::Run, adapter.build_run_command(config)?));
                if !self.options().skip_cleanup {
                    commands.push((Phase::Cleanup, adapter.build_cleanup_command(config)?));
                }
            }
        }

        for (phase, spec) in &commands {
            self.info(format!("[dry run] {phase}: {}", spec.redacted())).await;
        }

        if mode == ExecutionMode::Full {
            self.advance(RunState::Prepared).await?;
            self.advance(RunState::WarmingUp).await?;
            self.advance(RunState::Running).await?;
        }

        Ok(Finished::default())
    }

    async fn full(
        &self,
        config: &BenchmarkConfig,
        scratch: Arc<TempDir>,
    ) -> BenchResult<Finished> {
        let adapter = &self.ctx.adapter;
        let options = self.options();

        // Built up front so no failure can strand the run in `prepared`
        let run_spec = adapter.build_run_command(config)?;

        self.create_database(config).await?;

        if options.skip_prepare {
            self.info("Prepare skipped").await;
        } else {
            let spec = adapter.build_prepare_command(config)?;
            self.info("Preparing data set").await;
            self.run_command(Phase::Prepare, &spec, options.prepare_timeout, &self.ctx.cancel)
                .await?;
        }
        self.advance(RunState::Prepared).await?;

        let result = self.run_phase(config, &run_spec).await?;

        let cleanup = if options.skip_cleanup {
            self.info("Cleanup skipped").await;
            None
        } else {
            match adapter.build_cleanup_command(config) {
                Ok(spec) => Some(PendingCleanup { spec, scratch }),
                Err(e) => {
                    self.warn(format!("Cannot build cleanup command: {e}")).await;
                    None
                }
            }
        };

        Ok(Finished { result, cleanup })
    }

    /// Best effort: only cancellation aborts the run
    async fn create_database(&self, config: &BenchmarkConfig) -> BenchResult<()> {
        let Some(creator) = self.ctx.adapter.as_database_creator() else {
            return Ok(());
        };

        let spec = match creator.build_create_database_command(config) {
            Ok(Some(spec)) => spec,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.warn(format!("Skipping database creation: {e}")).await;
                return Ok(());
            }
        };

        self.info(format!("Creating database {}", config.connection.database))
            .await;
        match self
            .run_command(Phase::CreateDatabase, &spec, self.options().prepare_timeout, &self.ctx.cancel)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is(ErrorKind::Cancelled) => Err(e),
            Err(e) => {
                self.warn(format!("Database creation failed, continuing: {}", e.message))
                    .await;
                Ok(())
            }
        }
    }

    /// Run a command to exit and classify a failure
    async fn run_command(
        &self,
        phase: Phase,
        spec: &CommandSpec,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> BenchResult<PhaseOutcome> {
        let output = self
            .engine
            .supervisor
            .run_to_completion(self.run_id(), phase, spec, timeout, cancel)
            .await
            .map_err(|e| phase_error(phase, e))?;

        for line in output.output.lines().filter(|l| !l.trim().is_empty()) {
            self.log(LogEntry::new(LogStream::Stdout, line)).await;
        }

        if output.success {
            self.info(format!("{phase} finished")).await;
            return Ok(PhaseOutcome::Succeeded);
        }

        match self
            .ctx
            .adapter
            .failure_classifier()
            .classify(phase, &output.output)
        {
            Classification::BenignContinue(reason) | Classification::BenignComplete(reason) => {
                self.info(format!("{phase} reported a harmless failure: {reason}"))
                    .await;
                Ok(PhaseOutcome::Tolerated(reason))
            }
            Classification::Fatal(hint) => Err(BenchError::execution(
                hint.message(phase, &output.output),
            )),
        }
    }

    /// Warm-up and run: stream samples until the process exits, then parse
    async fn run_phase(
        &self,
        config: &BenchmarkConfig,
        spec: &CommandSpec,
    ) -> BenchResult<Option<BenchmarkResult>> {
        let adapter = &self.ctx.adapter;
        let warmup = self.options().warmup_seconds;

        self.advance(RunState::WarmingUp).await?;
        if warmup > 0 {
            self.info(format!("Warming up for {warmup}s")).await;
        }

        let (mut child, streams) = self
            .engine
            .supervisor
            .start(self.run_id(), Phase::Run, spec)
            .map_err(|e| phase_error(Phase::Run, e))?;
        let mut collection = adapter.start_realtime_collection(streams, &self.engine.channels);
        let notifier = self.spawn_notifier();

        let mut running = false;
        if warmup == 0 {
            self.advance(RunState::Running).await?;
            running = true;
        }

        let deadline = deadline(self.options().run_timeout);
        tokio::pin!(deadline);
        let mut samples_open = true;
        let mut errors_open = true;

        let interrupted = loop {
            tokio::select! {
                sample = collection.samples.recv(), if samples_open => match sample {
                    Some(sample) => {
                        if let Err(e) = self.on_sample(sample, warmup, &mut running, &notifier).await {
                            break Some(e);
                        }
                    }
                    None => samples_open = false,
                },
                line = collection.errors.recv(), if errors_open => match line {
                    Some(line) => self.log(LogEntry::new(LogStream::Stderr, line)).await,
                    None => errors_open = false,
                },
                _ = &mut collection.completion => break None,
                after = &mut deadline => {
                    break Some(BenchError::timeout(format!("run phase exceeded its {after:?} deadline")));
                }
                _ = self.ctx.cancel.cancelled() => break Some(BenchError::cancelled("run phase stopped")),
            }
        };

        if let Some(err) = interrupted {
            self.terminate(&mut child).await;
            return Err(err);
        }

        let late_wait = self.engine.config.late_sample_wait;
        let drained = tokio::time::timeout(late_wait, async {
            while let Some(sample) = collection.samples.recv().await {
                self.on_sample(sample, warmup, &mut running, &notifier).await?;
            }
            while let Some(line) = collection.errors.recv().await {
                self.log(LogEntry::new(LogStream::Stderr, line)).await;
            }
            BenchResult::Ok(())
        })
        .await;
        if let Ok(Err(e)) = drained {
            self.terminate(&mut child).await;
            return Err(e);
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| BenchError::execution(format!("failed waiting for run phase: {e}")))?,
            after = &mut deadline => {
                self.terminate(&mut child).await;
                return Err(BenchError::timeout(format!("run phase exceeded its {after:?} deadline")));
            }
            _ = self.ctx.cancel.cancelled() => {
                self.terminate(&mut child).await;
                return Err(BenchError::cancelled("run phase stopped"));
            }
        };
        drop(child);
        drop(notifier);

        if self.ctx.cancel.is_cancelled() {
            return Err(BenchError::cancelled("run phase stopped"));
        }

        let output = collection.output();
        tracing::info!(run_id = %self.run_id(), exit_code = ?status.code(), "Run phase exited");

        let mut accept_unparsed = false;
        if !status.success() {
            match adapter.failure_classifier().classify(Phase::Run, &output) {
                Classification::Fatal(hint) => {
                    let message = self.explain_run_failure(config, &hint, &output).await;
                    return Err(BenchError::execution(message));
                }
                Classification::BenignContinue(reason) => {
                    self.info(format!("run reported a harmless failure: {reason}"))
                        .await;
                }
                Classification::BenignComplete(reason) => {
                    self.info(format!("run reported a harmless failure, accepting its outcome: {reason}"))
                        .await;
                    accept_unparsed = true;
                }
            }
        }

        if !running {
            self.advance(RunState::Running).await?;
        }

        let mut result = match adapter.parse_final_results(&output) {
            Ok(result) => result,
            Err(e) if accept_unparsed => {
                self.info(format!("No result recorded: {e}")).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        for sample in &mut result.time_series {
            sample.phase = sample_phase(sample.second, warmup);
        }

        self.info(format!(
            "Run finished: {:.2} tps, {:.2} qps, p95 {:.2} ms",
            result.tps, result.qps, result.latency.p95
        ))
        .await;
        Ok(Some(result))
    }

    async fn on_sample(
        &self,
        mut sample: MetricSample,
        warmup: u64,
        running: &mut bool,
        notifier: &mpsc::UnboundedSender<MetricSample>,
    ) -> BenchResult<()> {
        sample.phase = sample_phase(sample.second, warmup);

        if !*running && sample.phase == SamplePhase::Run {
            self.advance(RunState::Running).await?;
            *running = true;
            self.info("Warm-up finished").await;
        }

        if let Err(e) = self
            .engine
            .repository
            .save_metric_sample(self.run_id(), &sample)
            .await
        {
            tracing::warn!(run_id = %self.run_id(), second = sample.second, error = %e, "Failed to persist sample");
        }

        let _ = notifier.send(sample);
        Ok(())
    }

    /// Deliver samples to the realtime callback on a blocking thread, in order
    fn spawn_notifier(&self) -> mpsc::UnboundedSender<MetricSample> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MetricSample>();
        let engine = Arc::clone(&self.engine);
        let run_id = self.run_id().clone();

        self.engine.tracker.spawn_blocking(move || {
            while let Some(sample) = rx.blocking_recv() {
                let Some(callback) = engine.callback() else {
                    continue;
                };
                let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(&run_id, &sample)
                }));
                if delivered.is_err() {
                    tracing::error!(run_id = %run_id, second = sample.second, "Realtime callback panicked");
                }
            }
        });

        tx
    }

    async fn terminate(&self, child: &mut crate::process::SupervisedChild) {
        if let Err(e) = child.terminate(self.engine.supervisor.grace_period()).await {
            tracing::warn!(run_id = %self.run_id(), error = %e, "Failed to terminate run phase");
        }
    }

    /// Tailor the failure message, asking the database which tables are missing
    async fn explain_run_failure(
        &self,
        config: &BenchmarkConfig,
        hint: &FailureHint,
        output: &str,
    ) -> String {
        if hint.cause == FailureCause::Unrecognized {
            if let Some(inspector) = self.ctx.connection.schema_inspector() {
                let expected = self.ctx.adapter.expected_tables(config);
                if !expected.is_empty() {
                    match inspector.existing_tables(&expected).await {
                        Ok(existing) => {
                            let missing: Vec<&str> = expected
                                .iter()
                                .filter(|t| !existing.contains(t))
                                .map(String::as_str)
                                .collect();
                            if !missing.is_empty() {
                                return format!(
                                    "run failed: tables missing from the target database ({}), run Prepare first",
                                    missing.join(", ")
                                );
                            }
                        }
                        Err(e) => {
                            tracing::debug!(run_id = %self.run_id(), error = %e, "Schema inspection failed");
                        }
                    }
                }
            }
        }
        hint.message(Phase::Run, output)
    }

    /// Detached cleanup; engine shutdown waits for it instead of stopping it
    fn spawn_cleanup(&self, cleanup: PendingCleanup) {
        let PendingCleanup { spec, scratch } = cleanup;
        let exec = self.clone();
        self.engine.tracker.spawn(async move {
            let _scratch = scratch;
            let cancel = exec.engine.cleanup_abort.child_token();
            let timeout = exec.options().cleanup_timeout;
            exec.info("Cleaning up data set").await;
            if let Err(e) = exec.run_command(Phase::Cleanup, &spec, timeout, &cancel).await {
                exec.warn(format!("Cleanup failed: {}", e.message)).await;
            }
        });
    }

    /// Write the terminal state unless another writer already did
    async fn finish(&self, outcome: BenchResult<Option<BenchmarkResult>>) -> RunState {
        let guard = self.engine.persist_lock.lock().await;

        let mut run = match self.load().await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(run_id = %self.run_id(), error = %e, "Cannot load run to record its outcome");
                return RunState::Failed;
            }
        };

        if run.is_finished() {
            tracing::info!(run_id = %self.run_id(), state = %run.state, "Run already finished");
            return run.state;
        }

        let target = match &outcome {
            Ok(_) => RunState::Completed,
            Err(e) if e.is(ErrorKind::Timeout) => RunState::Timeout,
            Err(e) if e.is(ErrorKind::Cancelled) => RunState::Cancelled,
            Err(_) => RunState::Failed,
        };

        let error_message = match outcome {
            Ok(result) => {
                run.result = result;
                None
            }
            Err(e) => {
                run.error_message = Some(e.message.clone());
                Some(e.message)
            }
        };

        let now = chrono::Utc::now();
        if let Err(e) = run.transition_to(target, now) {
            tracing::warn!(run_id = %self.run_id(), error = %e, "Outcome not reachable from current state, recording cancelled");
            if let Err(e) = run.transition_to(RunState::Cancelled, now) {
                tracing::error!(run_id = %self.run_id(), error = %e, "Cannot record outcome");
                return run.state;
            }
        }

        if let Err(e) = self.engine.repository.save(&run).await {
            tracing::error!(run_id = %self.run_id(), error = %e, "Failed to persist run outcome");
        }
        drop(guard);

        match &error_message {
            Some(message) => {
                tracing::warn!(run_id = %self.run_id(), state = %run.state, error = %message, "Run finished");
                self.log(LogEntry::error(message.clone())).await;
            }
            None => {
                tracing::info!(run_id = %self.run_id(), state = %run.state, duration = ?run.duration, "Run finished");
                self.log(LogEntry::info(format!("Run finished: {}", run.state)))
                    .await;
            }
        }

        run.state
    }
}

fn phase_error(phase: Phase, err: ProcessError) -> BenchError {
    match err {
        ProcessError::TimedOut { after, .. } => {
            BenchError::timeout(format!("{phase} phase exceeded its {after:?} deadline"))
        }
        ProcessError::Cancelled { .. } => BenchError::cancelled(format!("{phase} phase stopped")),
        other => {
            let err: BenchError = other.into();
            BenchError::new(err.kind, format!("{phase} phase: {}", err.message))
        }
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(entries: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_mode_detection() {
        let options = ExecutionOptions::default();
        assert_eq!(
            ExecutionMode::detect(&params(&[("time", json!(60))]), &options),
            ExecutionMode::Full
        );
        assert_eq!(
            ExecutionMode::detect(&params(&[("time", json!(0)), ("original_time", json!(60))]), &options),
            ExecutionMode::PrepareOnly
        );
        assert_eq!(
            ExecutionMode::detect(&params(&[("time", json!("0"))]), &options),
            ExecutionMode::CleanupOnly
        );
        assert_eq!(
            ExecutionMode::detect(&params(&[]), &options),
            ExecutionMode::Full
        );
    }

    #[test]
    fn test_zero_duration_with_skipped_cleanup_runs_full() {
        let options = ExecutionOptions {
            skip_cleanup: true,
            ..Default::default()
        };
        assert_eq!(
            ExecutionMode::detect(&params(&[("time", json!(0))]), &options),
            ExecutionMode::Full
        );
    }

    #[test]
    fn test_sample_phase_window() {
        assert_eq!(sample_phase(1, 0), SamplePhase::Run);
        assert_eq!(sample_phase(5, 5), SamplePhase::Warmup);
        assert_eq!(sample_phase(6, 5), SamplePhase::Run);
    }

    #[test]
    fn test_disk_space_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_disk_space(dir.path(), 0).is_ok());
        assert!(check_disk_space(dir.path(), 1).is_ok());

        let err = match check_disk_space(dir.path(), u64::MAX) {
            Ok(()) => return, // no disk information available on this host
            Err(e) => e,
        };
        assert_eq!(err.kind, ErrorKind::PreCheckFailed);
    }
}
