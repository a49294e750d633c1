//! Orchestrator public surface: start, stop, status, list, callbacks, shutdown

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::channel::ChannelConfig;
use crate::config::EngineConfig;
use crate::error::{BenchError, BenchResult};
use crate::metrics::MetricSample;
use crate::process::ProcessSupervisor;
use crate::registry::AdapterRegistry;
use crate::run::{BenchmarkTask, LogEntry, Run, RunFilter, RunId};
use crate::state::RunState;
use crate::traits::{ConnectionLookup, RunRepository, TemplateLookup};

use super::phases::{self, RunContext};

/// Observer invoked for every collected sample
pub type RealtimeCallback = Arc<dyn Fn(&RunId, &MetricSample) + Send + Sync>;

/// Shared engine state, owned by the orchestrator and every run task
pub(crate) struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) channels: ChannelConfig,
    pub(crate) registry: AdapterRegistry,
    pub(crate) connections: Arc<dyn ConnectionLookup>,
    pub(crate) templates: Arc<dyn TemplateLookup>,
    pub(crate) repository: Arc<dyn RunRepository>,
    pub(crate) supervisor: ProcessSupervisor,
    callback: Mutex<Option<RealtimeCallback>>,
    /// Serializes read-modify-write of run records
    pub(crate) persist_lock: tokio::sync::Mutex<()>,
    pub(crate) tracker: TaskTracker,
    pub(crate) shutdown: CancellationToken,
    /// Stops detached cleanup; independent of `shutdown`
    pub(crate) cleanup_abort: CancellationToken,
    active: Mutex<HashMap<RunId, CancellationToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    pub(crate) fn callback(&self) -> Option<RealtimeCallback> {
        lock(&self.callback).clone()
    }

    pub(crate) fn deactivate(&self, run_id: &RunId) {
        lock(&self.active).remove(run_id);
    }

    /// Append a log entry; failures are logged and swallowed
    pub(crate) async fn append_log(&self, run_id: &RunId, entry: LogEntry) {
        if let Err(e) = self.repository.save_log_entry(run_id, &entry).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to persist log entry");
        }
    }
}

/// Handle to a submitted run
#[derive(Debug)]
pub struct RunHandle {
    run: Run,
    join: JoinHandle<RunState>,
}

impl RunHandle {
    /// Run as created at submission
    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Run identity
    pub fn id(&self) -> &RunId {
        &self.run.id
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> BenchResult<RunState> {
        self.join
            .await
            .map_err(|e| BenchError::execution(format!("run task failed: {e}")))
    }
}

/// Orchestrator manages the benchmark run lifecycle
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) engine: Arc<Engine>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(
        config: EngineConfig,
        channels: ChannelConfig,
        registry: AdapterRegistry,
        connections: Arc<dyn ConnectionLookup>,
        templates: Arc<dyn TemplateLookup>,
        repository: Arc<dyn RunRepository>,
    ) -> Self {
        let supervisor = ProcessSupervisor::from_config(&config);
        Self {
            engine: Arc::new(Engine {
                config,
                channels,
                registry,
                connections,
                templates,
                repository,
                supervisor,
                callback: Mutex::new(None),
                persist_lock: tokio::sync::Mutex::new(()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                cleanup_abort: CancellationToken::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    /// Process supervisor shared by all runs
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.engine.supervisor
    }

    /// Number of runs whose task has not finished
    pub fn active_runs(&self) -> usize {
        lock(&self.engine.active).len()
    }

    /// Validate and submit a task
    ///
    /// Returns as soon as the `pending` run is persisted and its execution task
    /// spawned. Fails only on validation or lookup errors.
    pub async fn start_benchmark(&self, task: BenchmarkTask) -> BenchResult<RunHandle> {
        let engine = &self.engine;
        if engine.shutdown.is_cancelled() {
            return Err(BenchError::invalid_state("engine is shutting down"));
        }

        task.validate()?;

        let connection = engine.connections.connection(&task.connection_ref).await?;
        let template = engine.templates.template(&task.template_ref).await?;
        let adapter = engine.registry.get(&template.tool)?;

        let kind = connection.params().kind;
        if !template.supports(kind) {
            return Err(BenchError::validation(format!(
                "template {} does not support {kind} connections",
                template.id
            )));
        }

        let parameters = template.resolve_parameters(&task.parameters)?;

        let run = Run::new(&task);
        engine.repository.save(&run).await?;

        let cancel = engine.shutdown.child_token();
        lock(&engine.active).insert(run.id.clone(), cancel.clone());

        tracing::info!(
            run_id = %run.id,
            task_id = %task.id,
            tool = %template.tool,
            template = %template.id,
            connection = %connection.id(),
            "Benchmark submitted"
        );

        let ctx = RunContext {
            run_id: run.id.clone(),
            task,
            template,
            connection,
            adapter,
            parameters,
            cancel,
        };
        let join = engine
            .tracker
            .spawn(phases::execute(Arc::clone(engine), ctx));

        Ok(RunHandle { run, join })
    }

    /// Stop a running or warming-up run
    ///
    /// Signals the tracked process (graceful terminate, then a kill shortly after
    /// when `force` is set) and records `force_stopped` or `cancelled`. The state
    /// is written whether or not a process is tracked. Does not wait for exit.
    pub async fn stop_benchmark(&self, run_id: &RunId, force: bool) -> BenchResult<Run> {
        let engine = &self.engine;
        let guard = engine.persist_lock.lock().await;

        let mut run = engine
            .repository
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| BenchError::not_found("run", run_id))?;

        if !run.state.is_stoppable() {
            return Err(BenchError::invalid_state(format!(
                "run {run_id} cannot be stopped in state {}",
                run.state
            )));
        }

        let signaled = engine.supervisor.signal(run_id, force);
        if let Some(token) = lock(&engine.active).get(run_id) {
            token.cancel();
        }

        // warming_up has no force_stopped edge
        let target = if force && run.state == RunState::Running {
            RunState::ForceStopped
        } else {
            RunState::Cancelled
        };
        run.transition_to(target, chrono::Utc::now())?;
        engine.repository.save(&run).await?;
        drop(guard);

        tracing::info!(run_id = %run_id, force, signaled, state = %run.state, "Benchmark stopped");
        engine
            .append_log(
                run_id,
                LogEntry::info(format!("Stopped on request (force: {force}), state {}", run.state)),
            )
            .await;

        Ok(run)
    }

    /// Current record of a run
    pub async fn get_benchmark_status(&self, run_id: &RunId) -> BenchResult<Run> {
        self.engine
            .repository
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| BenchError::not_found("run", run_id))
    }

    /// Runs matching a filter
    pub async fn list_benchmarks(&self, filter: &RunFilter) -> BenchResult<Vec<Run>> {
        Ok(self.engine.repository.find_all(filter).await?)
    }

    /// Install the observer notified for every collected sample
    ///
    /// The callback runs off the ingestion path; a panic inside it is caught
    /// and logged.
    pub fn set_realtime_callback<F>(&self, callback: F)
    where
        F: Fn(&RunId, &MetricSample) + Send + Sync + 'static,
    {
        *lock(&self.engine.callback) = Some(Arc::new(callback));
    }

    /// Remove the realtime observer
    pub fn clear_realtime_callback(&self) {
        *lock(&self.engine.callback) = None;
    }

    /// Cancel every active run and wait for all run tasks to finish
    ///
    /// Detached cleanup of completed runs is not cancelled; this waits for it
    /// to exit or reach its cleanup timeout.
    pub async fn shutdown(&self) {
        let engine = &self.engine;
        tracing::info!(active = self.active_runs(), "Shutting down orchestrator");
        engine.shutdown.cancel();
        engine.tracker.close();
        engine.tracker.wait().await;
        tracing::info!("Orchestrator shut down");
    }

    /// Like [`shutdown`](Self::shutdown), but also stops detached cleanup
    pub async fn shutdown_now(&self) {
        self.engine.cleanup_abort.cancel();
        self.shutdown().await;
    }

    /// Wait for a run, stopping it gracefully on Ctrl+C
    pub async fn wait_with_signal_handling(&self, handle: RunHandle) -> BenchResult<RunState> {
        let run_id = handle.id().clone();
        let RunHandle { join, .. } = handle;
        tokio::pin!(join);

        tokio::select! {
            joined = &mut join => {
                return joined.map_err(|e| BenchError::execution(format!("run task failed: {e}")));
            }
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    tracing::info!(run_id = %run_id, "Received Ctrl+C, stopping benchmark...");
                    if let Err(e) = self.stop_benchmark(&run_id, false).await {
                        tracing::warn!(run_id = %run_id, error = %e, "Stop on Ctrl+C failed, cancelling run");
                        if let Some(token) = lock(&self.engine.active).get(&run_id) {
                            token.cancel();
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
            },
        }

        join.await
            .map_err(|e| BenchError::execution(format!("run task failed: {e}")))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.engine.config)
            .field("registry", &self.engine.registry)
            .field("active_runs", &self.active_runs())
            .finish()
    }
}
