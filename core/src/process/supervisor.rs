//! Process spawning, tracking and termination

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::BenchError;
use crate::run::{Phase, RunId};
use crate::traits::CommandSpec;

use super::command_line::{split_command_line, CommandLineError};
use super::LineReader;
use super::signal::{self, Signal};

/// Upper bound on waiting for pipe readers after a process exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tracking entry for a live process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// OS process id, also the process group id
    pub pid: u32,
    /// Phase the process belongs to
    pub phase: Phase,
    /// Spawn time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Piped output of a started process
#[derive(Debug)]
pub struct ProcessStreams {
    /// Standard output
    pub stdout: ChildStdout,
    /// Standard error
    pub stderr: ChildStderr,
}

/// Result of a run-to-completion process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, absent when killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the process exited successfully
    pub success: bool,
    /// Combined stdout and stderr in arrival order
    pub output: String,
}

/// Process errors
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Command line could not be split
    #[error(transparent)]
    CommandLine(#[from] CommandLineError),

    /// Process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Executable
        program: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// Another process is tracked for the run
    #[error("a process is already running for run {0}")]
    AlreadyRunning(RunId),

    /// Deadline expired; the process was terminated
    #[error("process timed out after {after:?}")]
    TimedOut {
        /// Deadline
        after: Duration,
        /// Output captured before termination
        output: String,
    },

    /// Cancellation requested; the process was terminated
    #[error("process cancelled")]
    Cancelled {
        /// Output captured before termination
        output: String,
    },

    /// Waiting for the process failed
    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),
}

impl From<ProcessError> for BenchError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::CommandLine(_) => BenchError::validation(err.to_string()),
            ProcessError::AlreadyRunning(_) => BenchError::invalid_state(err.to_string()),
            ProcessError::TimedOut { .. } => BenchError::timeout(err.to_string()),
            ProcessError::Cancelled { .. } => BenchError::cancelled(err.to_string()),
            ProcessError::Spawn { .. } | ProcessError::Wait(_) => {
                BenchError::execution(err.to_string())
            }
        }
    }
}

type TrackingMap = Arc<Mutex<HashMap<RunId, ProcessHandle>>>;

fn lock(map: &TrackingMap) -> MutexGuard<'_, HashMap<RunId, ProcessHandle>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A spawned child that stays tracked until dropped
#[derive(Debug)]
pub struct SupervisedChild {
    child: Child,
    run_id: RunId,
    pid: u32,
    tracked: TrackingMap,
}

impl SupervisedChild {
    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus, std::io::Error> {
        self.child.wait().await
    }

    /// Graceful terminate, then kill once `grace` expires
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, std::io::Error> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        if let Err(e) = signal::send_group(self.pid, Signal::Terminate) {
            tracing::debug!(run_id = %self.run_id, pid = self.pid, error = %e, "Terminate signal not delivered");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    run_id = %self.run_id,
                    pid = self.pid,
                    grace_ms = grace.as_millis() as u64,
                    "Process ignored terminate signal, killing"
                );
                let _ = signal::send_group(self.pid, Signal::Kill);
                self.child.kill().await?;
                self.child.wait().await
            }
        }
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        let mut tracked = lock(&self.tracked);
        if tracked.get(&self.run_id).map(|h| h.pid) == Some(self.pid) {
            tracked.remove(&self.run_id);
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = LineReader::new(reader);
    while let Some(line) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

enum Outcome {
    Exited(Result<ExitStatus, std::io::Error>),
    TimedOut(Duration),
    Cancelled,
}

/// Spawns and supervises benchmark tool processes by run id
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    tracked: TrackingMap,
    grace_period: Duration,
    force_kill_delay: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor
    pub fn new(grace_period: Duration, force_kill_delay: Duration) -> Self {
        Self {
            tracked: Arc::new(Mutex::new(HashMap::new())),
            grace_period,
            force_kill_delay,
        }
    }

    /// Create a supervisor with the engine's timing settings
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.grace_period, config.force_kill_delay)
    }

    /// Termination grace period
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Tracking entry for a run
    pub fn handle(&self, run_id: &RunId) -> Option<ProcessHandle> {
        lock(&self.tracked).get(run_id).cloned()
    }

    /// Number of tracked processes
    pub fn tracked_count(&self) -> usize {
        lock(&self.tracked).len()
    }

    /// Spawn a process with piped output and track it under `run_id`
    pub fn start(
        &self,
        run_id: &RunId,
        phase: Phase,
        spec: &CommandSpec,
    ) -> Result<(SupervisedChild, ProcessStreams), ProcessError> {
        let argv = split_command_line(&spec.command_line)?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.work_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut tracked = lock(&self.tracked);
        if tracked.contains_key(run_id) {
            return Err(ProcessError::AlreadyRunning(run_id.clone()));
        }

        let spawn_error = |source| ProcessError::Spawn {
            program: argv[0].clone(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_error)?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_error(std::io::Error::other("process exited before tracking")))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tracked.insert(
            run_id.clone(),
            ProcessHandle {
                pid,
                phase,
                started_at: chrono::Utc::now(),
            },
        );
        drop(tracked);

        tracing::info!(
            run_id = %run_id,
            phase = %phase,
            pid,
            command = %spec.redacted(),
            "Process started"
        );

        let supervised = SupervisedChild {
            child,
            run_id: run_id.clone(),
            pid,
            tracked: Arc::clone(&self.tracked),
        };

        match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => Ok((supervised, ProcessStreams { stdout, stderr })),
            _ => Err(spawn_error(std::io::Error::other("output pipes not captured"))),
        }
    }

    /// Run a process to exit, capturing combined output
    ///
    /// On deadline expiry or cancellation the process is terminated and the
    /// output captured so far is returned inside the error.
    pub async fn run_to_completion(
        &self,
        run_id: &RunId,
        phase: Phase,
        spec: &CommandSpec,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        let (mut child, streams) = self.start(run_id, phase, spec)?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let stderr_tx = line_tx.clone();
        tokio::spawn(forward_lines(streams.stdout, line_tx));
        tokio::spawn(forward_lines(streams.stderr, stderr_tx));

        let mut output = String::new();
        let mut lines_open = true;
        let deadline = async {
            match timeout {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    after
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                line = line_rx.recv(), if lines_open => match line {
                    Some(line) => {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    None => lines_open = false,
                },
                status = child.wait() => break Outcome::Exited(status),
                after = &mut deadline => break Outcome::TimedOut(after),
                _ = cancel.cancelled() => break Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Exited(status) => {
                let status = status.map_err(ProcessError::Wait)?;
                let drain = async {
                    while let Some(line) = line_rx.recv().await {
                        output.push_str(&line);
                        output.push('\n');
                    }
                };
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
                    tracing::debug!(run_id = %run_id, phase = %phase, "Output pipes still open after exit");
                }
                tracing::info!(
                    run_id = %run_id,
                    phase = %phase,
                    exit_code = ?status.code(),
                    "Process exited"
                );
                Ok(ProcessOutput {
                    exit_code: status.code(),
                    success: status.success(),
                    output,
                })
            }
            Outcome::TimedOut(after) => {
                tracing::warn!(run_id = %run_id, phase = %phase, "Phase deadline expired, terminating process");
                if let Err(e) = child.terminate(self.grace_period).await {
                    tracing::warn!(run_id = %run_id, error = %e, "Termination failed");
                }
                Err(ProcessError::TimedOut { after, output })
            }
            Outcome::Cancelled => {
                tracing::info!(run_id = %run_id, phase = %phase, "Cancelled, terminating process");
                if let Err(e) = child.terminate(self.grace_period).await {
                    tracing::warn!(run_id = %run_id, error = %e, "Termination failed");
                }
                Err(ProcessError::Cancelled { output })
            }
        }
    }

    /// Signal the process tracked for `run_id`
    ///
    /// Sends the graceful terminate signal; with `force`, follows up with a kill
    /// after the forced-kill delay. Returns whether a process was tracked. Does
    /// not wait for the process to exit.
    pub fn signal(&self, run_id: &RunId, force: bool) -> bool {
        let Some(handle) = self.handle(run_id) else {
            tracing::debug!(run_id = %run_id, "No tracked process to signal");
            return false;
        };

        if let Err(e) = signal::send_group(handle.pid, Signal::Terminate) {
            tracing::warn!(run_id = %run_id, pid = handle.pid, error = %e, "Terminate signal not delivered");
        }

        if force {
            let tracked = Arc::clone(&self.tracked);
            let delay = self.force_kill_delay;
            let run_id = run_id.clone();
            let pid = handle.pid;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let still_running = lock(&tracked).get(&run_id).map(|h| h.pid) == Some(pid);
                if still_running {
                    tracing::info!(run_id = %run_id, pid, "Force stop, killing process");
                    if let Err(e) = signal::send_group(pid, Signal::Kill) {
                        tracing::debug!(run_id = %run_id, pid, error = %e, "Kill signal not delivered");
                    }
                }
            });
        }

        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(Duration::from_millis(500), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_run_to_completion_captures_both_streams() {
        let sup = supervisor();
        let run_id = RunId::from("r1");
        let spec = CommandSpec::new("sh -c 'echo out; echo err 1>&2; exit 3'");

        let out = sup
            .run_to_completion(&run_id, Phase::Prepare, &spec, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
        assert_eq!(sup.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_run_to_completion_passes_env_and_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor();
        let spec = CommandSpec::new("sh -c 'echo $BENCH_VALUE; pwd'")
            .with_env("BENCH_VALUE", "forty-two")
            .with_work_dir(dir.path());

        let out = sup
            .run_to_completion(&RunId::from("r1"), Phase::Prepare, &spec, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(out.success);
        assert!(out.output.contains("forty-two"));
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.output.contains(canonical.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_run_to_completion_times_out() {
        let sup = supervisor();
        let spec = CommandSpec::new("sh -c 'echo started; sleep 30'");

        let err = sup
            .run_to_completion(
                &RunId::from("r1"),
                Phase::Prepare,
                &spec,
                Some(Duration::from_millis(300)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert_eq!(sup.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_run_to_completion_cancelled() {
        let sup = supervisor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = sup
            .run_to_completion(
                &RunId::from("r1"),
                Phase::Cleanup,
                &CommandSpec::new("sleep 30"),
                None,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_one_process_per_run() {
        let sup = supervisor();
        let run_id = RunId::from("r1");
        let (mut child, _streams) = sup
            .start(&run_id, Phase::Run, &CommandSpec::new("sleep 30"))
            .unwrap();
        assert_eq!(sup.handle(&run_id).map(|h| h.pid), Some(child.pid()));

        let err = sup
            .start(&run_id, Phase::Run, &CommandSpec::new("sleep 30"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::AlreadyRunning(_)));

        child.terminate(Duration::from_millis(500)).await.unwrap();
        drop(child);
        assert!(sup.handle(&run_id).is_none());
    }

    #[tokio::test]
    async fn test_terminate_kills_process_ignoring_sigterm() {
        let sup = ProcessSupervisor::new(Duration::from_millis(200), Duration::from_millis(50));
        let (mut child, _streams) = sup
            .start(
                &RunId::from("r1"),
                Phase::Run,
                &CommandSpec::new("sh -c 'trap \"\" TERM; while true; do sleep 0.1; done'"),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = child.terminate(sup.grace_period()).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_signal_untracked_run_returns_false() {
        assert!(!supervisor().signal(&RunId::from("missing"), true));
    }

    #[tokio::test]
    async fn test_forced_signal_kills_tracked_process() {
        let sup = supervisor();
        let run_id = RunId::from("r1");
        let (mut child, _streams) = sup
            .start(
                &run_id,
                Phase::Run,
                &CommandSpec::new("sh -c 'trap \"\" TERM; while true; do sleep 0.1; done'"),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(sup.signal(&run_id, true));
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_program() {
        let err = supervisor()
            .start(
                &RunId::from("r1"),
                Phase::Prepare,
                &CommandSpec::new("definitely-not-a-real-binary-xyz --flag"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-binary-xyz"));
    }
}
