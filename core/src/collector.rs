//! Realtime collection of a live process's output
//!
//! A [`RealtimeCollection`] exposes parsed samples and error lines as two
//! channels, a completion signal fired once both output pipes reach EOF, and a
//! buffer of the full combined output for final parsing.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::channel::ChannelConfig;
use crate::metrics::MetricSample;
use crate::process::{LineReader, ProcessStreams};

/// Tool-specific interpretation of single output lines
pub trait LineParser: Send + Sync {
    /// Parse a per-interval progress line
    fn parse_line(&self, line: &str) -> Option<MetricSample>;

    /// Whether a stdout line reports an error
    fn is_error_line(&self, _line: &str) -> bool {
        false
    }
}

/// Shared buffer of everything a process printed
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    fn push_line(&self, line: &str) {
        let mut buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push_str(line);
        buf.push('\n');
    }

    /// Copy of the buffered output
    pub fn snapshot(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Live output of a run-phase process
#[derive(Debug)]
pub struct RealtimeCollection {
    /// Parsed samples in arrival order
    pub samples: mpsc::Receiver<MetricSample>,
    /// Error lines in arrival order
    pub errors: mpsc::Receiver<String>,
    /// Fires once both output streams are fully consumed
    pub completion: oneshot::Receiver<()>,
    output: OutputBuffer,
}

impl RealtimeCollection {
    /// Combined output read so far
    pub fn output(&self) -> String {
        self.output.snapshot()
    }
}

/// Start reading a process's output pipes
///
/// Stdout lines go through `parser`; lines it parses become samples, lines it
/// flags become errors. Every non-empty stderr line is an error. All lines land
/// in the output buffer.
pub fn collect(
    streams: ProcessStreams,
    parser: Arc<dyn LineParser>,
    channels: &ChannelConfig,
) -> RealtimeCollection {
    let (sample_tx, samples) = mpsc::channel(channels.sample_buffer.max(1));
    let (error_tx, errors) = mpsc::channel(channels.error_buffer.max(1));
    let (done_tx, completion) = oneshot::channel();
    let output = OutputBuffer::default();

    let stdout_buf = output.clone();
    let stdout_errors = error_tx.clone();
    let stdout = tokio::spawn(async move {
        let mut lines = LineReader::new(streams.stdout);
        let mut parsed = 0u64;
        while let Some(line) = lines.next_line().await {
            stdout_buf.push_line(&line);
            if let Some(mut sample) = parser.parse_line(&line) {
                sample.raw_line = Some(line);
                parsed += 1;
                // Receiver gone: keep draining so the buffer stays complete
                let _ = sample_tx.send(sample).await;
            } else if parser.is_error_line(&line) {
                let _ = stdout_errors.send(line).await;
            }
        }
        tracing::debug!(samples = parsed, "Stdout closed");
    });

    let stderr_buf = output.clone();
    let stderr = tokio::spawn(async move {
        let mut lines = LineReader::new(streams.stderr);
        while let Some(line) = lines.next_line().await {
            stderr_buf.push_line(&line);
            if !line.trim().is_empty() {
                let _ = error_tx.send(line).await;
            }
        }
    });

    tokio::spawn(async move {
        let _ = stdout.await;
        let _ = stderr.await;
        let _ = done_tx.send(());
    });

    RealtimeCollection {
        samples,
        errors,
        completion,
        output,
    }
}
