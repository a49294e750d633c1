//! External process supervision
//!
//! The supervisor turns a [`CommandSpec`](crate::traits::CommandSpec) into a live
//! child process, tracks at most one child per run, and terminates it with a
//! graceful signal followed by an unconditional kill.

mod command_line;
mod signal;
mod supervisor;

pub use command_line::{
    is_secret_key, redact_command_line, split_command_line, CommandLineError, REDACTED,
};
pub use signal::Signal;
pub use supervisor::{
    ProcessError, ProcessHandle, ProcessOutput, ProcessStreams, ProcessSupervisor,
    SupervisedChild,
};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Line-oriented reader over a child's output pipe
///
/// Invalid UTF-8 is replaced rather than ending the stream. Line terminators
/// (`\n`, `\r\n`) are stripped.
pub(crate) struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` at EOF or on a read error
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output stream read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<String> {
        let mut reader = LineReader::new(input);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_line_reader_strips_terminators() {
        assert_eq!(
            collect(b"one\r\ntwo\n\nthree").await,
            vec!["one", "two", "", "three"]
        );
    }

    #[tokio::test]
    async fn test_line_reader_replaces_invalid_utf8() {
        assert_eq!(collect(b"ok \xff\n").await, vec!["ok \u{fffd}"]);
    }

    #[tokio::test]
    async fn test_line_reader_empty_input() {
        assert!(collect(b"").await.is_empty());
    }
}
