//! Failure classification for tool output
//!
//! Benchmark tools report "the tables are already there" and "the tables are
//! gone" as ordinary failures. A [`FailureClassifier`] turns the failure text of
//! a phase into either a fatal outcome with user guidance or a benign outcome
//! that lets the run continue or complete.

use crate::run::Phase;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Why a phase failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Tables or database objects are missing
    MissingObjects,
    /// Objects the phase creates already exist
    ObjectsExist,
    /// The database refused or dropped the connection
    Connection,
    /// Credentials were rejected
    Authentication,
    /// Nothing recognizable in the output
    Unrecognized,
}

/// Fatal failure with optional guidance for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureHint {
    /// Recognized cause
    pub cause: FailureCause,
    /// Suggested remedy
    pub guidance: Option<String>,
}

impl FailureHint {
    /// Hint with guidance
    pub fn new(cause: FailureCause, guidance: impl Into<String>) -> Self {
        Self {
            cause,
            guidance: Some(guidance.into()),
        }
    }

    /// Hint for output nothing recognized
    pub fn unrecognized() -> Self {
        Self {
            cause: FailureCause::Unrecognized,
            guidance: None,
        }
    }

    /// Message combining guidance with the most relevant output line
    pub fn message(&self, phase: Phase, output: &str) -> String {
        let detail = last_error_line(output);
        match (&self.guidance, detail) {
            (Some(guidance), Some(line)) => format!("{phase} failed: {guidance} ({line})"),
            (Some(guidance), None) => format!("{phase} failed: {guidance}"),
            (None, Some(line)) => format!("{phase} failed: {line}"),
            (None, None) => format!("{phase} failed with no output"),
        }
    }
}

/// Outcome of classifying a failed phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The run must fail
    Fatal(FailureHint),
    /// The failure is harmless; continue with the next phase
    BenignContinue(String),
    /// The failure is harmless and leaves nothing more to do
    ///
    /// For the run phase the engine accepts the outcome as is: a result that
    /// cannot be parsed completes the run without one instead of failing it.
    BenignComplete(String),
}

impl Classification {
    /// Whether the failure does not stop the run
    pub fn is_benign(&self) -> bool {
        !matches!(self, Classification::Fatal(_))
    }
}

/// Maps failure text of a phase to an outcome
pub trait FailureClassifier: Send + Sync {
    /// Classify the combined output of a failed phase
    fn classify(&self, phase: Phase, output: &str) -> Classification;
}

const EXISTS_MARKERS: &[&str] = &["already exists", "Duplicate entry"];

const MISSING_MARKERS: &[&str] = &[
    "doesn't exist",
    "does not exist",
    "no such table",
    "Unknown table",
];

const CONNECTION_MARKERS: &[&str] = &[
    "Can't connect",
    "Connection refused",
    "could not connect",
    "Lost connection",
    "server closed the connection",
];

const AUTH_MARKERS: &[&str] = &["Access denied", "password authentication failed"];

/// MySQL 1050/1062 after the word "error", or SQLSTATE 42P07/42P04 in parentheses
static EXISTS_CODES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\berror\s*:?\s*\(?(?:1050|1062)\b|\((?:42P07|42P04)\)")
        .expect("valid exists-code pattern")
});

/// MySQL 1146 after the word "error", or SQLSTATE 42P01 in parentheses
static MISSING_CODES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\berror\s*:?\s*\(?1146\b|\(42P01\)").expect("valid missing-code pattern")
});

fn contains_any(output: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| output.contains(m))
}

fn matches_markers(output: &str, markers: &[&str], codes: &Regex) -> bool {
    contains_any(output, markers) || codes.is_match(output)
}

/// Classifier covering MySQL and PostgreSQL messages and error codes
///
/// Numeric codes only count in error context, so counters and rates in the
/// tool's progress output never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, phase: Phase, output: &str) -> Classification {
        let exists = matches_markers(output, EXISTS_MARKERS, &EXISTS_CODES);
        let missing = matches_markers(output, MISSING_MARKERS, &MISSING_CODES);

        match phase {
            Phase::CreateDatabase | Phase::Prepare if exists => Classification::BenignContinue(
                "objects already exist, reusing them".to_string(),
            ),
            Phase::Cleanup if missing => {
                Classification::BenignComplete("nothing to clean up".to_string())
            }
            Phase::Run if missing => Classification::Fatal(FailureHint::new(
                FailureCause::MissingObjects,
                "benchmark tables are missing, run Prepare first",
            )),
            _ if contains_any(output, AUTH_MARKERS) => Classification::Fatal(FailureHint::new(
                FailureCause::Authentication,
                "the database rejected the credentials",
            )),
            _ if contains_any(output, CONNECTION_MARKERS) => {
                Classification::Fatal(FailureHint::new(
                    FailureCause::Connection,
                    "cannot reach the database",
                ))
            }
            _ => Classification::Fatal(FailureHint::unrecognized()),
        }
    }
}

/// Last line that looks like an error, falling back to the last non-empty line
pub fn last_error_line(output: &str) -> Option<&str> {
    let lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    lines
        .clone()
        .filter(|l| {
            let lower = l.to_ascii_lowercase();
            lower.contains("error") || lower.contains("fatal")
        })
        .last()
        .or_else(|| lines.last())
}
