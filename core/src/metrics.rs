//! Metric samples, final results and run fingerprinting

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Phase a metric sample was collected in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplePhase {
    /// Inside the warm-up window
    Warmup,
    /// Measured run phase
    #[default]
    Run,
    /// After the measured window
    Cooldown,
}

impl std::fmt::Display for SamplePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplePhase::Warmup => write!(f, "warmup"),
            SamplePhase::Run => write!(f, "run"),
            SamplePhase::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// One per-second observation reported by the benchmark tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// When the sample was collected
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Phase tag
    pub phase: SamplePhase,
    /// Seconds since the tool started reporting
    pub second: u64,
    /// Active client threads
    pub threads: u32,
    /// Transactions per second
    pub tps: f64,
    /// Queries per second
    pub qps: f64,
    /// Read queries per second
    pub read_qps: f64,
    /// Write queries per second
    pub write_qps: f64,
    /// Other queries per second
    pub other_qps: f64,
    /// Average latency (ms), zero when the tool does not report it per interval
    pub latency_avg_ms: f64,
    /// 95th percentile latency (ms)
    pub latency_p95_ms: f64,
    /// 99th percentile latency (ms)
    pub latency_p99_ms: f64,
    /// Errors as a percentage of transactions
    pub error_rate: f64,
    /// Reconnects per second
    pub reconnects_per_sec: f64,
    /// Source line, kept for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

impl MetricSample {
    /// Create an empty sample for the given second
    pub fn new(second: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            phase: SamplePhase::Run,
            second,
            threads: 0,
            tps: 0.0,
            qps: 0.0,
            read_qps: 0.0,
            write_qps: 0.0,
            other_qps: 0.0,
            latency_avg_ms: 0.0,
            latency_p95_ms: 0.0,
            latency_p99_ms: 0.0,
            error_rate: 0.0,
            reconnects_per_sec: 0.0,
            raw_line: None,
        }
    }

    /// Set the phase tag
    pub fn with_phase(mut self, phase: SamplePhase) -> Self {
        self.phase = phase;
        self
    }
}

/// Latency summary (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Mean latency
    pub avg: f64,
    /// Minimum latency
    pub min: f64,
    /// Maximum latency
    pub max: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Sum of all latencies
    pub sum: f64,
}

/// Query and transaction counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SqlStatistics {
    /// Read queries
    pub read_queries: u64,
    /// Write queries
    pub write_queries: u64,
    /// Other queries (BEGIN/COMMIT, ...)
    pub other_queries: u64,
    /// All queries
    pub total_queries: u64,
    /// Transactions
    pub transactions: u64,
}

/// Error and reconnect counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReliabilityStats {
    /// Errors the tool ignored and retried
    pub ignored_errors: u64,
    /// Connection re-establishments
    pub reconnects: u64,
}

/// Wall-clock totals
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeneralStatistics {
    /// Total wall time in seconds
    pub total_time_secs: f64,
    /// Total number of events
    pub total_events: u64,
}

/// Per-thread work distribution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadFairness {
    /// Mean events per thread
    pub events_avg: f64,
    /// Standard deviation of events per thread
    pub events_stddev: f64,
    /// Mean execution time per thread (seconds)
    pub execution_time_avg: f64,
    /// Standard deviation of execution time per thread
    pub execution_time_stddev: f64,
}

/// Final summary of a completed run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Transactions per second
    pub tps: f64,
    /// Queries per second
    pub qps: f64,
    /// Latency summary
    pub latency: LatencyStats,
    /// Query counters
    pub sql: SqlStatistics,
    /// Error counters
    pub reliability: ReliabilityStats,
    /// Wall-clock totals
    pub general: GeneralStatistics,
    /// Thread fairness
    pub fairness: ThreadFairness,
    /// Ordered per-second samples
    pub time_series: Vec<MetricSample>,
}

impl BenchmarkResult {
    /// TPS derived from the counters, falling back to the reported rate
    pub fn calculated_tps(&self) -> f64 {
        if self.general.total_time_secs > 0.0 && self.sql.transactions > 0 {
            self.sql.transactions as f64 / self.general.total_time_secs
        } else {
            self.tps
        }
    }

    /// Peak TPS across the time series
    pub fn peak_tps(&self) -> f64 {
        self.time_series
            .iter()
            .map(|s| s.tps)
            .fold(0.0, f64::max)
    }

    /// Samples collected in the measured phase only
    pub fn measured_samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.time_series
            .iter()
            .filter(|s| s.phase == SamplePhase::Run)
    }
}

/// Number of hex characters kept from the variant digest
const VARIANT_ID_LEN: usize = 16;

/// Deterministic fingerprint of a parameter set
///
/// Keys are sorted, rendered as `key=value` and joined with `&` before hashing,
/// so two runs with the same effective parameters share an identifier.
pub fn variant_id<V: std::fmt::Display>(params: &BTreeMap<String, V>) -> String {
    let canonical = canonical_params(params);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(VARIANT_ID_LEN);
    id
}

/// Canonical `key=value&key=value` form of a parameter set
pub fn canonical_params<V: std::fmt::Display>(params: &BTreeMap<String, V>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_id_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("threads".to_string(), "8".to_string());
        a.insert("time".to_string(), "60".to_string());

        let mut b = BTreeMap::new();
        b.insert("time".to_string(), "60".to_string());
        b.insert("threads".to_string(), "8".to_string());

        assert_eq!(variant_id(&a), variant_id(&b));
        assert_eq!(variant_id(&a).len(), VARIANT_ID_LEN);
    }

    #[test]
    fn test_variant_id_changes_with_values() {
        let mut a = BTreeMap::new();
        a.insert("threads".to_string(), 8);
        let mut b = BTreeMap::new();
        b.insert("threads".to_string(), 16);
        assert_ne!(variant_id(&a), variant_id(&b));
    }

    #[test]
    fn test_canonical_params_format() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2");
        params.insert("a".to_string(), "1");
        assert_eq!(canonical_params(&params), "a=1&b=2");
    }

    #[test]
    fn test_calculated_tps_prefers_counters() {
        let result = BenchmarkResult {
            tps: 1.0,
            sql: SqlStatistics {
                transactions: 600,
                ..Default::default()
            },
            general: GeneralStatistics {
                total_time_secs: 60.0,
                total_events: 600,
            },
            ..Default::default()
        };
        assert!((result.calculated_tps() - 10.0).abs() < 1e-9);

        let reported_only = BenchmarkResult {
            tps: 42.0,
            ..Default::default()
        };
        assert_eq!(reported_only.calculated_tps(), 42.0);
    }

    #[test]
    fn test_measured_samples_skip_warmup() {
        let result = BenchmarkResult {
            time_series: vec![
                MetricSample::new(1).with_phase(SamplePhase::Warmup),
                MetricSample::new(2),
                MetricSample::new(3),
            ],
            ..Default::default()
        };
        assert_eq!(result.measured_samples().count(), 2);
    }

    #[test]
    fn test_sample_phase_serialization() {
        let json = serde_json::to_string(&SamplePhase::Warmup).unwrap();
        assert_eq!(json, "\"warmup\"");
    }
}
