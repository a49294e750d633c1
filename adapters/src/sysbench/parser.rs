//! Sysbench output parsing
//!
//! Handles the two shapes of sysbench 1.x output: per-interval progress lines
//! printed with `--report-interval`, and the summary block printed at exit.
//!
//! # Progress line
//!
//! ```text
//! [ 1s ] thds: 4 tps: 341.28 qps: 6871.52 (r/w/o: 4813.88/1368.07/689.57) lat (ms,95%): 15.83 err/s: 0.00 reconn/s: 0.00
//! ```
//!
//! # Summary
//!
//! ```text
//! SQL statistics:
//!     queries performed:
//!         read:                            48244
//!         write:                           13784
//!         other:                           6892
//!         total:                           68920
//!     transactions:                        3446   (344.28 per sec.)
//!     queries:                             68920  (6885.57 per sec.)
//!     ignored errors:                      0      (0.00 per sec.)
//!     reconnects:                          0      (0.00 per sec.)
//!
//! General statistics:
//!     total time:                          10.0078s
//!     total number of events:              3446
//!
//! Latency (ms):
//!          min:                                    5.28
//!          avg:                                   11.61
//!          max:                                   43.21
//!          95th percentile:                       15.83
//!          sum:                                40005.16
//!
//! Threads fairness:
//!     events (avg/stddev):           861.5000/3.35
//!     execution time (avg/stddev):   10.0013/0.00
//! ```
//!
//! Missing fields are left at zero; older and newer sysbench releases omit
//! different parts of the summary.

use std::str::FromStr;

use dbbench_core::{BenchmarkResult, LineParser, MetricSample};
use once_cell::sync::Lazy;
use regex::Regex;

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("valid sysbench pattern")
}

// ============================================================================
// Progress lines
// ============================================================================

static PROGRESS: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^\[\s*(\d+)s\s*\]\s+thds:\s*(\d+)\s+tps:\s*([\d.]+)\s+qps:\s*([\d.]+)")
});
static RWO: Lazy<Regex> =
    Lazy::new(|| pattern(r"\(r/w/o:\s*([\d.]+)/([\d.]+)/([\d.]+)\)"));
static INTERVAL_LATENCY: Lazy<Regex> =
    Lazy::new(|| pattern(r"lat \(ms,\s*(\d+(?:\.\d+)?)%\):\s*([\d.]+)"));
static ERRORS_PER_SEC: Lazy<Regex> = Lazy::new(|| pattern(r"err/s:\s*([\d.]+)"));
static RECONNECTS_PER_SEC: Lazy<Regex> = Lazy::new(|| pattern(r"reconn/s:\s*([\d.]+)"));

fn capture<T: FromStr>(re: &Regex, text: &str, group: usize) -> Option<T> {
    re.captures(text)?.get(group)?.as_str().parse().ok()
}

/// Parse one progress line; anything else yields `None`
pub fn parse_progress_line(line: &str) -> Option<MetricSample> {
    let line = line.trim();
    let caps = PROGRESS.captures(line)?;

    let mut sample = MetricSample::new(caps[1].parse().ok()?);
    sample.threads = caps[2].parse().ok()?;
    sample.tps = caps[3].parse().ok()?;
    sample.qps = caps[4].parse().ok()?;

    if let Some(rwo) = RWO.captures(line) {
        sample.read_qps = rwo[1].parse().unwrap_or_default();
        sample.write_qps = rwo[2].parse().unwrap_or_default();
        sample.other_qps = rwo[3].parse().unwrap_or_default();
    }

    if let Some(lat) = INTERVAL_LATENCY.captures(line) {
        let percentile: f64 = lat[1].parse().unwrap_or_default();
        let value: f64 = lat[2].parse().unwrap_or_default();
        if percentile >= 99.0 {
            sample.latency_p99_ms = value;
        } else {
            sample.latency_p95_ms = value;
        }
    }

    let errors_per_sec: f64 = capture(&ERRORS_PER_SEC, line, 1).unwrap_or_default();
    if sample.tps > 0.0 {
        sample.error_rate = errors_per_sec / sample.tps * 100.0;
    }
    sample.reconnects_per_sec = capture(&RECONNECTS_PER_SEC, line, 1).unwrap_or_default();

    Some(sample)
}

/// Whether a line is a sysbench diagnostic
pub fn is_diagnostic_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("FATAL:") || line.starts_with("ALERT:") || line.starts_with("Error")
}

/// Realtime parser plugged into the collector
#[derive(Debug, Clone, Copy, Default)]
pub struct SysbenchLineParser;

impl LineParser for SysbenchLineParser {
    fn parse_line(&self, line: &str) -> Option<MetricSample> {
        parse_progress_line(line)
    }

    fn is_error_line(&self, line: &str) -> bool {
        is_diagnostic_line(line)
    }
}

// ============================================================================
// Summary
// ============================================================================

static READ: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*read:\s+(\d+)"));
static WRITE: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*write:\s+(\d+)"));
static OTHER: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*other:\s+(\d+)"));
static TOTAL: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*total:\s+(\d+)"));
static TRANSACTIONS: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*transactions:\s*(\d+)"));
static TRANSACTION_RATE: Lazy<Regex> =
    Lazy::new(|| pattern(r"transactions:\s*\d+\s*\(([\d.]+) per sec"));
static QUERIES: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*queries:\s+(\d+)"));
static QUERY_RATE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*queries:\s+\d+\s+\(([\d.]+) per sec"));
static IGNORED_ERRORS: Lazy<Regex> = Lazy::new(|| pattern(r"ignored errors:\s*(\d+)"));
static RECONNECTS: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*reconnects:\s*(\d+)"));
static TOTAL_TIME: Lazy<Regex> = Lazy::new(|| pattern(r"total time:\s*([\d.]+)s"));
static TOTAL_EVENTS: Lazy<Regex> = Lazy::new(|| pattern(r"total number of events:\s*(\d+)"));
static LAT_MIN: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*min:\s*([\d.]+)"));
static LAT_AVG: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*avg:\s*([\d.]+)"));
static LAT_MAX: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*max:\s*([\d.]+)"));
static LAT_PERCENTILE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?m)^\s*(\d+)th percentile:\s*([\d.]+)"));
static LAT_SUM: Lazy<Regex> = Lazy::new(|| pattern(r"(?m)^\s*sum:\s*([\d.]+)"));
static FAIRNESS_EVENTS: Lazy<Regex> =
    Lazy::new(|| pattern(r"events \(avg/stddev\):\s*([\d.]+)/([\d.]+)"));
static FAIRNESS_TIME: Lazy<Regex> =
    Lazy::new(|| pattern(r"execution time \(avg/stddev\):\s*([\d.]+)/([\d.]+)"));

/// Field reader tracking whether any summary field matched
struct Summary<'a> {
    output: &'a str,
    found: bool,
}

impl Summary<'_> {
    fn field<T: FromStr + Default>(&mut self, re: &Regex, group: usize) -> T {
        match capture(re, self.output, group) {
            Some(value) => {
                self.found = true;
                value
            }
            None => T::default(),
        }
    }
}

/// Fill the summary fields of `result` from the exit summary
///
/// Returns whether anything was recognized.
pub fn parse_summary(output: &str, result: &mut BenchmarkResult) -> bool {
    let mut summary = Summary {
        output,
        found: false,
    };

    let sql = &mut result.sql;
    sql.read_queries = summary.field(&READ, 1);
    sql.write_queries = summary.field(&WRITE, 1);
    sql.other_queries = summary.field(&OTHER, 1);
    sql.total_queries = summary.field(&TOTAL, 1);
    sql.transactions = summary.field(&TRANSACTIONS, 1);
    if sql.total_queries == 0 {
        sql.total_queries = summary.field(&QUERIES, 1);
    }
    result.tps = summary.field(&TRANSACTION_RATE, 1);
    result.qps = summary.field(&QUERY_RATE, 1);

    let reliability = &mut result.reliability;
    reliability.ignored_errors = summary.field(&IGNORED_ERRORS, 1);
    reliability.reconnects = summary.field(&RECONNECTS, 1);

    let general = &mut result.general;
    general.total_time_secs = summary.field(&TOTAL_TIME, 1);
    general.total_events = summary.field(&TOTAL_EVENTS, 1);

    let latency = &mut result.latency;
    latency.min = summary.field(&LAT_MIN, 1);
    latency.avg = summary.field(&LAT_AVG, 1);
    latency.max = summary.field(&LAT_MAX, 1);
    latency.sum = summary.field(&LAT_SUM, 1);
    for caps in LAT_PERCENTILE.captures_iter(output) {
        summary.found = true;
        let value: f64 = caps[2].parse().unwrap_or_default();
        match caps[1].parse::<u32>().unwrap_or_default() {
            p if p >= 99 => latency.p99 = value,
            _ => latency.p95 = value,
        }
    }

    let fairness = &mut result.fairness;
    fairness.events_avg = summary.field(&FAIRNESS_EVENTS, 1);
    fairness.events_stddev = summary.field(&FAIRNESS_EVENTS, 2);
    fairness.execution_time_avg = summary.field(&FAIRNESS_TIME, 1);
    fairness.execution_time_stddev = summary.field(&FAIRNESS_TIME, 2);

    summary.found
}

/// Parse a complete run-phase output into a result
///
/// Never fails; unrecognized output produces an empty result.
pub fn parse_output(output: &str) -> BenchmarkResult {
    let mut result = BenchmarkResult {
        time_series: output.lines().filter_map(parse_progress_line).collect(),
        ..Default::default()
    };

    if !parse_summary(output, &mut result) {
        tracing::warn!(
            samples = result.time_series.len(),
            "No sysbench summary found in output"
        );
    }

    if result.tps == 0.0 {
        result.tps = result.calculated_tps();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS_LINE: &str = "[ 1s ] thds: 4 tps: 341.28 qps: 6871.52 (r/w/o: 4813.88/1368.07/689.57) lat (ms,95%): 15.83 err/s: 3.41 reconn/s: 0.00";

    const FULL_OUTPUT: &str = "\
sysbench 1.0.20 (using system LuaJIT 2.1.0-beta3)

Running the test with following options:
Number of threads: 4
Report intermediate results every 1 second(s)

Initializing worker threads...

Threads started!

[ 1s ] thds: 4 tps: 341.28 qps: 6871.52 (r/w/o: 4813.88/1368.07/689.57) lat (ms,95%): 15.83 err/s: 0.00 reconn/s: 0.00
[ 2s ] thds: 4 tps: 347.01 qps: 6940.27 (r/w/o: 4858.19/1388.05/694.03) lat (ms,95%): 14.73 err/s: 0.00 reconn/s: 0.00
SQL statistics:
    queries performed:
        read:                            48244
        write:                           13784
        other:                           6892
        total:                           68920
    transactions:                        3446   (344.28 per sec.)
    queries:                             68920  (6885.57 per sec.)
    ignored errors:                      2      (0.20 per sec.)
    reconnects:                          1      (0.10 per sec.)

General statistics:
    total time:                          10.0078s
    total number of events:              3446

Latency (ms):
         min:                                    5.28
         avg:                                   11.61
         max:                                   43.21
         95th percentile:                       15.83
         sum:                                40005.16

Threads fairness:
    events (avg/stddev):           861.5000/3.35
    execution time (avg/stddev):   10.0013/0.00
";

    #[test]
    fn test_progress_line() {
        let sample = parse_progress_line(PROGRESS_LINE).unwrap();
        assert_eq!(sample.second, 1);
        assert_eq!(sample.threads, 4);
        assert_eq!(sample.tps, 341.28);
        assert_eq!(sample.qps, 6871.52);
        assert_eq!(sample.read_qps, 4813.88);
        assert_eq!(sample.other_qps, 689.57);
        assert_eq!(sample.latency_p95_ms, 15.83);
        assert_eq!(sample.latency_p99_ms, 0.0);
        assert!((sample.error_rate - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_line_p99() {
        let line = "[ 12s ] thds: 8 tps: 100.00 qps: 2000.00 (r/w/o: 1400.00/400.00/200.00) lat (ms,99%): 40.37 err/s: 0.00 reconn/s: 0.00";
        let sample = parse_progress_line(line).unwrap();
        assert_eq!(sample.second, 12);
        assert_eq!(sample.latency_p99_ms, 40.37);
        assert_eq!(sample.latency_p95_ms, 0.0);
    }

    #[test]
    fn test_lines_without_rates_are_skipped() {
        assert!(parse_progress_line("[ 1s ] thds: 4 qps: 6871.52").is_none());
        assert!(parse_progress_line("[ 1s ] thds: 4 tps: 341.28").is_none());
        assert!(parse_progress_line("Threads started!").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn test_minimal_progress_line() {
        let sample = parse_progress_line("[ 3s ] thds: 1 tps: 10.00 qps: 200.00").unwrap();
        assert_eq!(sample.second, 3);
        assert_eq!(sample.read_qps, 0.0);
        assert_eq!(sample.error_rate, 0.0);
    }

    #[test]
    fn test_full_output() {
        let result = parse_output(FULL_OUTPUT);

        assert_eq!(result.time_series.len(), 2);
        assert_eq!(result.time_series[1].second, 2);

        assert_eq!(result.sql.read_queries, 48244);
        assert_eq!(result.sql.write_queries, 13784);
        assert_eq!(result.sql.other_queries, 6892);
        assert_eq!(result.sql.total_queries, 68920);
        assert_eq!(result.sql.transactions, 3446);
        assert_eq!(result.tps, 344.28);
        assert_eq!(result.qps, 6885.57);

        assert_eq!(result.reliability.ignored_errors, 2);
        assert_eq!(result.reliability.reconnects, 1);

        assert_eq!(result.general.total_time_secs, 10.0078);
        assert_eq!(result.general.total_events, 3446);

        assert_eq!(result.latency.min, 5.28);
        assert_eq!(result.latency.avg, 11.61);
        assert_eq!(result.latency.max, 43.21);
        assert_eq!(result.latency.p95, 15.83);
        assert_eq!(result.latency.sum, 40005.16);

        assert_eq!(result.fairness.events_avg, 861.5);
        assert_eq!(result.fairness.events_stddev, 3.35);
        assert_eq!(result.fairness.execution_time_avg, 10.0013);
    }

    #[test]
    fn test_partial_summary_leaves_zeros() {
        let output = "    transactions:                        100   (10.00 per sec.)\n";
        let result = parse_output(output);
        assert_eq!(result.sql.transactions, 100);
        assert_eq!(result.tps, 10.0);
        assert_eq!(result.latency, Default::default());
        assert!(result.time_series.is_empty());
    }

    #[test]
    fn test_garbage_yields_empty_result() {
        let result = parse_output("FATAL: unable to connect\n");
        assert_eq!(result, BenchmarkResult::default());
    }

    #[test]
    fn test_tps_falls_back_to_counters() {
        let output = "    transactions:                        600\n    total time:                          60.0000s\n";
        let result = parse_output(output);
        assert_eq!(result.sql.transactions, 600);
        assert_eq!(result.general.total_time_secs, 60.0);
        assert_eq!(result.tps, 10.0);
    }

    #[test]
    fn test_diagnostic_lines() {
        assert!(is_diagnostic_line("FATAL: `thread_run' function failed"));
        assert!(is_diagnostic_line("ALERT: attempting to connect"));
        assert!(!is_diagnostic_line(PROGRESS_LINE));
        assert!(!is_diagnostic_line("    ignored errors:                      0"));
    }
}
