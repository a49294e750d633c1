//! Orchestrator for benchmark run lifecycle management
//!
//! The Orchestrator coordinates every run of a benchmark task:
//! - Resolving the connection, template and adapter
//! - Driving the prepare, warm-up, run and cleanup phases
//! - Supervising tool processes and stopping them on request
//! - Persisting state changes, samples and logs
//!
//! # Example
//!
//! ```ignore
//! use dbbench_core::{BenchmarkTask, OrchestratorBuilder};
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .adapter(Arc::new(SysbenchAdapter::new()))
//!     .connections(connections)
//!     .templates(templates)
//!     .repository(repository)
//!     .build()?;
//!
//! let handle = orchestrator
//!     .start_benchmark(BenchmarkTask::new("nightly", "mysql-primary", "oltp"))
//!     .await?;
//! let state = orchestrator.wait_with_signal_handling(handle).await?;
//! ```

mod builder;
mod executor;
mod phases;

pub use builder::OrchestratorBuilder;
pub use executor::{Orchestrator, RealtimeCallback, RunHandle};
pub use phases::{check_disk_space, sample_phase, ExecutionMode, DURATION_PARAM, PREPARE_ONLY_MARKER};
