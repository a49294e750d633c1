//! dbbench-core: Execution engine for database benchmarks
//!
//! This crate drives external benchmark tools (sysbench and friends) through
//! a prepare, warm-up, run and cleanup lifecycle, including:
//!
//! - The run state machine and run records
//! - Process supervision with graceful and forced termination
//! - Realtime metric collection from tool output
//! - Failure classification of tool output
//! - The adapter registry and the orchestrator tying it all together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod classify;
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod run;
pub mod state;
pub mod template;
pub mod traits;

pub use channel::ChannelConfig;
pub use classify::*;
pub use collector::{collect, LineParser, OutputBuffer, RealtimeCollection};
pub use config::{ConfigError, EngineConfig};
pub use error::*;
pub use metrics::*;
pub use orchestrator::{ExecutionMode, Orchestrator, OrchestratorBuilder, RealtimeCallback, RunHandle};
pub use registry::AdapterRegistry;
pub use run::*;
pub use state::{RunState, StateError};
pub use template::*;
pub use traits::*;
