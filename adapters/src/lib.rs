//! Benchmark tool adapters for dbbench
//!
//! This crate provides implementations of the `BenchmarkAdapter` trait for:
//!
//! - sysbench (MySQL and PostgreSQL drivers)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sysbench;

use std::sync::Arc;

use dbbench_core::AdapterRegistry;

pub use sysbench::SysbenchAdapter;

/// Registry holding every adapter this crate ships
pub fn default_registry() -> AdapterRegistry {
    AdapterRegistry::new().with(Arc::new(SysbenchAdapter::new()))
}
