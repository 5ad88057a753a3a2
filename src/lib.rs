//! Adaptive micro-benchmark harness with stored baselines and regression detection.
//!
//! - [`harness`] samples a function until its average converges.
//! - [`compare`] picks the stored baseline and computes per-id ratios.
//! - [`history`] stores past runs, see [`history::HistoryProvider`] for the backends.
//! - [`suite`] and [`run`] tie it together for a bench binary or CI step.

pub mod ci;
pub mod compare;
pub mod error;
pub mod git;
pub mod github;
pub mod harness;
pub mod history;
pub mod logging;
pub mod options;
pub mod render;
pub mod run;
pub mod schema;
pub mod suite;

pub use error::{Error, Result};
pub use harness::{measure_fn, run_bench_fn, BenchOpts};
pub use schema::{Benchmark, BenchmarkComparison, BenchmarkResult, ResultComparison};
pub use suite::Suite;
