//! Self-hosted benchmark suites.
//!
//! A [`Suite`] resolves the baseline before anything is sampled, runs benchmarks one after
//! another in declaration order, prints each row next to its baseline and hands the
//! results to [`RunContext::process_benchmark`] at the end.
//!
//! ```no_run
//! use bench_tracker::suite::Suite;
//!
//! fn main() -> bench_tracker::error::Result<()> {
//!     let mut suite = Suite::from_env()?;
//!     let data: Vec<u64> = (0..1024).collect();
//!     suite.bench("sum 1024", || data.iter().sum::<u64>())?;
//!     suite.finish()?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use crate::error::{Error, Result};
use crate::git;
use crate::harness::{run_bench_fn, BenchOpts, SamplerError};
use crate::history::HistoryProvider;
use crate::logging;
use crate::options::{Options, OptionsLayer};
use crate::render::format_result_row;
use crate::run::RunContext;
use crate::schema::{Benchmark, BenchmarkComparison, BenchmarkResult, RunReport};

/// Directory receiving one file of raw run durations per benchmark.
pub const RESULTS_CSV_DIR_ENV: &str = "BENCHMARK_RESULTS_CSV_DIR";

#[derive(Parser, Debug)]
#[command(about = "Benchmark suite tracked against stored history")]
pub struct SuiteArgs {
    /// Only write results as JSON to this file, to be handled by `bench-tracker process`
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    #[command(flatten)]
    pub options: OptionsLayer,

    // `cargo bench` passes `--bench` and an optional filter.
    #[arg(long = "bench", hide = true)]
    _bench: bool,
    #[arg(hide = true)]
    _filter: Vec<String>,
}

pub struct Suite {
    ctx: RunContext,
    provider: Box<dyn HistoryProvider>,
    prev: Option<Benchmark>,
    results: Vec<BenchmarkResult>,
    raw_samples_dir: Option<PathBuf>,
    out: Option<PathBuf>,
}

impl Suite {
    /// Suite configured from the command line, `.benchrc.yaml`, and the environment.
    pub fn from_env() -> Result<Self> {
        logging::init_tracing();
        let args = SuiteArgs::parse();
        let opts = Options::load(args.options)?;
        let ctx = RunContext::from_env(opts)?;
        let mut suite = Self::new(ctx)?;
        suite.out = args.out;
        Ok(suite)
    }

    pub fn new(ctx: RunContext) -> Result<Self> {
        let provider = ctx.connect_history_provider()?;
        Self::with_provider(ctx, provider)
    }

    pub fn with_provider(ctx: RunContext, provider: Box<dyn HistoryProvider>) -> Result<Self> {
        let prev = ctx.get_benchmark(provider.as_ref())?;
        let raw_samples_dir = env::var_os(RESULTS_CSV_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(Self {
            ctx,
            provider,
            prev,
            results: Vec::new(),
            raw_samples_dir,
            out: None,
        })
    }

    pub fn with_raw_samples_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw_samples_dir = Some(dir.into());
        self
    }

    pub fn with_out(mut self, path: impl Into<PathBuf>) -> Self {
        self.out = Some(path.into());
        self
    }

    pub fn prev(&self) -> Option<&Benchmark> {
        self.prev.as_ref()
    }

    pub fn results(&self) -> &[BenchmarkResult] {
        &self.results
    }

    pub fn bench<R>(&mut self, id: &str, f: impl FnMut() -> R) -> Result<()> {
        self.bench_opts(id, &BenchOpts::default(), f)
    }

    /// Like [`Suite::bench`], with options layered over the suite-wide ones.
    pub fn bench_opts<R>(&mut self, id: &str, opts: &BenchOpts, mut f: impl FnMut() -> R) -> Result<()> {
        self.bench_with(
            id,
            opts,
            || Ok::<_, Infallible>(()),
            |_, _| Ok(()),
            |()| Ok(f()),
        )
    }

    /// Full form: `before` runs once, `before_each` builds the input of every call.
    /// Neither is timed.
    ///
    /// An error of the function or a hook is kept as the source of [`Error::Bench`] and
    /// can be recovered with `downcast_ref::<E>()`.
    pub fn bench_with<C, T, R, E>(
        &mut self,
        id: &str,
        opts: &BenchOpts,
        before: impl FnOnce() -> std::result::Result<C, E>,
        before_each: impl FnMut(&mut C, u64) -> std::result::Result<T, E>,
        f: impl FnMut(T) -> std::result::Result<R, E>,
    ) -> Result<()>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if self.results.iter().any(|r| r.id == id) {
            return Err(Error::DuplicateId(id.to_string()));
        }

        let opts = self.ctx.opts.bench_opts.merge(opts);
        let persist_runs_ns = self.raw_samples_dir.is_some();
        let measured = run_bench_fn(id, &opts, persist_runs_ns, before, before_each, f).map_err(|e| {
            let source: Box<dyn std::error::Error + Send + Sync> = match e {
                SamplerError::Function(e) => Box::new(e),
                other => Box::new(other),
            };
            Error::Bench {
                id: id.to_string(),
                source,
            }
        })?;

        if let Some(dir) = &self.raw_samples_dir {
            write_raw_samples(dir, id, &measured.runs_ns)?;
        }

        let prev = self.prev.as_ref().and_then(|p| p.get(id));
        println!("{}", format_result_row(&measured.result, prev, self.ctx.opts.threshold));
        self.results.push(measured.result);
        Ok(())
    }

    /// With `--out`, writes the results and stops there. Otherwise persists, compares and
    /// reports them; see [`RunContext::process_benchmark`].
    pub fn finish(self) -> Result<Option<BenchmarkComparison>> {
        if let Some(out) = &self.out {
            let report = RunReport::new(self.results, git::sha_from_env());
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(out, serde_json::to_string_pretty(&report)?)?;
            info!(path = %out.display(), "wrote benchmark results");
            return Ok(None);
        }
        self.ctx
            .process_benchmark(self.provider.as_ref(), self.prev.as_ref(), self.results)
            .map(Some)
    }
}

fn write_raw_samples(dir: &Path, id: &str, runs_ns: &[u64]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let filename = format!("{}.csv", id.replace(['/', '\\'], "_"));
    let body: Vec<String> = runs_ns.iter().map(u64::to_string).collect();
    fs::write(dir.join(filename), body.join("\n"))?;
    Ok(())
}
