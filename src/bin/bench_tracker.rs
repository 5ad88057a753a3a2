use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bench_tracker::compare::compute_bench_comparison;
use bench_tracker::error::{Error, Result};
use bench_tracker::logging;
use bench_tracker::options::{Options, OptionsLayer};
use bench_tracker::render::{format_result_row, render_comment};
use bench_tracker::run::RunContext;
use bench_tracker::schema::{Benchmark, BenchmarkComparison, RunReport};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;

#[derive(Subcommand, Debug)]
enum Command {
    /// Persist, compare and report results written by a suite run with `--out`.
    Process {
        /// JSON results file.
        #[arg(long, value_name = "FILE")]
        results: PathBuf,

        #[command(flatten)]
        options: OptionsLayer,
    },

    /// Compare two stored benchmarks offline, without touching history.
    Compare {
        /// Benchmark JSON (`commitSha`, `results`) of the current run.
        #[arg(long, value_name = "FILE")]
        current: PathBuf,

        /// Benchmark JSON of the baseline. Without it every id counts as new.
        #[arg(long, value_name = "FILE")]
        baseline: Option<PathBuf>,

        #[command(flatten)]
        options: OptionsLayer,
    },

    /// Print the baseline the next run would be compared against.
    Baseline {
        #[command(flatten)]
        options: OptionsLayer,
    },
}

#[derive(Parser, Debug)]
#[command(name = "bench-tracker")]
#[command(about = "Benchmark history tracking and regression detection (JSON output)")]
struct Args {
    /// Where to write the JSON output. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Print the markdown report instead of JSON.
    #[arg(long, global = true, default_value_t = false)]
    markdown: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(out) => fs::write(out, json)?,
        None => println!("{json}"),
    }
    Ok(())
}

fn emit_comparison(args: &Args, comparison: &BenchmarkComparison) -> Result<()> {
    if args.markdown {
        let body = render_comment(comparison);
        match &args.out {
            Some(out) => fs::write(out, body)?,
            None => println!("{body}"),
        }
        Ok(())
    } else {
        emit(comparison, args.out.as_deref())
    }
}

fn regression(comparison: &BenchmarkComparison, no_throw: bool) -> Result<()> {
    if comparison.some_failed && !no_throw {
        let failed = comparison
            .results
            .iter()
            .filter(|r| r.is_failed)
            .map(|r| r.id.clone())
            .collect();
        return Err(Error::Regression { failed });
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    match &args.cmd {
        Command::Process { results, options } => {
            let report: RunReport = read_json(results)?;
            let mut opts = Options::load(options.clone())?;
            // The regression verdict is raised here, after the output is written.
            let no_throw = opts.no_throw;
            opts.no_throw = true;

            let ctx = RunContext::from_env(opts)?;
            let provider = ctx.connect_history_provider()?;
            let prev = ctx.get_benchmark(provider.as_ref())?;
            for result in &report.results {
                let prev_result = prev.as_ref().and_then(|p| p.get(&result.id));
                eprintln!("{}", format_result_row(result, prev_result, ctx.opts.threshold));
            }

            let comparison = ctx.process_benchmark(provider.as_ref(), prev.as_ref(), report.results)?;
            emit_comparison(args, &comparison)?;
            regression(&comparison, no_throw)
        }
        Command::Compare {
            current,
            baseline,
            options,
        } => {
            let opts = Options::load(options.clone())?;
            let curr: Benchmark = read_json(current)?;
            curr.validate()?;
            let prev = match baseline {
                Some(path) => {
                    let prev: Benchmark = read_json(path)?;
                    prev.validate()?;
                    Some(prev)
                }
                None => None,
            };

            let comparison = compute_bench_comparison(&curr, prev.as_ref(), opts.threshold);
            emit_comparison(args, &comparison)?;
            regression(&comparison, opts.no_throw)
        }
        Command::Baseline { options } => {
            let opts = Options::load(options.clone())?;
            let ctx = RunContext::from_env(opts)?;
            let provider = ctx.connect_history_provider()?;
            let prev = ctx.get_benchmark(provider.as_ref())?;
            emit(&prev, args.out.as_deref())
        }
    }
}

fn main() -> ExitCode {
    logging::init_tracing();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_regression() => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
