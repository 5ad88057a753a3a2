//! Run options.
//!
//! Sources, lowest to highest precedence: built-in defaults, `.benchrc.yaml` in the working
//! directory, `BENCHMARK_*` environment variables, command line flags. The last two are
//! handled by clap; the rc file is deserialized into the same [`OptionsLayer`] and merged
//! underneath.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::harness::BenchOpts;

pub const BENCHMARK_RC_FILE: &str = ".benchrc.yaml";
pub const DEFAULT_THRESHOLD: f64 = 2.0;

/// One source of options. Every field is optional so sources can be stacked.
#[derive(Args, Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsLayer {
    /// Default branch of the repository, skips asking Github for it
    #[arg(long, env = "BENCHMARK_DEFAULT_BRANCH")]
    pub default_branch: Option<String>,

    /// Branches whose benchmark data is persisted
    #[arg(long, env = "BENCHMARK_PERSIST_BRANCHES", value_delimiter = ',')]
    pub persist_branches: Option<Vec<String>>,

    /// Ratio of new vs previous average time per run counted as a regression.
    /// `Infinity` disables it
    #[arg(long, env = "BENCHMARK_THRESHOLD")]
    #[serde(with = "crate::schema::threshold_serde")]
    pub threshold: Option<f64>,

    /// Same as `--threshold Infinity`
    #[arg(long, env = "BENCHMARK_NO_THRESHOLD")]
    pub no_threshold: bool,

    /// Compare against the latest benchmark of this branch
    #[arg(long, env = "BENCHMARK_COMPARE_BRANCH")]
    pub compare_branch: Option<String>,

    /// Compare against the benchmark of this exact commit
    #[arg(long, env = "BENCHMARK_COMPARE_COMMIT")]
    pub compare_commit: Option<String>,

    /// Force persisting (true) or not persisting (false) this run
    #[arg(long, env = "BENCHMARK_PERSIST")]
    pub persist: Option<bool>,

    /// Exit cleanly even if a performance regression was found
    #[arg(long, env = "BENCHMARK_NO_THROW")]
    pub no_throw: bool,

    /// Do not post a report comment when running in Github Actions
    #[arg(long, env = "BENCHMARK_SKIP_POST_COMMENT")]
    pub skip_post_comment: bool,

    /// Keep history in a local directory, `./benchmark_data` if no path is given
    #[arg(long, alias = "local", env = "BENCHMARK_HISTORY_LOCAL", value_name = "PATH")]
    #[serde(alias = "local", deserialize_with = "flag_or_value")]
    pub history_local: Option<Option<PathBuf>>,

    /// Keep history in the Github Actions cache, key `benchmark_data` if none is given
    #[arg(long, alias = "ga-cache", env = "BENCHMARK_HISTORY_GA_CACHE", value_name = "KEY")]
    #[serde(alias = "ga-cache", deserialize_with = "flag_or_value")]
    pub history_ga_cache: Option<Option<String>>,

    /// Keep history in an S3 bucket, configured through `S3_*` variables
    #[arg(long, alias = "s3", env = "BENCHMARK_HISTORY_S3")]
    #[serde(alias = "s3")]
    pub history_s3: bool,

    /// Max measured runs of a benchmark
    #[arg(long, env = "BENCHMARK_MAX_RUNS")]
    pub max_runs: Option<u64>,

    /// Min measured runs before a converged benchmark may stop
    #[arg(long, env = "BENCHMARK_MIN_RUNS")]
    pub min_runs: Option<u64>,

    /// Max total milliseconds of a benchmark, warm-up included
    #[arg(long, env = "BENCHMARK_MAX_MS")]
    pub max_ms: Option<u64>,

    /// Min milliseconds before a converged benchmark may stop
    #[arg(long, env = "BENCHMARK_MIN_MS")]
    pub min_ms: Option<u64>,

    /// Max accumulated warm-up time, 0 disables warm-up
    #[arg(long, env = "BENCHMARK_MAX_WARM_UP_MS")]
    pub max_warm_up_ms: Option<u64>,

    /// Max warm-up runs, 0 disables warm-up
    #[arg(long, env = "BENCHMARK_MAX_WARM_UP_RUNS")]
    pub max_warm_up_runs: Option<u64>,

    /// Relative change of the average under which a benchmark counts as converged
    #[arg(long, env = "BENCHMARK_CONVERGE_FACTOR")]
    pub converge_factor: Option<f64>,

    /// Repetitions performed by one call of the benchmarked function
    #[arg(long, env = "BENCHMARK_RUNS_FACTOR")]
    pub runs_factor: Option<f64>,

    /// Yield the thread after each call
    #[arg(long, env = "BENCHMARK_YIELD_AFTER_EACH")]
    #[serde(alias = "yieldEventLoopAfterEach")]
    pub yield_after_each: Option<bool>,
}

/// `true` selects the default value, `false` or absent leaves the option unset.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlagOr<T> {
    Flag(bool),
    Value(T),
}

fn flag_or_value<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<FlagOr<T>>::deserialize(deserializer)? {
        None | Some(FlagOr::Flag(false)) => None,
        Some(FlagOr::Flag(true)) => Some(None),
        Some(FlagOr::Value(v)) => Some(Some(v)),
    })
}

impl OptionsLayer {
    /// Reads `.benchrc.yaml` from `dir`, if present.
    pub fn from_rc_file(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(BENCHMARK_RC_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Self::from_yaml(&raw)
            .map(Some)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Layers `over` on top of `self`; fields set in `over` win. `threshold` and
    /// `no_threshold` travel together so a higher layer can undo either one.
    pub fn merge(self, over: OptionsLayer) -> OptionsLayer {
        let (threshold, no_threshold) = if over.threshold.is_some() || over.no_threshold {
            (over.threshold, over.no_threshold)
        } else {
            (self.threshold, self.no_threshold)
        };
        OptionsLayer {
            default_branch: over.default_branch.or(self.default_branch),
            persist_branches: over.persist_branches.or(self.persist_branches),
            threshold,
            no_threshold,
            compare_branch: over.compare_branch.or(self.compare_branch),
            compare_commit: over.compare_commit.or(self.compare_commit),
            persist: over.persist.or(self.persist),
            no_throw: over.no_throw || self.no_throw,
            skip_post_comment: over.skip_post_comment || self.skip_post_comment,
            history_local: over.history_local.or(self.history_local),
            history_ga_cache: over.history_ga_cache.or(self.history_ga_cache),
            history_s3: over.history_s3 || self.history_s3,
            max_runs: over.max_runs.or(self.max_runs),
            min_runs: over.min_runs.or(self.min_runs),
            max_ms: over.max_ms.or(self.max_ms),
            min_ms: over.min_ms.or(self.min_ms),
            max_warm_up_ms: over.max_warm_up_ms.or(self.max_warm_up_ms),
            max_warm_up_runs: over.max_warm_up_runs.or(self.max_warm_up_runs),
            converge_factor: over.converge_factor.or(self.converge_factor),
            runs_factor: over.runs_factor.or(self.runs_factor),
            yield_after_each: over.yield_after_each.or(self.yield_after_each),
        }
    }

    fn bench_opts(&self) -> BenchOpts {
        BenchOpts {
            min_runs: self.min_runs,
            max_runs: self.max_runs,
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            max_warm_up_ms: self.max_warm_up_ms,
            max_warm_up_runs: self.max_warm_up_runs,
            converge_factor: self.converge_factor,
            runs_factor: self.runs_factor,
            yield_after_each: self.yield_after_each,
            threshold: None,
            no_threshold: None,
        }
    }
}

/// Validated options of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    pub default_branch: Option<String>,
    pub persist_branches: Option<Vec<String>>,
    /// Run-level ratio threshold, infinite when disabled.
    pub threshold: f64,
    pub compare_branch: Option<String>,
    pub compare_commit: Option<String>,
    pub persist: Option<bool>,
    pub no_throw: bool,
    pub skip_post_comment: bool,
    /// `Some(None)` selects the default path.
    pub history_local: Option<Option<PathBuf>>,
    /// `Some(None)` selects the default cache key.
    pub history_ga_cache: Option<Option<String>>,
    pub history_s3: bool,
    /// Suite-wide sampler options.
    pub bench_opts: BenchOpts,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            default_branch: None,
            persist_branches: None,
            threshold: DEFAULT_THRESHOLD,
            compare_branch: None,
            compare_commit: None,
            persist: None,
            no_throw: false,
            skip_post_comment: false,
            history_local: None,
            history_ga_cache: None,
            history_s3: false,
            bench_opts: BenchOpts::default(),
        }
    }
}

impl Options {
    /// Stacks the rc file of the working directory under `cli` and validates the result.
    pub fn load(cli: OptionsLayer) -> Result<Self> {
        Self::load_from(&env::current_dir()?, cli)
    }

    pub fn load_from(dir: &Path, cli: OptionsLayer) -> Result<Self> {
        let rc = OptionsLayer::from_rc_file(dir)?.unwrap_or_default();
        Self::from_layer(rc.merge(cli))
    }

    pub fn from_layer(layer: OptionsLayer) -> Result<Self> {
        if layer.threshold.is_some() && layer.no_threshold {
            return Err(Error::config("'threshold' and 'noThreshold' are mutually exclusive"));
        }
        let threshold = if layer.no_threshold {
            f64::INFINITY
        } else {
            layer.threshold.unwrap_or(DEFAULT_THRESHOLD)
        };
        if threshold.is_nan() {
            return Err(Error::config("threshold is not a number"));
        }
        if threshold <= 0.0 {
            return Err(Error::config(format!("threshold must be positive, got {threshold}")));
        }

        let bench_opts = layer.bench_opts();
        Ok(Self {
            default_branch: layer.default_branch,
            persist_branches: layer.persist_branches,
            threshold,
            compare_branch: layer.compare_branch,
            compare_commit: layer.compare_commit,
            persist: layer.persist,
            no_throw: layer.no_throw,
            skip_post_comment: layer.skip_post_comment,
            history_local: layer.history_local,
            history_ga_cache: layer.history_ga_cache,
            history_s3: layer.history_s3,
            bench_opts,
        })
    }
}
