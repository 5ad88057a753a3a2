//! Run orchestration: pick the baseline before sampling, then persist, compare and
//! report once all results are in.

use tracing::{info, warn};

use crate::ci::CiContext;
use crate::compare::{compute_bench_comparison, render_compare_with, resolve_compare_with, resolve_prev_benchmark, DefaultBranch};
use crate::error::{Error, Result};
use crate::git;
use crate::github::GithubClient;
use crate::history::{get_history_provider, resolve_history_location, should_persist, HistoryProvider};
use crate::options::Options;
use crate::schema::{Benchmark, BenchmarkComparison, BenchmarkResult};

/// Everything one run needs to know about where it executes.
pub struct RunContext {
    pub opts: Options,
    pub ci: CiContext,
    default_branch: DefaultBranch,
    commit_sha: Option<String>,
    branch: Option<String>,
}

impl RunContext {
    pub fn new(opts: Options, ci: CiContext) -> Self {
        let default_branch = DefaultBranch::new(&opts, &ci);
        Self {
            opts,
            ci,
            default_branch,
            commit_sha: None,
            branch: None,
        }
    }

    pub fn from_env(opts: Options) -> Result<Self> {
        Ok(Self::new(opts, CiContext::from_env()?))
    }

    /// Pins the measured commit instead of asking git.
    pub fn with_commit_sha(mut self, commit_sha: impl Into<String>) -> Self {
        self.commit_sha = Some(commit_sha.into());
        self
    }

    /// Pins the branch the run belongs to instead of deriving it from CI or git.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn default_branch(&self) -> Result<String> {
        self.default_branch.get()
    }

    fn current_commit_sha(&self) -> Result<String> {
        if let Some(sha) = &self.commit_sha {
            return Ok(sha.clone());
        }
        match git::current_commit_sha() {
            Ok(sha) => Ok(sha),
            Err(e) => self.ci.sha.clone().ok_or(e),
        }
    }

    fn current_branch(&self) -> Result<String> {
        match &self.branch {
            Some(branch) => Ok(branch.clone()),
            None => self.ci.current_branch(),
        }
    }

    pub fn connect_history_provider(&self) -> Result<Box<dyn HistoryProvider>> {
        let location = resolve_history_location(&self.opts, &self.ci)?;
        let provider = get_history_provider(&location)?;
        info!("Connected to historyProvider: {}", provider.provider_info());
        Ok(provider)
    }

    /// Baseline for this run, validated. `None` on a first run.
    pub fn get_benchmark(&self, provider: &dyn HistoryProvider) -> Result<Option<Benchmark>> {
        if self.opts.threshold.is_nan() {
            return Err(Error::config("threshold is not a number"));
        }

        let compare_with = resolve_compare_with(&self.opts, &self.ci, &self.default_branch)?;
        let prev = resolve_prev_benchmark(&compare_with, provider)?;
        match &prev {
            Some(prev) => {
                info!(
                    "Found previous benchmark for {}, at commit {}",
                    render_compare_with(&compare_with),
                    prev.commit_sha
                );
                prev.validate()?;
            }
            None => info!("No previous benchmark found for {}", render_compare_with(&compare_with)),
        }
        Ok(prev)
    }

    /// Stores the run when the persist policy says so, compares it with `prev` and posts
    /// the report under CI. A regression is returned as [`Error::Regression`] unless
    /// `no_throw` is set.
    pub fn process_benchmark(
        &self,
        provider: &dyn HistoryProvider,
        prev: Option<&Benchmark>,
        results: Vec<BenchmarkResult>,
    ) -> Result<BenchmarkComparison> {
        if results.is_empty() {
            return Err(Error::NoResults);
        }

        let curr = Benchmark::new(self.current_commit_sha()?, results);
        curr.validate()?;

        let branch = self.current_branch()?;
        if should_persist(&self.opts, &branch, || self.default_branch())? {
            info!(
                "Persisting new benchmark data for branch '{branch}' commit '{}'",
                curr.commit_sha
            );
            provider.write_latest_in_branch(&branch, &curr)?;
            provider.write_to_history(&curr)?;
        }

        let comparison = compute_bench_comparison(&curr, prev, self.opts.threshold);

        if !self.opts.skip_post_comment && self.ci.is_ci() {
            GithubClient::from_env(&self.ci)?.post_report(&self.ci, &comparison)?;
        }

        if comparison.some_failed {
            let failed: Vec<String> = comparison
                .results
                .iter()
                .filter(|r| r.is_failed)
                .map(|r| r.id.clone())
                .collect();
            for r in comparison.results.iter().filter(|r| r.is_failed) {
                warn!(id = %r.id, ratio = ?r.ratio, "performance regression");
            }
            if !self.opts.no_throw {
                return Err(Error::Regression { failed });
            }
        }
        Ok(comparison)
    }
}
