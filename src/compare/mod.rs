//! Baseline selection: which stored run the current one is compared against.

pub mod compute;

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use crate::ci::{CiContext, CiEvent};
use crate::error::{Error, Result};
use crate::git;
use crate::github::GithubClient;
use crate::history::HistoryProvider;
use crate::options::Options;
use crate::schema::Benchmark;

pub use compute::compute_bench_comparison;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompareWith {
    ExactCommit {
        commit_sha: String,
    },
    LatestInBranch {
        branch: String,
        /// Tip of the branch before a push, carried as a hint only.
        before: Option<String>,
    },
}

impl fmt::Display for CompareWith {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareWith::ExactCommit { commit_sha } => write!(f, "exactCommit {commit_sha}"),
            CompareWith::LatestInBranch { branch, .. } => write!(f, "latestCommitInBranch '{branch}'"),
        }
    }
}

pub fn render_compare_with(compare_with: &CompareWith) -> String {
    compare_with.to_string()
}

/// Repository default branch, looked up at most once per resolver.
///
/// An explicit option wins; otherwise Github is asked when running in CI, else the
/// local branch list is inspected.
pub struct DefaultBranch {
    explicit: Option<String>,
    ci: CiContext,
    cached: Mutex<Option<String>>,
}

impl DefaultBranch {
    pub fn new(opts: &Options, ci: &CiContext) -> Self {
        Self {
            explicit: opts.default_branch.clone(),
            ci: ci.clone(),
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Result<String> {
        if let Some(branch) = &self.explicit {
            return Ok(branch.clone());
        }
        let mut cached = self.cached.lock();
        if let Some(branch) = cached.as_ref() {
            return Ok(branch.clone());
        }
        let branch = if self.ci.is_ci() {
            GithubClient::from_env(&self.ci)?.default_branch()?
        } else {
            git::guess_local_default_branch()?
        };
        debug!(%branch, "resolved default branch");
        *cached = Some(branch.clone());
        Ok(branch)
    }
}

/// Picks the baseline selector. First match wins: explicit commit, explicit branch,
/// PR base branch, pushed branch, default branch.
pub fn resolve_compare_with(
    opts: &Options,
    ci: &CiContext,
    default_branch: &DefaultBranch,
) -> Result<CompareWith> {
    if let Some(commit_sha) = &opts.compare_commit {
        return Ok(CompareWith::ExactCommit {
            commit_sha: commit_sha.clone(),
        });
    }
    if let Some(branch) = &opts.compare_branch {
        return Ok(CompareWith::LatestInBranch {
            branch: branch.clone(),
            before: None,
        });
    }

    match &ci.event {
        Some(CiEvent::PullRequest { base_ref, .. }) => Ok(CompareWith::LatestInBranch {
            branch: base_ref.clone(),
            before: None,
        }),
        Some(CiEvent::Push { git_ref, before }) => Ok(CompareWith::LatestInBranch {
            branch: git::parse_branch_from_ref(git_ref)?,
            before: Some(before.clone()),
        }),
        Some(other) => Err(Error::config(format!("event not supported {}", other.name()))),
        None => Ok(CompareWith::LatestInBranch {
            branch: default_branch.get()?,
            before: None,
        }),
    }
}

/// `Ok(None)` when nothing is stored for the selector yet.
pub fn resolve_prev_benchmark(
    compare_with: &CompareWith,
    provider: &dyn HistoryProvider,
) -> Result<Option<Benchmark>> {
    match compare_with {
        CompareWith::ExactCommit { commit_sha } => provider.read_history_commit(commit_sha),
        CompareWith::LatestInBranch { branch, .. } => provider.read_latest_in_branch(branch),
    }
}
