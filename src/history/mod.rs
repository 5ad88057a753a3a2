//! Benchmark history storage.
//!
//! Two concepts are persisted: the latest benchmark of a branch, used as the baseline
//! for PRs against that branch or pushes to it, and a long-term per-commit history.
//!
//! ```text
//! <root>/latest/<branch>.csv
//! <root>/history/<commitSha>.csv
//! ```

pub mod csv;
pub mod ga_cache;
pub mod local;
pub mod s3;

use std::path::PathBuf;

use crate::ci::CiContext;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::schema::Benchmark;

pub use ga_cache::GaCacheHistoryProvider;
pub use local::LocalHistoryProvider;
pub use s3::{S3Config, S3HistoryProvider};

pub const DEFAULT_LOCAL_PATH: &str = "./benchmark_data";
pub const DEFAULT_CACHE_KEY: &str = "benchmark_data";

const EXTENSION: &str = ".csv";
const HISTORY_DIR: &str = "history";
const LATEST_DIR: &str = "latest";

pub(crate) fn latest_key(branch: &str) -> String {
    format!("{LATEST_DIR}/{branch}{EXTENSION}")
}

pub(crate) fn history_key(commit_sha: &str) -> String {
    format!("{HISTORY_DIR}/{commit_sha}{EXTENSION}")
}

/// Read/write access to stored runs. Lookups of missing entries return `Ok(None)`;
/// every other failure is an error.
pub trait HistoryProvider {
    fn provider_info(&self) -> String;
    fn read_latest_in_branch(&self, branch: &str) -> Result<Option<Benchmark>>;
    fn write_latest_in_branch(&self, branch: &str, benchmark: &Benchmark) -> Result<()>;
    fn read_history(&self) -> Result<Vec<Benchmark>>;
    fn read_history_commit(&self, commit_sha: &str) -> Result<Option<Benchmark>>;
    fn write_to_history(&self, benchmark: &Benchmark) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryLocation {
    Local(PathBuf),
    GaCache(String),
    S3,
}

/// Explicit option first, then GA cache under Github Actions, else a local directory.
pub fn resolve_history_location(opts: &Options, ci: &CiContext) -> Result<HistoryLocation> {
    let explicit = [
        opts.history_local.is_some(),
        opts.history_ga_cache.is_some(),
        opts.history_s3,
    ];
    if explicit.iter().filter(|set| **set).count() > 1 {
        return Err(Error::config(
            "only one of 'historyLocal', 'historyGaCache' and 'historyS3' may be set",
        ));
    }

    if let Some(path) = &opts.history_local {
        let path = path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH));
        return Ok(HistoryLocation::Local(path));
    }
    if let Some(key) = &opts.history_ga_cache {
        let key = key.clone().unwrap_or_else(|| DEFAULT_CACHE_KEY.to_string());
        return Ok(HistoryLocation::GaCache(key));
    }
    if opts.history_s3 {
        return Ok(HistoryLocation::S3);
    }

    if ci.is_ci() {
        Ok(HistoryLocation::GaCache(DEFAULT_CACHE_KEY.to_string()))
    } else {
        Ok(HistoryLocation::Local(PathBuf::from(DEFAULT_LOCAL_PATH)))
    }
}

pub fn get_history_provider(location: &HistoryLocation) -> Result<Box<dyn HistoryProvider>> {
    let provider: Box<dyn HistoryProvider> = match location {
        HistoryLocation::Local(path) => Box::new(LocalHistoryProvider::new(path)),
        HistoryLocation::GaCache(key) => Box::new(GaCacheHistoryProvider::from_env(key)?),
        HistoryLocation::S3 => Box::new(S3HistoryProvider::new(S3Config::from_env()?)?),
    };
    Ok(provider)
}

/// Forced value wins, then the explicit branch list, then only the default branch.
pub fn should_persist(opts: &Options, branch: &str, default_branch: impl FnOnce() -> Result<String>) -> Result<bool> {
    if let Some(persist) = opts.persist {
        return Ok(persist);
    }
    if let Some(branches) = &opts.persist_branches {
        return Ok(branches.iter().any(|b| b == branch));
    }
    Ok(default_branch()? == branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::CiEvent;

    fn ci() -> CiContext {
        CiContext {
            event: Some(CiEvent::Other("workflow_dispatch".to_string())),
            ..CiContext::local()
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(latest_key("dev/feat1"), "latest/dev/feat1.csv");
        assert_eq!(history_key("abc"), "history/abc.csv");
    }

    #[test]
    fn test_location_defaults() {
        let opts = Options::default();
        assert_eq!(
            resolve_history_location(&opts, &CiContext::local()).unwrap(),
            HistoryLocation::Local(PathBuf::from(DEFAULT_LOCAL_PATH))
        );
        assert_eq!(
            resolve_history_location(&opts, &ci()).unwrap(),
            HistoryLocation::GaCache(DEFAULT_CACHE_KEY.to_string())
        );
    }

    #[test]
    fn test_location_explicit() {
        let opts = Options {
            history_local: Some(Some(PathBuf::from("/tmp/x"))),
            ..Options::default()
        };
        assert_eq!(
            resolve_history_location(&opts, &ci()).unwrap(),
            HistoryLocation::Local(PathBuf::from("/tmp/x"))
        );

        let opts = Options {
            history_ga_cache: Some(None),
            ..Options::default()
        };
        assert_eq!(
            resolve_history_location(&opts, &CiContext::local()).unwrap(),
            HistoryLocation::GaCache(DEFAULT_CACHE_KEY.to_string())
        );
    }

    #[test]
    fn test_location_conflict() {
        let opts = Options {
            history_local: Some(None),
            history_s3: true,
            ..Options::default()
        };
        assert!(matches!(
            resolve_history_location(&opts, &CiContext::local()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_should_persist() {
        let never_called = || -> Result<String> { panic!("default branch not needed") };

        let forced = Options {
            persist: Some(false),
            persist_branches: Some(vec!["main".to_string()]),
            ..Options::default()
        };
        assert!(!should_persist(&forced, "main", never_called).unwrap());

        let listed = Options {
            persist_branches: Some(vec!["main".to_string(), "release".to_string()]),
            ..Options::default()
        };
        assert!(should_persist(&listed, "release", never_called).unwrap());
        assert!(!should_persist(&listed, "feat", never_called).unwrap());

        let default = Options::default();
        assert!(should_persist(&default, "main", || Ok("main".to_string())).unwrap());
        assert!(!should_persist(&default, "feat", || Ok("main".to_string())).unwrap());
    }
}
