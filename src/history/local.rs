use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{csv, history_key, latest_key, HistoryProvider, HISTORY_DIR};
use crate::error::{Error, Result};
use crate::schema::Benchmark;

/// History kept as one CSV file per benchmark under a directory.
#[derive(Debug, Clone)]
pub struct LocalHistoryProvider {
    dir: PathBuf,
}

impl LocalHistoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_bench_file(path: &Path) -> Result<Benchmark> {
        let data = fs::read_to_string(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str());
        csv::from_csv(&data, stem).map_err(|e| match e {
            Error::History(msg) => Error::history(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    fn read_bench_file_if_exists(path: &Path) -> Result<Option<Benchmark>> {
        match Self::read_bench_file(path) {
            Ok(bench) => Ok(Some(bench)),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_bench_file(path: &Path, benchmark: &Benchmark) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, csv::to_csv(benchmark))?;
        Ok(())
    }
}

impl HistoryProvider for LocalHistoryProvider {
    fn provider_info(&self) -> String {
        format!("LocalHistoryProvider, dirpath: {}", self.dir.display())
    }

    fn read_latest_in_branch(&self, branch: &str) -> Result<Option<Benchmark>> {
        Self::read_bench_file_if_exists(&self.dir.join(latest_key(branch)))
    }

    fn write_latest_in_branch(&self, branch: &str, benchmark: &Benchmark) -> Result<()> {
        Self::write_bench_file(&self.dir.join(latest_key(branch)), benchmark)
    }

    fn read_history(&self) -> Result<Vec<Benchmark>> {
        let history_dir = self.dir.join(HISTORY_DIR);
        if !history_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut benchmarks = Vec::new();
        for entry in WalkDir::new(&history_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::history(e.to_string()))?;
            if entry.file_type().is_file() {
                benchmarks.push(Self::read_bench_file(entry.path())?);
            }
        }
        Ok(benchmarks)
    }

    fn read_history_commit(&self, commit_sha: &str) -> Result<Option<Benchmark>> {
        Self::read_bench_file_if_exists(&self.dir.join(history_key(commit_sha)))
    }

    fn write_to_history(&self, benchmark: &Benchmark) -> Result<()> {
        Self::write_bench_file(&self.dir.join(history_key(&benchmark.commit_sha)), benchmark)
    }
}
