use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Time results for a single benchmark id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub id: String,
    /// Nanoseconds per logical operation, already divided by `runs_factor`.
    pub average_ns: f64,
    pub runs_done: u64,
    /// Wall time of the whole sampling loop, warm-up included.
    pub total_ms: u64,
    /// Per-benchmark override of the run-level ratio threshold.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "threshold_serde"
    )]
    pub threshold: Option<f64>,
}

/// Results of one full run, tied to the commit that was measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benchmark {
    pub commit_sha: String,
    pub results: Vec<BenchmarkResult>,
}

impl Benchmark {
    pub fn new(commit_sha: impl Into<String>, results: Vec<BenchmarkResult>) -> Self {
        Self {
            commit_sha: commit_sha.into(),
            results,
        }
    }

    pub fn get(&self, id: &str) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Checks data read back from storage before it is trusted as a baseline.
    pub fn validate(&self) -> Result<()> {
        if self.commit_sha.is_empty() {
            return Err(Error::invalid_benchmark("empty commitSha"));
        }
        let mut seen = HashSet::with_capacity(self.results.len());
        for result in &self.results {
            if !seen.insert(result.id.as_str()) {
                return Err(Error::invalid_benchmark(format!(
                    "duplicated id '{}' in commit {}",
                    result.id, self.commit_sha
                )));
            }
            if !result.average_ns.is_finite() || result.average_ns < 0.0 {
                return Err(Error::invalid_benchmark(format!(
                    "id '{}' has invalid averageNs {}",
                    result.id, result.average_ns
                )));
            }
            if result.runs_done == 0 {
                return Err(Error::invalid_benchmark(format!(
                    "id '{}' has runsDone 0",
                    result.id
                )));
            }
        }
        Ok(())
    }
}

/// Per-id outcome of comparing a run against its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultComparison {
    pub id: String,
    pub curr_average_ns: f64,
    pub prev_average_ns: Option<f64>,
    pub ratio: Option<f64>,
    pub is_failed: bool,
    pub is_improved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkComparison {
    pub curr_commit_sha: String,
    pub prev_commit_sha: Option<String>,
    pub some_failed: bool,
    pub results: Vec<ResultComparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub tool_version: String,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
}

/// File written by a suite with `--out` and consumed by `bench-tracker process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunMeta,
    pub results: Vec<BenchmarkResult>,
}

impl RunReport {
    pub const SCHEMA_VERSION: u32 = 1;

    pub fn new(results: Vec<BenchmarkResult>, git_sha: Option<String>) -> Self {
        Self {
            run: RunMeta {
                schema_version: Self::SCHEMA_VERSION,
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp_utc: chrono::Utc::now().to_rfc3339(),
                git_sha,
            },
            results,
        }
    }
}

/// JSON has no infinity, so an unbounded threshold travels as the string "Infinity".
pub(crate) mod threshold_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_infinite() && *v > 0.0 => {
                Repr::Text("Infinity".to_string()).serialize(serializer)
            }
            Some(v) => Repr::Number(*v).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(s)) => s
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid threshold '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, average_ns: f64) -> BenchmarkResult {
        BenchmarkResult {
            id: id.to_string(),
            average_ns,
            runs_done: 10,
            total_ms: 120,
            threshold: None,
        }
    }

    #[test]
    fn test_json_uses_camel_case() {
        let bench = Benchmark::new("abc", vec![result("a", 12.5)]);
        let json = serde_json::to_value(&bench).unwrap();
        assert_eq!(json["commitSha"], "abc");
        assert_eq!(json["results"][0]["averageNs"], 12.5);
        assert_eq!(json["results"][0]["runsDone"], 10);
        assert!(json["results"][0].get("threshold").is_none());
    }

    #[test]
    fn test_infinite_threshold_survives_json() {
        let mut r = result("a", 1.0);
        r.threshold = Some(f64::INFINITY);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"Infinity\""));
        let back: BenchmarkResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.threshold, Some(f64::INFINITY));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_runs() {
        let dup = Benchmark::new("abc", vec![result("a", 1.0), result("a", 2.0)]);
        assert!(matches!(dup.validate(), Err(Error::InvalidBenchmark(_))));

        let mut zero = result("b", 1.0);
        zero.runs_done = 0;
        assert!(Benchmark::new("abc", vec![zero]).validate().is_err());

        let ok = Benchmark::new("abc", vec![result("a", 1.0), result("b", 2.0)]);
        assert!(ok.validate().is_ok());
    }
}
