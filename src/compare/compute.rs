use std::collections::HashMap;

use crate::schema::{Benchmark, BenchmarkComparison, BenchmarkResult, ResultComparison};

/// Diffs `curr` against `prev`. Output order follows `curr.results`; ids only present
/// in the baseline are dropped and ids missing from it are never failures.
pub fn compute_bench_comparison(
    curr: &Benchmark,
    prev: Option<&Benchmark>,
    threshold: f64,
) -> BenchmarkComparison {
    let prev_results: HashMap<&str, &BenchmarkResult> = prev
        .map(|bench| bench.results.iter().map(|r| (r.id.as_str(), r)).collect())
        .unwrap_or_default();

    let results: Vec<ResultComparison> = curr
        .results
        .iter()
        .map(|curr_result| match prev_results.get(curr_result.id.as_str()) {
            Some(prev_result) => {
                let ratio = curr_result.average_ns / prev_result.average_ns;
                let threshold = curr_result.threshold.unwrap_or(threshold);
                ResultComparison {
                    id: curr_result.id.clone(),
                    curr_average_ns: curr_result.average_ns,
                    prev_average_ns: Some(prev_result.average_ns),
                    ratio: Some(ratio),
                    is_failed: is_failed(ratio, threshold),
                    is_improved: is_improved(ratio, threshold),
                }
            }
            None => ResultComparison {
                id: curr_result.id.clone(),
                curr_average_ns: curr_result.average_ns,
                prev_average_ns: None,
                ratio: None,
                is_failed: false,
                is_improved: false,
            },
        })
        .collect();

    BenchmarkComparison {
        curr_commit_sha: curr.commit_sha.clone(),
        prev_commit_sha: prev.map(|bench| bench.commit_sha.clone()),
        some_failed: results.iter().any(|r| r.is_failed),
        results,
    }
}

// A zero baseline gives +inf (or NaN for 0/0); both must trip a finite threshold.
pub(crate) fn is_failed(ratio: f64, threshold: f64) -> bool {
    if ratio.is_nan() {
        return threshold.is_finite();
    }
    ratio > threshold
}

pub(crate) fn is_improved(ratio: f64, threshold: f64) -> bool {
    ratio < 1.0 / threshold
}
