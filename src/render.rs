//! Human readable output: terminal rows and the markdown comparison report.

use std::fmt::Write;

use crate::compare::compute::{is_failed, is_improved};
use crate::schema::{BenchmarkComparison, BenchmarkResult, ResultComparison};

const ID_WIDTH: usize = 64;
const PRECISION: usize = 7;

const RED: &str = "\u{1b}[91m";
const GREEN: &str = "\u{1b}[92m";
const RESET: &str = "\u{1b}[0m";

/// Scales nanoseconds to the largest unit that keeps the value above 1.
pub fn pretty_time(nano_sec: f64) -> (f64, &'static str) {
    if nano_sec > 1e9 {
        (nano_sec / 1e9, " s")
    } else if nano_sec > 1e6 {
        (nano_sec / 1e6, "ms")
    } else if nano_sec > 1e3 {
        (nano_sec / 1e3, "us")
    } else {
        (nano_sec, "ns")
    }
}

/// `toPrecision`-like formatting: `digits` significant digits, no exponent.
fn to_precision(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let magnitude = value.abs().log10().floor() as i64;
    let decimals = (digits as i64 - 1 - magnitude).max(0) as usize;
    format!("{value:.decimals$}")
}

fn pretty_time_str(nano_sec: f64) -> String {
    let (value, unit) = pretty_time(nano_sec);
    format!("{} {unit}", to_precision(value, 5))
}

/// One terminal line per benchmark:
///
/// ```text
/// sum array with reduce          7219.330 ops/s   138.5170 us/op   x1.012   371 runs   0.501 s
/// ```
pub fn format_result_row(
    result: &BenchmarkResult,
    prev: Option<&BenchmarkResult>,
    threshold: f64,
) -> String {
    let ops_per_sec = 1e9 / result.average_ns;
    let (average_time, time_unit) = pretty_time(result.average_ns);
    let threshold = result.threshold.unwrap_or(threshold);

    let id: String = result.id.chars().take(ID_WIDTH).collect();
    format!(
        "{id:<width$} {:>11} ops/s {:>11} {time_unit}/op {} {:>10} runs {:>6} s",
        to_precision(ops_per_sec, PRECISION),
        to_precision(average_time, PRECISION),
        ratio_cell(result, prev, threshold),
        result.runs_done,
        to_precision(result.total_ms as f64 / 1000.0, 3),
        width = ID_WIDTH,
    )
}

fn ratio_cell(result: &BenchmarkResult, prev: Option<&BenchmarkResult>, threshold: f64) -> String {
    let Some(prev) = prev else {
        return format!("{:>8}", "-");
    };
    let ratio = result.average_ns / prev.average_ns;
    let cell = format!("{:>8}", format!("x{ratio:.3}"));
    if is_failed(ratio, threshold) {
        format!("{RED}{cell}{RESET}")
    } else if is_improved(ratio, threshold) {
        format!("{GREEN}{cell}{RESET}")
    } else {
        cell
    }
}

/// Markdown report. When something regressed, the failed rows are listed on top
/// and the full table is folded below.
pub fn render_comment(comparison: &BenchmarkComparison) -> String {
    let mut out = String::new();
    if comparison.some_failed {
        let failed: Vec<&ResultComparison> = comparison.results.iter().filter(|r| r.is_failed).collect();
        out.push_str("# :warning: **Performance Alert** :warning:\n\n");
        out.push_str("Possible performance regression was detected for some benchmarks.\n");
        out.push_str(
            "Benchmark result of this commit is worse than the previous benchmark result exceeding threshold.\n\n",
        );
        out.push_str(&render_table(&failed, comparison));
    } else {
        out.push_str("# Performance Report\n");
    }

    let all: Vec<&ResultComparison> = comparison.results.iter().collect();
    let _ = write!(out, "\n<details>\n\n{}\n</details>\n", render_table(&all, comparison));
    out
}

fn render_table(rows: &[&ResultComparison], comparison: &BenchmarkComparison) -> String {
    let prev = comparison.prev_commit_sha.as_deref().unwrap_or("-");
    let mut table = format!(
        "| Benchmark suite | Previous: {prev} | Current: {} | Ratio |\n|-|-|-|-|\n",
        comparison.curr_commit_sha
    );
    for r in rows {
        let line = match (r.prev_average_ns, r.ratio) {
            (Some(prev_ns), Some(ratio)) => format!(
                "| `{}` | `{}` | `{}` | `{ratio:.2}` |",
                r.id,
                pretty_time_str(prev_ns),
                pretty_time_str(r.curr_average_ns),
            ),
            _ => format!("| `{}` | | `{}` | |", r.id, pretty_time_str(r.curr_average_ns)),
        };
        table.push_str(&line);
        table.push('\n');
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, average_ns: f64) -> BenchmarkResult {
        BenchmarkResult {
            id: id.to_string(),
            average_ns,
            runs_done: 371,
            total_ms: 501,
            threshold: None,
        }
    }

    fn comparison(some_failed: bool) -> BenchmarkComparison {
        BenchmarkComparison {
            curr_commit_sha: "c2".to_string(),
            prev_commit_sha: Some("c1".to_string()),
            some_failed,
            results: vec![
                ResultComparison {
                    id: "fast".to_string(),
                    curr_average_ns: 1500.0,
                    prev_average_ns: Some(1400.0),
                    ratio: Some(1500.0 / 1400.0),
                    is_failed: false,
                    is_improved: false,
                },
                ResultComparison {
                    id: "slow".to_string(),
                    curr_average_ns: 3e6,
                    prev_average_ns: Some(1e6),
                    ratio: Some(3.0),
                    is_failed: some_failed,
                    is_improved: false,
                },
                ResultComparison {
                    id: "new".to_string(),
                    curr_average_ns: 20.0,
                    prev_average_ns: None,
                    ratio: None,
                    is_failed: false,
                    is_improved: false,
                },
            ],
        }
    }

    #[test]
    fn test_pretty_time() {
        assert_eq!(pretty_time(500.0), (500.0, "ns"));
        assert_eq!(pretty_time(2_500.0), (2.5, "us"));
        assert_eq!(pretty_time(3e6 + 1.0).1, "ms");
        assert_eq!(pretty_time(4e9).1, " s");
    }

    #[test]
    fn test_to_precision() {
        assert_eq!(to_precision(138.517, 7), "138.5170");
        assert_eq!(to_precision(7219.33, 7), "7219.330");
        assert_eq!(to_precision(0.501, 3), "0.501");
        assert_eq!(to_precision(12345678.0, 5), "12345678");
    }

    #[test]
    fn test_row_colors_ratio() {
        let curr = result("a", 300.0);
        let slow = format_result_row(&curr, Some(&result("a", 100.0)), 2.0);
        assert!(slow.contains(RED));
        assert!(slow.contains("x3.000"));

        let fast = format_result_row(&result("a", 10.0), Some(&result("a", 100.0)), 2.0);
        assert!(fast.contains(GREEN));

        let first = format_result_row(&curr, None, 2.0);
        assert!(!first.contains(RED) && !first.contains(GREEN));
        assert!(first.starts_with(&format!("{:<64}", "a")));
        assert!(first.contains("371 runs"));
    }

    #[test]
    fn test_row_color_matches_verdict_on_zero_baseline() {
        let zero = result("z", 0.0);
        let row = format_result_row(&zero, Some(&zero), 2.0);
        assert!(row.contains(RED), "{row}");
        assert!(row.contains("xNaN"));

        let row = format_result_row(&zero, Some(&zero), f64::INFINITY);
        assert!(!row.contains(RED) && !row.contains(GREEN));
    }

    #[test]
    fn test_comment_without_regression() {
        let body = render_comment(&comparison(false));
        assert!(body.starts_with("# Performance Report"));
        assert!(!body.contains("Performance Alert"));
        assert!(body.contains("| Benchmark suite | Previous: c1 | Current: c2 | Ratio |"));
        assert!(body.contains("| `new` | | `20.000 ns` | |"));
    }

    #[test]
    fn test_comment_with_regression_lists_failed_first() {
        let body = render_comment(&comparison(true));
        assert!(body.starts_with("# :warning: **Performance Alert**"));
        let (top, details) = body.split_once("<details>").unwrap();
        assert!(top.contains("`slow`"));
        assert!(!top.contains("`fast`"));
        assert!(details.contains("`fast`") && details.contains("`slow`"));
        assert!(details.contains("`3.00`"));
    }
}
