//! Adaptive sampler.
//!
//! Runs a function repeatedly, drops warm-up samples and stops once the running
//! average has converged, or when a run/time ceiling is hit. Samples are taken
//! strictly one after another on the calling thread.

use std::convert::Infallible;
use std::hint::black_box;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::schema::BenchmarkResult;

pub const DEFAULT_MIN_RUNS: u64 = 1;
pub const DEFAULT_MIN_MS: u64 = 100;
pub const DEFAULT_MAX_WARM_UP_MS: u64 = 500;
pub const DEFAULT_MAX_WARM_UP_RUNS: u64 = 1000;
pub const DEFAULT_CONVERGE_FACTOR: f64 = 0.5 / 100.0;

/// Share of `max_ms` warm-up may take before it is cut short.
const MAX_WARM_UP_RATIO: f64 = 0.5;
/// Interval between two convergence checks.
const SAMPLE_EVERY: Duration = Duration::from_millis(100);

/// Sampler and threshold options as the user writes them. Every field is optional so
/// that suite-level and bench-level options can be layered with [`BenchOpts::merge`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchOpts {
    /// Min measured runs before the convergence stop is honored.
    pub min_runs: Option<u64>,
    /// Max measured runs, after which the benchmark stops.
    pub max_runs: Option<u64>,
    /// Min total milliseconds before the convergence stop is honored.
    pub min_ms: Option<u64>,
    /// Max total milliseconds, warm-up included, after which the benchmark stops.
    pub max_ms: Option<u64>,
    /// Max accumulated warm-up sample time. 0 disables warm-up.
    pub max_warm_up_ms: Option<u64>,
    /// Max warm-up runs. 0 disables warm-up.
    pub max_warm_up_runs: Option<u64>,
    /// Relative change of the running average under which the loop may stop.
    pub converge_factor: Option<f64>,
    /// Repetitions performed by one call, divides the reported average.
    pub runs_factor: Option<f64>,
    /// Yield to the scheduler after each timed call.
    pub yield_after_each: Option<bool>,
    /// Ratio above which this benchmark counts as a regression.
    pub threshold: Option<f64>,
    /// Same as `threshold = Infinity`.
    pub no_threshold: Option<bool>,
}

impl BenchOpts {
    /// Layers `other` on top of `self`; fields set in `other` win.
    pub fn merge(&self, other: &BenchOpts) -> BenchOpts {
        BenchOpts {
            min_runs: other.min_runs.or(self.min_runs),
            max_runs: other.max_runs.or(self.max_runs),
            min_ms: other.min_ms.or(self.min_ms),
            max_ms: other.max_ms.or(self.max_ms),
            max_warm_up_ms: other.max_warm_up_ms.or(self.max_warm_up_ms),
            max_warm_up_runs: other.max_warm_up_runs.or(self.max_warm_up_runs),
            converge_factor: other.converge_factor.or(self.converge_factor),
            runs_factor: other.runs_factor.or(self.runs_factor),
            yield_after_each: other.yield_after_each.or(self.yield_after_each),
            threshold: other.threshold.or(self.threshold),
            no_threshold: other.no_threshold.or(self.no_threshold),
        }
    }

    /// Threshold attached to the produced result, `None` means run-level default.
    pub fn result_threshold(&self) -> Option<f64> {
        if self.no_threshold == Some(true) {
            Some(f64::INFINITY)
        } else {
            self.threshold
        }
    }
}

/// Options with defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    pub min_runs: u64,
    pub max_runs: u64,
    pub min_ms: Duration,
    pub max_ms: Option<Duration>,
    pub max_warm_up: Duration,
    pub max_warm_up_runs: u64,
    pub converge_factor: f64,
    pub runs_factor: f64,
    pub yield_after_each: bool,
}

impl From<&BenchOpts> for SamplerConfig {
    fn from(opts: &BenchOpts) -> Self {
        // Zero means "not set" for everything but the warm-up limits, where 0 disables warm-up.
        let positive = |v: Option<u64>| v.filter(|v| *v > 0);
        Self {
            min_runs: positive(opts.min_runs).unwrap_or(DEFAULT_MIN_RUNS),
            max_runs: positive(opts.max_runs).unwrap_or(u64::MAX),
            min_ms: Duration::from_millis(positive(opts.min_ms).unwrap_or(DEFAULT_MIN_MS)),
            max_ms: positive(opts.max_ms).map(Duration::from_millis),
            max_warm_up: Duration::from_millis(opts.max_warm_up_ms.unwrap_or(DEFAULT_MAX_WARM_UP_MS)),
            max_warm_up_runs: opts.max_warm_up_runs.unwrap_or(DEFAULT_MAX_WARM_UP_RUNS),
            converge_factor: opts
                .converge_factor
                .filter(|f| *f > 0.0)
                .unwrap_or(DEFAULT_CONVERGE_FACTOR),
            runs_factor: opts.runs_factor.filter(|f| *f > 0.0).unwrap_or(1.0),
            yield_after_each: opts.yield_after_each.unwrap_or(false),
        }
    }
}

impl SamplerConfig {
    fn max_ms_display(&self) -> u64 {
        self.max_ms.map_or(u64::MAX, |d| d.as_millis() as u64)
    }
}

#[derive(Debug, Error)]
pub enum SamplerError<E> {
    /// The benchmarked function or one of its hooks failed.
    #[error("{0}")]
    Function(E),
    #[error(
        "no run was completed before 'maxMs' {max_ms}, but did {warm_up_runs} warm-up runs. \
         Consider adjusting 'maxWarmUpMs' or 'maxWarmUpRuns' options or extend 'maxMs' \
         if your function is very slow"
    )]
    WarmUpExhausted { max_ms: u64, warm_up_runs: u64 },
    #[error(
        "no run was completed before 'maxMs' {max_ms}. Consider extending the 'maxMs' time \
         if either the before, before_each or bench functions are too slow"
    )]
    NoSample { max_ms: u64 },
}

#[derive(Clone, Debug)]
pub struct Measured {
    pub result: BenchmarkResult,
    pub warm_up_runs: u64,
    pub total_ns: u128,
    /// Raw duration of every measured run, only filled when requested.
    pub runs_ns: Vec<u64>,
}

/// Samples `f` with a one-time `before` hook whose output is handed to `before_each`,
/// which builds the input of every call. Hook time is never part of a sample.
pub fn run_bench_fn<C, T, R, E>(
    id: &str,
    opts: &BenchOpts,
    persist_runs_ns: bool,
    before: impl FnOnce() -> Result<C, E>,
    mut before_each: impl FnMut(&mut C, u64) -> Result<T, E>,
    mut f: impl FnMut(T) -> Result<R, E>,
) -> Result<Measured, SamplerError<E>> {
    let cfg = SamplerConfig::from(opts);
    let max_warm_up_ns = cfg.max_warm_up.as_nanos();

    let mut runs_ns = Vec::new();
    let mut run_idx: u64 = 0;
    let mut total_ns: u128 = 0;
    let mut total_warm_up_ns: u128 = 0;
    let mut total_warm_up_runs: u64 = 0;
    let mut prev_avg0 = 0.0_f64;
    let mut prev_avg1 = 0.0_f64;
    let mut is_warm_up = max_warm_up_ns > 0 && cfg.max_warm_up_runs > 0;

    // `before` runs inside the `max_ms` budget.
    let start = Instant::now();
    let mut last_convergence_sample = start;

    let mut ctx = before().map_err(SamplerError::Function)?;

    loop {
        let elapsed = start.elapsed();
        if cfg.max_ms.is_some_and(|max| elapsed >= max) || run_idx >= cfg.max_runs {
            debug!(id, runs = run_idx, "hard limit reached");
            break;
        }

        let input = before_each(&mut ctx, run_idx).map_err(SamplerError::Function)?;

        let sample_start = Instant::now();
        let out = f(input);
        let run_ns = sample_start.elapsed().as_nanos();
        black_box(out.map_err(SamplerError::Function)?);

        if cfg.yield_after_each {
            std::thread::yield_now();
        }

        if is_warm_up {
            total_warm_up_runs += 1;
            total_warm_up_ns += run_ns;

            let warm_up_share_exceeded = cfg
                .max_ms
                .is_some_and(|max| elapsed.as_secs_f64() / max.as_secs_f64() >= MAX_WARM_UP_RATIO);
            if total_warm_up_ns >= max_warm_up_ns
                || total_warm_up_runs >= cfg.max_warm_up_runs
                || warm_up_share_exceeded
            {
                is_warm_up = false;
            }
            continue;
        }

        run_idx += 1;
        total_ns += run_ns;
        if persist_runs_ns {
            runs_ns.push(u64::try_from(run_ns).unwrap_or(u64::MAX));
        }

        // Two previous averages give a rough first and second order trend.
        if last_convergence_sample.elapsed() > SAMPLE_EVERY {
            last_convergence_sample = Instant::now();
            let a = prev_avg0;
            let b = prev_avg1;
            let c = total_ns as f64 / run_idx as f64;

            let may_stop = run_idx >= cfg.min_runs && start.elapsed() >= cfg.min_ms;
            if may_stop {
                let linear = (c - a).abs();
                let quadratic = (b - (a + c) / 2.0).abs();
                let convergence = linear.max(quadratic) / a;
                if convergence < cfg.converge_factor {
                    debug!(id, runs = run_idx, convergence, "average converged");
                    break;
                }
            }

            prev_avg0 = prev_avg1;
            prev_avg1 = c;
        }
    }

    if run_idx == 0 {
        let max_ms = cfg.max_ms_display();
        return Err(if total_warm_up_runs > 0 {
            SamplerError::WarmUpExhausted {
                max_ms,
                warm_up_runs: total_warm_up_runs,
            }
        } else {
            SamplerError::NoSample { max_ms }
        });
    }

    let average_ns = total_ns as f64 / run_idx as f64 / cfg.runs_factor;

    Ok(Measured {
        result: BenchmarkResult {
            id: id.to_string(),
            average_ns,
            runs_done: run_idx,
            total_ms: start.elapsed().as_millis() as u64,
            threshold: opts.result_threshold(),
        },
        warm_up_runs: total_warm_up_runs,
        total_ns,
        runs_ns,
    })
}

/// Samples a function without hooks.
pub fn measure_fn<R>(
    id: &str,
    opts: &BenchOpts,
    mut f: impl FnMut() -> R,
) -> Result<Measured, SamplerError<Infallible>> {
    run_bench_fn(
        id,
        opts,
        false,
        || Ok(()),
        |_, _| Ok(()),
        |()| Ok::<_, Infallible>(f()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_opts() -> BenchOpts {
        BenchOpts {
            min_ms: Some(1),
            max_warm_up_ms: Some(0),
            max_warm_up_runs: Some(0),
            ..Default::default()
        }
    }

    fn spin(n: u64) -> u64 {
        (0..n).fold(0u64, |acc, x| acc.wrapping_add(black_box(x)))
    }

    #[test]
    fn test_defaults() {
        let cfg = SamplerConfig::from(&BenchOpts::default());
        assert_eq!(cfg.min_runs, 1);
        assert_eq!(cfg.max_runs, u64::MAX);
        assert_eq!(cfg.min_ms, Duration::from_millis(100));
        assert_eq!(cfg.max_ms, None);
        assert_eq!(cfg.max_warm_up, Duration::from_millis(500));
        assert_eq!(cfg.max_warm_up_runs, 1000);
        assert_eq!(cfg.converge_factor, 0.005);
        assert_eq!(cfg.runs_factor, 1.0);
        assert!(!cfg.yield_after_each);
    }

    #[test]
    fn test_merge_prefers_inner_opts() {
        let suite = BenchOpts {
            max_ms: Some(1000),
            min_runs: Some(5),
            ..Default::default()
        };
        let bench = BenchOpts {
            max_ms: Some(50),
            ..Default::default()
        };
        let merged = suite.merge(&bench);
        assert_eq!(merged.max_ms, Some(50));
        assert_eq!(merged.min_runs, Some(5));
    }

    #[test]
    fn test_zero_warm_up_measures_first_call() {
        let mut calls = 0u64;
        let opts = BenchOpts {
            max_runs: Some(1),
            ..fast_opts()
        };
        let m = measure_fn("first", &opts, || calls += 1).unwrap();
        assert_eq!(calls, 1);
        assert_eq!(m.warm_up_runs, 0);
        assert_eq!(m.result.runs_done, 1);
    }

    #[test]
    fn test_never_exceeds_max_runs() {
        let opts = BenchOpts {
            max_runs: Some(25),
            min_runs: Some(1000),
            ..fast_opts()
        };
        let m = measure_fn("capped", &opts, || spin(10)).unwrap();
        assert_eq!(m.result.runs_done, 25);
    }

    #[test]
    fn test_warm_up_runs_are_not_measured() {
        let opts = BenchOpts {
            max_runs: Some(10),
            max_warm_up_runs: Some(7),
            max_warm_up_ms: Some(10_000),
            min_ms: Some(1),
            ..Default::default()
        };
        let mut calls = 0u64;
        let m = measure_fn("warm", &opts, || calls += 1).unwrap();
        assert_eq!(m.warm_up_runs, 7);
        assert_eq!(m.result.runs_done, 10);
        assert_eq!(calls, 17);
    }

    #[test]
    fn test_min_floors_hold_despite_convergence() {
        let opts = BenchOpts {
            min_ms: Some(250),
            min_runs: Some(50),
            max_ms: Some(5_000),
            converge_factor: Some(0.99),
            ..fast_opts()
        };
        let m = measure_fn("floors", &opts, || spin(100)).unwrap();
        assert!(m.result.runs_done >= 50);
        assert!(m.result.total_ms >= 250, "stopped at {}ms", m.result.total_ms);
    }

    #[test]
    fn test_converged_average_stops_early() {
        let opts = BenchOpts {
            min_ms: Some(1),
            max_ms: Some(10_000),
            converge_factor: Some(0.05),
            ..fast_opts()
        };
        let m = measure_fn("steady", &opts, || std::thread::sleep(Duration::from_micros(200))).unwrap();
        // Three checks are needed before the trend is known.
        assert!(m.result.total_ms >= 300, "stopped at {}ms", m.result.total_ms);
        assert!(m.result.total_ms < 5_000, "ran to {}ms", m.result.total_ms);
    }

    #[test]
    fn test_warm_up_cut_at_half_max_ms() {
        let opts = BenchOpts {
            max_ms: Some(200),
            max_warm_up_ms: Some(60_000),
            max_warm_up_runs: Some(u64::MAX),
            min_ms: Some(1),
            ..Default::default()
        };
        let m = measure_fn("cut", &opts, || std::thread::sleep(Duration::from_millis(5))).unwrap();
        assert!(m.warm_up_runs > 0);
        assert!(m.result.runs_done >= 1);
        assert!(m.result.total_ms >= 200);
    }

    #[test]
    fn test_stops_near_max_ms() {
        let opts = BenchOpts {
            max_ms: Some(150),
            min_ms: Some(10_000),
            ..fast_opts()
        };
        let m = measure_fn("deadline", &opts, || std::thread::sleep(Duration::from_millis(1))).unwrap();
        // One iteration may overrun the soft deadline.
        assert!(m.result.total_ms >= 150);
        assert!(m.result.total_ms < 150 + 100, "overran to {}ms", m.result.total_ms);
    }

    #[test]
    fn test_runs_factor_scales_average() {
        let opts = BenchOpts {
            max_runs: Some(5),
            runs_factor: Some(1000.0),
            ..fast_opts()
        };
        let m = measure_fn("factor", &opts, || std::thread::sleep(Duration::from_millis(1))).unwrap();
        // ~1ms per call spread over 1000 logical ops
        assert!(m.result.average_ns >= 1_000.0);
        assert!(m.result.average_ns < 1_000_000.0);
        let unscaled = m.total_ns as f64 / m.result.runs_done as f64;
        assert!((unscaled / 1000.0 - m.result.average_ns).abs() < 1e-6);
    }

    #[test]
    fn test_hooks_and_raw_samples() {
        let opts = BenchOpts {
            max_runs: Some(4),
            ..fast_opts()
        };
        let mut seen = Vec::new();
        let m = run_bench_fn(
            "hooks",
            &opts,
            true,
            || Ok::<_, String>(vec![1u64, 2, 3]),
            |base, i| Ok(base.iter().sum::<u64>() + i),
            |input| {
                seen.push(input);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(seen, vec![6, 7, 8, 9]);
        assert_eq!(m.runs_ns.len(), 4);
        assert_eq!(m.runs_ns.iter().map(|n| *n as u128).sum::<u128>(), m.total_ns);
    }

    #[test]
    fn test_function_error_propagates_unmodified() {
        let opts = fast_opts();
        let mut calls = 0;
        let err = run_bench_fn(
            "boom",
            &opts,
            false,
            || Ok(()),
            |_, _| Ok(()),
            |()| {
                calls += 1;
                if calls == 3 {
                    Err("exploded")
                } else {
                    Ok(())
                }
            },
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::Function("exploded")));
    }

    #[test]
    fn test_warm_up_exhaustion_is_reported() {
        let opts = BenchOpts {
            max_ms: Some(30),
            max_warm_up_ms: Some(60_000),
            max_warm_up_runs: Some(u64::MAX),
            ..Default::default()
        };
        // Warm-up share of maxMs is 50%, each call is longer than the whole budget.
        let err = measure_fn("slow", &opts, || std::thread::sleep(Duration::from_millis(40))).unwrap_err();
        match err {
            SamplerError::WarmUpExhausted { max_ms, warm_up_runs } => {
                assert_eq!(max_ms, 30);
                assert_eq!(warm_up_runs, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_sample_when_setup_eats_budget() {
        let opts = BenchOpts {
            max_ms: Some(20),
            ..fast_opts()
        };
        let err = run_bench_fn(
            "slow-setup",
            &opts,
            false,
            || {
                std::thread::sleep(Duration::from_millis(30));
                Ok::<_, Infallible>(())
            },
            |_, _| Ok(()),
            |()| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::NoSample { max_ms: 20 }));
        assert!(err.to_string().contains("before, before_each or bench functions"));
    }

    #[test]
    fn test_no_threshold_marks_result_infinite() {
        let opts = BenchOpts {
            max_runs: Some(1),
            no_threshold: Some(true),
            threshold: Some(3.0),
            ..fast_opts()
        };
        let m = measure_fn("inf", &opts, || ()).unwrap();
        assert_eq!(m.result.threshold, Some(f64::INFINITY));
    }
}
