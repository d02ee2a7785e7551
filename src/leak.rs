//! Growth heuristics over a window of memory samples.
//!
//! A policy looks at `rss` and `heap_used` across the sampling window and
//! reports how much each grew. Both strategies are deliberately cheap; they are
//! meant to flag sustained growth for a human to look at, not to prove a leak.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::monitor::MemorySample;

/// Fewer samples than this and no verdict is given.
pub const MIN_LEAK_SAMPLES: usize = 10;

/// Relative growth above which a window is flagged as a likely leak.
pub const DEFAULT_GROWTH_THRESHOLD: f64 = 0.20;

/// Growth of one counter across the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub growth_bytes: i64,
    /// Growth relative to the start of the window; 0 when the baseline is 0.
    pub growth_ratio: f64,
}

impl Trend {
    fn new(baseline: f64, growth: f64) -> Self {
        let growth_ratio = if baseline > 0.0 { growth / baseline } else { 0.0 };
        Self {
            growth_bytes: growth.round() as i64,
            growth_ratio,
        }
    }
}

/// Verdict of a leak check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakReport {
    pub strategy: LeakStrategy,
    pub samples: usize,
    pub rss: Trend,
    pub heap_used: Trend,
    pub likely_leak: bool,
}

/// Replaceable growth heuristic.
pub trait LeakPolicy: Send + Sync {
    fn strategy(&self) -> LeakStrategy;

    /// Evaluates a non-empty, time-ordered window.
    fn evaluate(&self, window: &[MemorySample]) -> LeakReport;
}

/// Built-in strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeakStrategy {
    /// Mean of the newer half against the mean of the older half.
    #[default]
    HalfMean,
    /// Least-squares slope projected across the window span.
    Slope,
}

impl LeakStrategy {
    pub fn policy(self, threshold: f64) -> Box<dyn LeakPolicy> {
        match self {
            LeakStrategy::HalfMean => Box::new(HalfMeanGrowth { threshold }),
            LeakStrategy::Slope => Box::new(LinearSlope { threshold }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeakStrategy::HalfMean => "half-mean",
            LeakStrategy::Slope => "slope",
        }
    }
}

impl fmt::Display for LeakStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeakStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "half-mean" => Ok(LeakStrategy::HalfMean),
            "slope" => Ok(LeakStrategy::Slope),
            other => Err(format!(
                "Invalid leak strategy '{}', expected 'half-mean' or 'slope'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HalfMeanGrowth {
    pub threshold: f64,
}

impl HalfMeanGrowth {
    fn trend(&self, window: &[MemorySample], field: fn(&MemorySample) -> u64) -> Trend {
        let half = window.len() / 2;
        if half == 0 {
            return Trend::default();
        }
        let older = mean(&window[..half], field);
        let newer = mean(&window[window.len() - half..], field);
        Trend::new(older, newer - older)
    }
}

impl LeakPolicy for HalfMeanGrowth {
    fn strategy(&self) -> LeakStrategy {
        LeakStrategy::HalfMean
    }

    fn evaluate(&self, window: &[MemorySample]) -> LeakReport {
        let rss = self.trend(window, |s| s.rss);
        let heap_used = self.trend(window, |s| s.heap_used);
        report(self.strategy(), window.len(), rss, heap_used, self.threshold)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinearSlope {
    pub threshold: f64,
}

impl LinearSlope {
    fn trend(&self, window: &[MemorySample], field: fn(&MemorySample) -> u64) -> Trend {
        let n = window.len();
        if n < 2 {
            return Trend::default();
        }

        let t0 = window[0].timestamp;
        let mut xs: Vec<f64> = window
            .iter()
            .map(|s| (s.timestamp - t0) as f64 / 1000.0)
            .collect();
        // Identical timestamps carry no time axis; fall back to sample order.
        if xs.iter().all(|&x| x == xs[0]) {
            xs = (0..n).map(|i| i as f64).collect();
        }
        let ys: Vec<f64> = window.iter().map(|s| field(s) as f64).collect();

        let x_mean = xs.iter().sum::<f64>() / n as f64;
        let y_mean = ys.iter().sum::<f64>() / n as f64;
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        for (x, y) in xs.iter().zip(&ys) {
            sxy += (x - x_mean) * (y - y_mean);
            sxx += (x - x_mean) * (x - x_mean);
        }
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };

        let x_first = xs[0];
        let x_last = xs[n - 1];
        let baseline = y_mean - slope * (x_mean - x_first);
        Trend::new(baseline, slope * (x_last - x_first))
    }
}

impl LeakPolicy for LinearSlope {
    fn strategy(&self) -> LeakStrategy {
        LeakStrategy::Slope
    }

    fn evaluate(&self, window: &[MemorySample]) -> LeakReport {
        let rss = self.trend(window, |s| s.rss);
        let heap_used = self.trend(window, |s| s.heap_used);
        report(self.strategy(), window.len(), rss, heap_used, self.threshold)
    }
}

fn report(
    strategy: LeakStrategy,
    samples: usize,
    rss: Trend,
    heap_used: Trend,
    threshold: f64,
) -> LeakReport {
    LeakReport {
        strategy,
        samples,
        likely_leak: rss.growth_ratio > threshold || heap_used.growth_ratio > threshold,
        rss,
        heap_used,
    }
}

fn mean(samples: &[MemorySample], field: fn(&MemorySample) -> u64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| field(s) as f64).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn window(values: &[u64]) -> Vec<MemorySample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| MemorySample {
                timestamp: 1_000 + i as i64 * 1_000,
                heap_used: v,
                heap_total: v * 2,
                external: 0,
                rss: v,
            })
            .collect()
    }

    #[test]
    fn test_flat_window_is_not_a_leak() {
        let w = window(&[100 * MB; 12]);
        for strategy in [LeakStrategy::HalfMean, LeakStrategy::Slope] {
            let report = strategy.policy(DEFAULT_GROWTH_THRESHOLD).evaluate(&w);
            assert!(!report.likely_leak, "{strategy} flagged a flat window");
            assert_eq!(report.rss.growth_bytes, 0);
            assert_eq!(report.samples, 12);
        }
    }

    #[test]
    fn test_steady_growth_is_flagged() {
        let values: Vec<u64> = (0..10).map(|i| (100 + i * 10) * MB).collect();
        let w = window(&values);
        for strategy in [LeakStrategy::HalfMean, LeakStrategy::Slope] {
            let report = strategy.policy(DEFAULT_GROWTH_THRESHOLD).evaluate(&w);
            assert!(report.likely_leak, "{strategy} missed steady growth");
            assert!(report.heap_used.growth_bytes > 0);
            assert_eq!(report.strategy, strategy);
        }
    }

    #[test]
    fn test_half_mean_growth_figures() {
        // older half mean 100 MB, newer half mean 150 MB
        let w = window(&[100 * MB, 100 * MB, 150 * MB, 150 * MB]);
        let report = HalfMeanGrowth { threshold: 0.6 }.evaluate(&w);
        assert_eq!(report.rss.growth_bytes, (50 * MB) as i64);
        assert!((report.rss.growth_ratio - 0.5).abs() < 1e-9);
        assert!(!report.likely_leak);
    }

    #[test]
    fn test_half_mean_skips_middle_of_odd_window() {
        let w = window(&[100, 999_999, 100]);
        let report = HalfMeanGrowth { threshold: 0.1 }.evaluate(&w);
        assert_eq!(report.rss.growth_bytes, 0);
    }

    #[test]
    fn test_shrinking_window_is_not_a_leak() {
        let values: Vec<u64> = (0..10).map(|i| (200 - i * 10) * MB).collect();
        let w = window(&values);
        for strategy in [LeakStrategy::HalfMean, LeakStrategy::Slope] {
            let report = strategy.policy(DEFAULT_GROWTH_THRESHOLD).evaluate(&w);
            assert!(!report.likely_leak);
            assert!(report.rss.growth_ratio < 0.0);
        }
    }

    #[test]
    fn test_slope_projects_over_span() {
        // +1 MB per second over 9 seconds
        let values: Vec<u64> = (0..10).map(|i| (10 + i) * MB).collect();
        let report = LinearSlope { threshold: 0.5 }.evaluate(&window(&values));
        assert_eq!(report.rss.growth_bytes, (9 * MB) as i64);
        assert!((report.rss.growth_ratio - 0.9).abs() < 1e-9);
        assert!(report.likely_leak);
    }

    #[test]
    fn test_slope_with_identical_timestamps_uses_order() {
        let mut w = window(&[10, 20, 30]);
        for s in &mut w {
            s.timestamp = 5;
        }
        let report = LinearSlope { threshold: 0.5 }.evaluate(&w);
        assert_eq!(report.rss.growth_bytes, 20);
    }

    #[test]
    fn test_zero_baseline_has_zero_ratio() {
        let report = HalfMeanGrowth { threshold: 0.1 }.evaluate(&window(&[0, 0, 50, 50]));
        assert_eq!(report.rss.growth_ratio, 0.0);
        assert!(!report.likely_leak);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("half-mean".parse::<LeakStrategy>(), Ok(LeakStrategy::HalfMean));
        assert_eq!("slope".parse::<LeakStrategy>(), Ok(LeakStrategy::Slope));
        assert!("median".parse::<LeakStrategy>().is_err());
        assert_eq!(LeakStrategy::Slope.to_string(), "slope");
    }
}
