//! Descriptive statistics over propagation times.
//!
//! Percentiles interpolate linearly between the closest ranks
//! (`rank = p/100 * (n-1)`), the same convention as numpy's default. The
//! standard deviation is the sample deviation (n-1 denominator) and is 0 for
//! fewer than two values.

use serde::{Deserialize, Serialize};

/// Statistics for one set of elapsed times, in milliseconds.
///
/// Every field except `count` is `None` when there are no values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub std_dev: Option<f64>,
}

/// Compute the summary for `values` (any order).
#[must_use]
pub fn summarize(values: &[f64]) -> Summary {
    if values.is_empty() {
        return Summary::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std_dev = if n < 2 {
        0.0
    } else {
        let sum_sq: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        (sum_sq / (n - 1) as f64).sqrt()
    };

    Summary {
        count: n,
        mean: Some(mean),
        median: percentile(&sorted, 50.0),
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        std_dev: Some(std_dev),
    }
}

/// Percentile `p` (0..=100) of ascending `sorted` values.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    let (a, b) = (sorted[lower], sorted[upper]);
    Some((a + (b - a) * weight).max(a).min(b))
}

/// Bucket boundaries in milliseconds; a value lands in the first bucket whose
/// upper bound exceeds it.
const BUCKET_BOUNDS: [f64; 5] = [10.0, 50.0, 100.0, 200.0, 500.0];

/// Bucket labels, in order.
pub const BUCKET_LABELS: [&str; 6] = [
    "<10ms",
    "10-50ms",
    "50-100ms",
    "100-200ms",
    "200-500ms",
    ">=500ms",
];

/// Counts of elapsed times per latency bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyDistribution {
    counts: [usize; 6],
}

impl LatencyDistribution {
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        let mut counts = [0; 6];
        for value in values {
            let bucket = BUCKET_BOUNDS
                .iter()
                .position(|bound| value < bound)
                .unwrap_or(BUCKET_BOUNDS.len());
            counts[bucket] += 1;
        }
        Self { counts }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// `(label, count)` pairs in bucket order.
    pub fn buckets(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        BUCKET_LABELS.iter().copied().zip(self.counts.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_empty_input() {
        let summary = summarize(&[]);
        assert_eq!(summary.count, 0);
        assert!(summary.mean.is_none());
        assert!(summary.median.is_none());
        assert!(summary.p99.is_none());
        assert!(summary.std_dev.is_none());
    }

    #[test]
    fn test_single_value() {
        let summary = summarize(&[42.0]);
        assert_eq!(summary.count, 1);
        assert!(approx(summary.mean, 42.0));
        assert!(approx(summary.median, 42.0));
        assert!(approx(summary.p99, 42.0));
        assert!(approx(summary.std_dev, 0.0));
    }

    #[test]
    fn test_identical_values_have_zero_deviation() {
        let summary = summarize(&[5.0; 10]);
        assert_eq!(summary.count, 10);
        assert!(approx(summary.std_dev, 0.0));
        assert!(approx(summary.min, 5.0));
        assert!(approx(summary.max, 5.0));
    }

    #[test]
    fn test_linear_interpolation() {
        // numpy.percentile([1, 2, 3, 4], [50, 95, 99]) == [2.5, 3.85, 3.97]
        let summary = summarize(&[4.0, 1.0, 3.0, 2.0]);
        assert!(approx(summary.median, 2.5));
        assert!(approx(summary.p95, 3.85));
        assert!(approx(summary.p99, 3.97));
        assert!(approx(summary.mean, 2.5));
    }

    #[test]
    fn test_sample_standard_deviation() {
        // numpy.std([2, 4, 4, 4, 5, 5, 7, 9], ddof=1)
        let summary = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!(approx(summary.std_dev, 2.138_089_935_299_395));
    }

    #[test]
    fn test_percentile_bounds() {
        let sorted = [1.0, 2.0, 3.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 100.0), Some(3.0));
        assert_eq!(percentile(&sorted, 150.0), Some(3.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let values = [12.5, 3.0, 99.1, 47.0, 47.0];
        assert_eq!(summarize(&values), summarize(&values));
    }

    #[test]
    fn test_distribution_buckets() {
        let dist = LatencyDistribution::from_values(&[0.0, 9.99, 10.0, 49.0, 75.0, 150.0, 499.9, 500.0, 2000.0]);
        let counts: Vec<_> = dist.buckets().map(|(_, count)| count).collect();
        assert_eq!(counts, vec![2, 2, 1, 1, 1, 2]);
        assert_eq!(dist.total(), 9);
    }
}
