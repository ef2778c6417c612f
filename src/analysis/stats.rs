//! Descriptive statistics.
//!
//! Quartiles use linear interpolation between ranked order statistics:
//! the p-th percentile sits at position `p * (n - 1)` of the sorted values.

use crate::models::StatSummary;

/// Summarizes a set of values. Returns `None` for an empty set.
///
/// Non-finite values are ignored.
pub fn summarize(values: &[f64]) -> Option<StatSummary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();
    let sum: f64 = sorted.iter().sum();
    let mean = sum / count as f64;

    let std_dev = if count > 1 {
        let squares: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        Some((squares / (count - 1) as f64).sqrt())
    } else {
        None
    };

    Some(StatSummary {
        count,
        mean,
        std_dev,
        min: sorted[0],
        p25: percentile(&sorted, 0.25),
        p50: percentile(&sorted, 0.50),
        p75: percentile(&sorted, 0.75),
        max: sorted[count - 1],
        sum,
    })
}

/// Linear-interpolated percentile of sorted, non-empty values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let position = p.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
