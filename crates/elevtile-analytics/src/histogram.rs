//! Equal-width histograms and linear-interpolation quantiles.

use crate::statistics::compute_statistics;
use crate::{AnalyticsError, Result};
use elevtile_raster::Grid;

/// Default number of histogram buckets.
pub const DEFAULT_BINS: usize = 6;

/// The five quantiles reported by [`compute_quantiles`].
pub const STANDARD_QUANTILES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// One histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramBucket {
    /// Inclusive lower edge.
    pub min: f64,
    /// Upper edge (exclusive, except for the last bucket).
    pub max: f64,
    /// Number of samples in the bucket.
    pub count: u64,
    /// `count` as a fraction of all valid samples.
    pub percent: f64,
}

/// A value at a given quantile.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quantile {
    /// Quantile in `[0, 1]`.
    pub quantile: f64,
    /// Sample value at that quantile.
    pub value: f64,
}

/// Bucket the valid samples of `grid` into `bins` equal-width buckets.
///
/// Bucket `i` covers `[min + i*w, min + (i+1)*w)` with `w = (max - min) / bins`;
/// the last bucket is closed so the global maximum lands in it. Buckets come
/// back in ascending order. A single-valued grid yields one zero-width
/// bucket holding every sample, and a grid without valid samples yields an
/// empty list.
pub fn compute_histogram(grid: &Grid, bins: usize) -> Result<Vec<HistogramBucket>> {
    if bins < 1 {
        return Err(AnalyticsError::InvalidParameter(format!(
            "number of bins should be at least 1, got {bins}"
        )));
    }

    let stats = compute_statistics(grid);
    if stats.is_empty() {
        return Ok(Vec::new());
    }

    if stats.max == stats.min {
        return Ok(vec![HistogramBucket {
            min: stats.min,
            max: stats.max,
            count: stats.count,
            percent: 1.0,
        }]);
    }

    let width = (stats.max - stats.min) / bins as f64;
    let mut counts = vec![0u64; bins];
    for v in grid.valid_values() {
        let idx = (((v - stats.min) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }

    let total = stats.count as f64;
    Ok(counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBucket {
            min: stats.min + i as f64 * width,
            max: if i + 1 == bins {
                stats.max
            } else {
                stats.min + (i + 1) as f64 * width
            },
            count,
            percent: count as f64 / total,
        })
        .collect())
}

/// The 0/25/50/75/100% quantiles of the valid samples of `grid`.
///
/// Returns an empty list when the grid has no valid samples.
pub fn compute_quantiles(grid: &Grid) -> Vec<Quantile> {
    // The standard quantiles are always in range
    compute_quantiles_at(grid, &STANDARD_QUANTILES).unwrap_or_default()
}

/// Values at caller-chosen quantiles, each in `[0, 1]`.
///
/// Uses the linear-interpolation estimator: the value at fractional rank
/// `q * (n - 1)` of the sorted samples, interpolated between the two
/// neighbouring ranks. Results keep the order of `quantiles`.
pub fn compute_quantiles_at(grid: &Grid, quantiles: &[f64]) -> Result<Vec<Quantile>> {
    if let Some(q) = quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
        return Err(AnalyticsError::InvalidParameter(format!(
            "quantile {q} should be between 0 and 1"
        )));
    }

    let mut sorted: Vec<f64> = grid.valid_values().collect();
    if sorted.is_empty() {
        return Ok(Vec::new());
    }
    sorted.sort_unstable_by(f64::total_cmp);

    Ok(quantiles
        .iter()
        .map(|&quantile| Quantile {
            quantile,
            value: interpolate_rank(&sorted, quantile),
        })
        .collect())
}

fn interpolate_rank(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = q * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use elevtile_raster::GeoTransform;

    fn grid(data: Vec<f64>) -> Grid {
        let width = data.len();
        Grid::new(width, 1, data, -9999.0, GeoTransform::new(0.0, 1.0, 1.0, -1.0)).unwrap()
    }

    #[test]
    fn test_two_bins() {
        let buckets = compute_histogram(&grid(vec![1.0, 3.0, 5.0, 7.0]), 2).unwrap();
        assert_eq!(
            buckets,
            vec![
                HistogramBucket { min: 1.0, max: 4.0, count: 2, percent: 0.5 },
                HistogramBucket { min: 4.0, max: 7.0, count: 2, percent: 0.5 },
            ]
        );
    }

    #[test]
    fn test_max_lands_in_last_bucket() {
        let buckets = compute_histogram(&grid(vec![0.0, 10.0]), 5).unwrap();
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[4].count, 1);
        assert_eq!(buckets[4].max, 10.0);
    }

    #[test]
    fn test_counts_and_percent_sum() {
        let data: Vec<f64> = (0..97).map(|v| (v as f64 * 1.37).sin() * 100.0).collect();
        let g = grid(data);
        for bins in [1, 2, 6, 13] {
            let buckets = compute_histogram(&g, bins).unwrap();
            assert_eq!(buckets.len(), bins);
            assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), 97);
            assert_abs_diff_eq!(buckets.iter().map(|b| b.percent).sum::<f64>(), 1.0, epsilon = 1e-9);
            assert!(buckets.windows(2).all(|w| w[0].min < w[1].min));
        }
    }

    #[test]
    fn test_degenerate_and_empty() {
        let single = compute_histogram(&grid(vec![2.0, 2.0, 2.0]), 4).unwrap();
        assert_eq!(single, vec![HistogramBucket { min: 2.0, max: 2.0, count: 3, percent: 1.0 }]);

        assert!(compute_histogram(&grid(vec![-9999.0, -9999.0]), 3).unwrap().is_empty());
        assert!(matches!(
            compute_histogram(&grid(vec![1.0]), 0),
            Err(AnalyticsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_standard_quantiles() {
        let q = compute_quantiles(&grid(vec![7.0, 1.0, 5.0, 3.0]));
        let values: Vec<(f64, f64)> = q.iter().map(|q| (q.quantile, q.value)).collect();
        assert_eq!(values, vec![(0.0, 1.0), (0.25, 2.5), (0.5, 4.0), (0.75, 5.5), (1.0, 7.0)]);
    }

    #[test]
    fn test_single_sample_quantiles() {
        let q = compute_quantiles(&grid(vec![-9999.0, 42.0]));
        assert_eq!(q.len(), 5);
        assert!(q.iter().all(|q| q.value == 42.0));
        assert!(compute_quantiles(&grid(vec![-9999.0])).is_empty());
    }

    #[test]
    fn test_custom_quantiles() {
        let g = grid((1..=11).map(|v| v as f64).collect());
        let q = compute_quantiles_at(&g, &[0.9, 0.1]).unwrap();
        assert_abs_diff_eq!(q[0].value, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[1].value, 2.0, epsilon = 1e-12);
        assert!(compute_quantiles_at(&g, &[1.5]).is_err());
    }
}
