//! Summary statistics over the valid samples of one or more grids.

use elevtile_raster::{Bounds, Grid};

/// Summary of a sample set.
///
/// The standard deviation is the population one (`sqrt(E[x²] - mean²)`),
/// matching raster summary semantics. A `count` of zero is a valid result
/// meaning "no data"; every other field is then zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    /// Smallest valid sample.
    pub min: f64,
    /// Largest valid sample.
    pub max: f64,
    /// Number of valid samples.
    pub count: u64,
    /// Sum of valid samples.
    pub sum: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
}

impl Statistics {
    /// Whether the sample set was empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Streaming accumulator behind [`Statistics`].
#[derive(Debug, Clone, Copy)]
pub struct StatisticsAccumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl StatisticsAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one valid sample.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Add every sample from an iterator.
    pub fn extend<I: IntoIterator<Item = f64>>(&mut self, values: I) {
        for v in values {
            self.push(v);
        }
    }

    /// Combine two partial accumulations.
    pub fn merge(mut self, other: &StatisticsAccumulator) -> Self {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self
    }

    /// Produce the summary.
    pub fn finish(&self) -> Statistics {
        if self.count == 0 {
            return Statistics::default();
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        // Rounding leaves a residue on constant data, which must read as zero spread
        let variance = if self.min == self.max {
            0.0
        } else {
            (self.sum_sq / n - mean * mean).max(0.0)
        };
        Statistics {
            min: self.min,
            max: self.max,
            count: self.count,
            sum: self.sum,
            mean,
            stddev: variance.sqrt(),
        }
    }
}

/// Summarise the valid samples of a grid.
pub fn compute_statistics(grid: &Grid) -> Statistics {
    let mut acc = StatisticsAccumulator::new();
    acc.extend(grid.valid_values());
    acc.finish()
}

/// Summarise several grids as one merged sample set.
pub fn compute_statistics_over<'a, I>(grids: I) -> Statistics
where
    I: IntoIterator<Item = &'a Grid>,
{
    grids
        .into_iter()
        .fold(StatisticsAccumulator::new(), |mut acc, grid| {
            acc.extend(grid.valid_values());
            acc
        })
        .finish()
}

/// Summarise the samples of several tiles that fall inside `bounds`.
///
/// Each tile is clipped on its own (a pixel counts when its centre lies in
/// the rectangle) and all surviving samples form one set. Tiles that miss
/// the rectangle contribute nothing, so an envelope outside every tile
/// yields an empty result.
pub fn compute_statistics_over_envelope<'a, I>(tiles: I, bounds: &Bounds) -> Statistics
where
    I: IntoIterator<Item = &'a Grid>,
{
    let mut acc = StatisticsAccumulator::new();
    for tile in tiles {
        if !tile.bounds().intersects(bounds) {
            continue;
        }
        acc.extend(tile.values_within(bounds));
    }
    acc.finish()
}
