//! Histogram used to summarize fragment length distributions.
//!
//! # Overview
//!
//! Every replicate keeps a [`Histogram`] of the lengths of the fragments it
//! contributes. The engine only ever needs a few summary values from it: the
//! shortest and longest observed lengths (used to report the fragment length
//! range across replicates) and the mean length (used to compute effective
//! transcript lengths).
//!
//! The histogram follows two simple rules:
//!
//! 1. Bins are discrete and represent values in the range `[0, 1, 2, ..., n]`.
//! 2. Values beyond the capacity given at construction are rejected with a
//!    [`BinOutOfBoundsError`]; callers decide whether to clamp or to drop them.
//!
//! ```
//! use rnadiff::utils::histogram::Histogram;
//! let mut hist = Histogram::zero_based_with_capacity(500);
//!
//! hist.increment(180).unwrap();
//! hist.increment_by(220, 3).unwrap();
//!
//! assert_eq!(hist.min(), Some(180));
//! assert_eq!(hist.max(), Some(220));
//! assert_eq!(hist.mean(), Some(210.0));
//! ```

use serde::{Deserialize, Serialize};

/// Histogram of non-negative integer values. For more in depth information,
/// please see the [module-level documentation].
///
/// [module-level documentation]: self
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Histogram {
    // Vec-backed value store for the histogram.
    values: Vec<usize>,
    // Ending range for the histogram (inclusive).
    range_stop: usize,
}

/// An error that occurs if we try to increment a bin of the histogram that is
/// out-of-bounds for that histogram.
#[derive(Debug, PartialEq, Eq)]
pub struct BinOutOfBoundsError;

impl Histogram {
    //=================//
    // Initializations //
    //=================//

    /// Creates a zero-based histogram with a given capacity.
    pub fn zero_based_with_capacity(capacity: usize) -> Self {
        Self {
            values: vec![0; capacity + 1],
            range_stop: capacity,
        }
    }

    //=================================//
    // Getting and incrementing values //
    //=================================//

    /// Increments a particular bin in the histogram by one.
    pub fn increment(&mut self, bin: usize) -> Result<(), BinOutOfBoundsError> {
        self.increment_by(bin, 1)
    }

    /// Increments a particular bin in the histogram by the specified value.
    pub fn increment_by(&mut self, bin: usize, value: usize) -> Result<(), BinOutOfBoundsError> {
        if bin > self.range_stop {
            return Err(BinOutOfBoundsError);
        }

        self.values[bin] += value;
        Ok(())
    }

    /// Gets a value for a bin within a histogram. Bins outside of the range
    /// are empty by definition.
    pub fn get(&self, bin: usize) -> usize {
        self.values.get(bin).copied().unwrap_or(0)
    }

    /// Gives the largest value the histogram can hold.
    pub fn range_stop(&self) -> usize {
        self.range_stop
    }

    //========================//
    // Numerical computations //
    //========================//

    /// Computes the sum of the counts within the distribution.
    pub fn sum(&self) -> usize {
        self.values.iter().sum()
    }

    /// The smallest bin with a non-zero count.
    pub fn min(&self) -> Option<usize> {
        self.values.iter().position(|v| *v > 0)
    }

    /// The largest bin with a non-zero count.
    pub fn max(&self) -> Option<usize> {
        self.values.iter().rposition(|v| *v > 0)
    }

    /// Computes the mean of all values within the histogram, or `None` if the
    /// histogram is empty.
    pub fn mean(&self) -> Option<f64> {
        let total = self.sum();
        if total == 0 {
            return None;
        }

        let weighted: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(bin, count)| (bin * count) as f64)
            .sum();

        Some(weighted / total as f64)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::zero_based_with_capacity(1_000)
    }
}
