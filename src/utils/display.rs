//! Utilities related to displaying things.

use std::fmt;

use num_format::Locale;
use num_format::ToFormattedString;
use tracing::info;

/// Utility struct for displays percentages. The first item in the struct is the
/// numerator and the second item in the struct is the denominator.
pub struct PercentageFormat(pub u64, pub u64);

impl fmt::Display for PercentageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.1 == 0 {
            f.write_str("N/A")
        } else {
            let (a, b) = (self.0 as f64, self.1 as f64);
            write!(f, "{:.2}%", a / b * 100.0)
        }
    }
}

/// Utility struct used to uniformly count and report the number of loci processed.
pub struct LocusCounter {
    /// The number of loci processed.
    count: usize,

    /// The total number of loci expected, if known.
    total: Option<usize>,

    /// The number of loci to log every.
    log_every: usize,
}

impl Default for LocusCounter {
    fn default() -> Self {
        LocusCounter {
            count: 0,
            total: None,
            log_every: 1_000,
        }
    }
}

impl LocusCounter {
    /// Creates a new `LocusCounter`.
    pub fn new(total: Option<usize>, log_every: Option<usize>) -> Self {
        LocusCounter {
            count: 0,
            total,
            log_every: log_every.unwrap_or(1_000).max(1),
        }
    }

    /// Gets the current number of loci counted via a copy.
    pub fn get(&self) -> usize {
        self.count
    }

    /// Increments the counter and reports the number of loci processed (if
    /// appropriate).
    pub fn inc(&mut self) {
        self.count += 1;

        if self.count % self.log_every == 0 {
            self.report();
        }
    }

    /// Unconditionally logs the number of loci processed so far.
    pub fn report(&self) {
        match self.total {
            Some(total) => info!(
                "  [*] Processed {} of {} loci ({}).",
                self.count.to_formatted_string(&Locale::en),
                total.to_formatted_string(&Locale::en),
                PercentageFormat(self.count as u64, total as u64),
            ),
            None => info!(
                "  [*] Processed {} loci.",
                self.count.to_formatted_string(&Locale::en),
            ),
        }
    }
}
