//! The statistical kernel invoked for every tested pair of features.

use std::error;
use std::fmt;

use statrs::distribution::ChiSquared;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;

use crate::abundances::Abundance;
use crate::abundances::AbundanceGroup;

/// The outcome of a single test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TestStatistic {
    /// The test statistic.
    pub test_stat: f64,

    /// The uncorrected p-value.
    pub p_value: f64,
}

/// Errors raised by a kernel. A test that errors is reported as failed.
#[derive(Debug, PartialEq)]
pub enum KernelError {
    /// The statistic could not be computed as a finite number.
    NonFinite(String),

    /// The two groups being compared do not list the same members.
    MismatchedMembers {
        /// Members in the first sample.
        expected: Vec<String>,

        /// Members in the second sample.
        found: Vec<String>,
    },

    /// A reference distribution could not be constructed.
    Distribution(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::NonFinite(what) => write!(f, "non-finite {}", what),
            KernelError::MismatchedMembers { expected, found } => write!(
                f,
                "group members differ between samples: {:?} versus {:?}",
                expected, found
            ),
            KernelError::Distribution(err) => write!(f, "invalid distribution: {}", err),
        }
    }
}

impl error::Error for KernelError {}

/// Compares two samples.
///
/// Both methods return `Ok(None)` when the inputs do not support a test (for
/// example, nothing was expressed on one side) and `Err` when the computation
/// itself breaks down.
pub trait StatisticalKernel: Send + Sync {
    /// Tests whether the abundance of a feature changed.
    fn test_abundance(
        &self,
        first: &Abundance,
        second: &Abundance,
    ) -> Result<Option<TestStatistic>, KernelError>;

    /// Tests whether the abundance of a group is distributed differently
    /// among its members.
    fn test_distribution(
        &self,
        first: &AbundanceGroup,
        second: &AbundanceGroup,
    ) -> Result<Option<TestStatistic>, KernelError>;
}

/// Default kernel.
///
/// Abundance changes are tested with a z-test on the log ratio of the FPKMs,
/// whose variance comes from the FPKM variances by the delta method.
/// Redistribution within a group is tested with a G-test of homogeneity on
/// the member counts, against a chi-squared distribution.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogRatioKernel;

impl StatisticalKernel for LogRatioKernel {
    fn test_abundance(
        &self,
        first: &Abundance,
        second: &Abundance,
    ) -> Result<Option<TestStatistic>, KernelError> {
        if first.fpkm <= 0.0 || second.fpkm <= 0.0 {
            return Ok(None);
        }

        let log_ratio = second.fpkm.ln() - first.fpkm.ln();
        let variance = first.fpkm_variance / (first.fpkm * first.fpkm)
            + second.fpkm_variance / (second.fpkm * second.fpkm);
        let std_err = variance.sqrt();

        if !std_err.is_finite() || !log_ratio.is_finite() {
            return Err(KernelError::NonFinite(String::from("log ratio standard error")));
        }

        if std_err == 0.0 {
            return Ok(None);
        }

        let z = log_ratio / std_err;
        let normal =
            Normal::new(0.0, 1.0).map_err(|e| KernelError::Distribution(e.to_string()))?;
        let p_value = 2.0 * (1.0 - normal.cdf(z.abs()));

        Ok(Some(TestStatistic {
            test_stat: z,
            p_value: p_value.clamp(0.0, 1.0),
        }))
    }

    fn test_distribution(
        &self,
        first: &AbundanceGroup,
        second: &AbundanceGroup,
    ) -> Result<Option<TestStatistic>, KernelError> {
        let ids = |g: &AbundanceGroup| g.members.iter().map(|m| m.id.clone()).collect::<Vec<_>>();
        if ids(first) != ids(second) {
            return Err(KernelError::MismatchedMembers {
                expected: ids(first),
                found: ids(second),
            });
        }

        // Members with no fragments in either sample carry no information.
        let columns: Vec<(f64, f64)> = first
            .members
            .iter()
            .zip(second.members.iter())
            .map(|(a, b)| (a.counts, b.counts))
            .filter(|(a, b)| *a > 0.0 || *b > 0.0)
            .collect();

        let row_a: f64 = columns.iter().map(|c| c.0).sum();
        let row_b: f64 = columns.iter().map(|c| c.1).sum();
        if columns.len() < 2 || row_a <= 0.0 || row_b <= 0.0 {
            return Ok(None);
        }

        let g = g_statistic(&columns);
        if !g.is_finite() {
            return Err(KernelError::NonFinite(String::from("G statistic")));
        }

        let df = (columns.len() - 1) as f64;
        let chi_squared =
            ChiSquared::new(df).map_err(|e| KernelError::Distribution(e.to_string()))?;
        let p_value = 1.0 - chi_squared.cdf(g);

        Ok(Some(TestStatistic {
            test_stat: g,
            p_value: p_value.clamp(0.0, 1.0),
        }))
    }
}

/// G statistic of a 2 x k contingency table given as k columns.
fn g_statistic(columns: &[(f64, f64)]) -> f64 {
    let row_a: f64 = columns.iter().map(|c| c.0).sum();
    let row_b: f64 = columns.iter().map(|c| c.1).sum();
    let total = row_a + row_b;

    // lim(x→0) x*ln(x) = 0
    let llr = |observed: f64, expected: f64| -> f64 {
        if observed == 0.0 || expected == 0.0 {
            0.0
        } else {
            2.0 * observed * (observed / expected).ln()
        }
    };

    let g: f64 = columns
        .iter()
        .map(|(a, b)| {
            let column = a + b;
            llr(*a, row_a * column / total) + llr(*b, row_b * column / total)
        })
        .sum();

    g.max(0.0)
}

/// Jensen–Shannon distance between two discrete distributions of the same
/// length, in bits. Ranges from 0 (identical) to 1 (disjoint support).
pub fn js_distance(p: &[f64], q: &[f64]) -> f64 {
    let entropy = |d: &[f64]| -> f64 {
        d.iter()
            .filter(|x| **x > 0.0)
            .map(|x| -x * x.log2())
            .sum()
    };

    let m: Vec<f64> = p.iter().zip(q.iter()).map(|(a, b)| (a + b) / 2.0).collect();
    let divergence = entropy(&m) - (entropy(p) + entropy(q)) / 2.0;

    divergence.max(0.0).sqrt()
}
