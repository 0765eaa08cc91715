//! Multiple testing correction over all loci of a category.

use super::SampleDiffs;
use super::TestStatus;

/// Adjusts the p-values of one category of tests once every locus has been
/// processed. Only tests with status [`TestStatus::Ok`] take part; every
/// other test keeps its default corrected p-value and is never significant.
pub trait MultipleTestCorrection {
    /// Overwrites `corrected_p` and `significant` in place. `tests` is
    /// indexed by locus, then by sample pair.
    fn correct(&self, tests: &mut [Vec<SampleDiffs>]);
}

/// Benjamini–Hochberg step-up procedure controlling the false discovery
/// rate.
#[derive(Clone, Copy, Debug)]
pub struct BenjaminiHochberg {
    /// Corrected p-values at or below this are significant.
    pub fdr: f64,
}

impl Default for BenjaminiHochberg {
    fn default() -> Self {
        BenjaminiHochberg { fdr: 0.05 }
    }
}

/// Benjamini–Hochberg adjusted p-values, in input order.
pub fn adjust(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return vec![];
    }

    let mut indexed: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut q_values = vec![0.0; n];
    let n_f64 = n as f64;

    // Walk from the largest p-value down, keeping a running minimum so that
    // the adjusted values stay monotone.
    let mut cummin = f64::INFINITY;
    for i in (0..n).rev() {
        let (orig_idx, p) = indexed[i];
        let rank = (i + 1) as f64;
        let adjusted = (p * n_f64 / rank).min(1.0);
        cummin = cummin.min(adjusted);
        q_values[orig_idx] = cummin;
    }

    q_values
}

impl MultipleTestCorrection for BenjaminiHochberg {
    fn correct(&self, tests: &mut [Vec<SampleDiffs>]) {
        let p_values: Vec<f64> = tests
            .iter()
            .flatten()
            .flat_map(|diffs| diffs.values())
            .filter(|d| d.test_status == TestStatus::Ok)
            .map(|d| d.p_value)
            .collect();

        let mut q_values = adjust(&p_values).into_iter();

        for diff in tests
            .iter_mut()
            .flatten()
            .flat_map(|diffs| diffs.values_mut())
            .filter(|d| d.test_status == TestStatus::Ok)
        {
            if let Some(q) = q_values.next() {
                diff.corrected_p = q;
                diff.significant = q <= self.fdr;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differential::SampleDifference;
    use approx::assert_relative_eq;

    #[test]
    fn test_adjust() {
        let q = adjust(&[0.01, 0.04, 0.03, 0.5]);
        assert_relative_eq!(q[0], 0.04, epsilon = 1e-12);
        assert_relative_eq!(q[1], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[2], 0.04 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[3], 0.5, epsilon = 1e-12);
        assert!(adjust(&[]).is_empty());
    }

    #[test]
    fn test_only_ok_tests_are_corrected() {
        let diff = |p: f64, status: TestStatus| SampleDifference {
            p_value: p,
            test_status: status,
            ..Default::default()
        };

        let mut first = SampleDiffs::new();
        first.insert(String::from("a"), diff(0.001, TestStatus::Ok));
        first.insert(String::from("b"), diff(0.001, TestStatus::NoTest));
        let mut second = SampleDiffs::new();
        second.insert(String::from("a"), diff(0.9, TestStatus::Ok));
        second.insert(String::from("b"), diff(0.001, TestStatus::Fail));

        // One locus with two sample pairs.
        let mut tests = vec![vec![first, second]];
        BenjaminiHochberg { fdr: 0.05 }.correct(&mut tests);

        let locus = &tests[0];
        assert_relative_eq!(locus[0]["a"].corrected_p, 0.002, epsilon = 1e-12);
        assert!(locus[0]["a"].significant);
        assert!(!locus[1]["a"].significant);

        assert_eq!(locus[0]["b"].corrected_p, 1.0);
        assert!(!locus[0]["b"].significant);
        assert!(!locus[1]["b"].significant);
    }
}
