//! Pairwise differential testing of the samples at one locus.
//!
//! For every locus, [`test_differential`] compares each pair of samples
//! (every unordered pair, or only consecutive samples for a time series) in
//! seven categories:
//!
//! * abundance tests of isoforms, TSS groups, genes and CDS groups, where a
//!   feature is matched by id between the two samples, and
//! * structure tests of splicing (isoforms within a TSS group), promoter use
//!   (TSS groups within a gene) and CDS use (CDS groups within a gene), where
//!   the distribution of a parent's abundance among its members is compared.
//!
//! Every comparison produces a [`SampleDifference`], whose status says
//! whether it was tested ([`TestStatus::Ok`]), could not be tested
//! ([`TestStatus::NoTest`]), or broke down ([`TestStatus::Fail`]).
//! Significance is only ever assigned by a [`MultipleTestCorrection`] once
//! all loci are done.

pub mod correction;
pub mod kernel;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::abundances::AbundanceStatus;
use crate::abundances::FeatureCategory;
use crate::abundances::SampleAbundances;
use crate::abundances::StructureCategory;
use crate::tracking::Tracking;
use correction::MultipleTestCorrection;
use kernel::js_distance;
use kernel::StatisticalKernel;
use kernel::TestStatistic;

//==============//
// Test Results //
//==============//

/// Whether a comparison was tested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum TestStatus {
    /// Not enough data to test.
    #[default]
    #[serde(rename = "NOTEST")]
    NoTest,

    /// Tested.
    #[serde(rename = "OK")]
    Ok,

    /// The test broke down numerically.
    #[serde(rename = "FAIL")]
    Fail,
}

/// The comparison of one feature between two samples.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleDifference {
    /// Index of the first sample.
    pub sample_1: usize,

    /// Index of the second sample.
    pub sample_2: usize,

    /// FPKM in the first sample.
    pub value_1: f64,

    /// FPKM in the second sample.
    pub value_2: f64,

    /// For abundance tests, log2 of the FPKM ratio. For structure tests, the
    /// Jensen–Shannon distance between the member fractions.
    pub differential: f64,

    /// The kernel's test statistic.
    pub test_stat: f64,

    /// Uncorrected p-value.
    pub p_value: f64,

    /// p-value after multiple testing correction.
    pub corrected_p: f64,

    /// Id of the tested feature or parent group.
    pub tested_group_id: String,

    /// Tag of the locus.
    pub locus_desc: String,

    /// Names of the genes involved.
    pub gene_names: BTreeSet<String>,

    /// Proteins involved.
    pub protein_ids: BTreeSet<String>,

    /// Human readable description.
    pub description: String,

    /// Whether the comparison was tested.
    pub test_status: TestStatus,

    /// Whether the difference is significant after correction.
    pub significant: bool,
}

impl Default for SampleDifference {
    fn default() -> Self {
        SampleDifference {
            sample_1: 0,
            sample_2: 0,
            value_1: 0.0,
            value_2: 0.0,
            differential: 0.0,
            test_stat: 0.0,
            p_value: 1.0,
            corrected_p: 1.0,
            tested_group_id: String::new(),
            locus_desc: String::new(),
            gene_names: BTreeSet::new(),
            protein_ids: BTreeSet::new(),
            description: String::new(),
            test_status: TestStatus::NoTest,
            significant: false,
        }
    }
}

impl SampleDifference {
    fn apply(&mut self, outcome: Result<Option<TestStatistic>, kernel::KernelError>) {
        match outcome {
            Ok(Some(stat)) => {
                self.test_stat = stat.test_stat;
                self.p_value = stat.p_value;
                self.test_status = TestStatus::Ok;
            }
            Ok(None) => self.test_status = TestStatus::NoTest,
            Err(err) => {
                debug!("{}: test of {} failed: {}", self.locus_desc, self.tested_group_id, err);
                self.test_status = TestStatus::Fail;
            }
        }
    }
}

/// The comparisons of one sample pair at one locus, by feature id.
pub type SampleDiffs = IndexMap<String, SampleDifference>;

/// Tests of one category, indexed by locus, then by sample pair.
pub type CategoryTests = Vec<Vec<SampleDiffs>>;

/// Every test of a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Tests {
    /// Isoform abundance tests.
    pub isoform_de_tests: CategoryTests,

    /// TSS group abundance tests.
    pub tss_group_de_tests: CategoryTests,

    /// Gene abundance tests.
    pub gene_de_tests: CategoryTests,

    /// CDS group abundance tests.
    pub cds_de_tests: CategoryTests,

    /// Splicing tests.
    pub diff_splicing_tests: CategoryTests,

    /// Promoter use tests.
    pub diff_promoter_tests: CategoryTests,

    /// CDS use tests.
    pub diff_cds_tests: CategoryTests,
}

impl Tests {
    /// Abundance tests of a category.
    pub fn feature_tests(&self, category: FeatureCategory) -> &CategoryTests {
        match category {
            FeatureCategory::Isoform => &self.isoform_de_tests,
            FeatureCategory::TssGroup => &self.tss_group_de_tests,
            FeatureCategory::Gene => &self.gene_de_tests,
            FeatureCategory::Cds => &self.cds_de_tests,
        }
    }

    fn feature_tests_mut(&mut self, category: FeatureCategory) -> &mut CategoryTests {
        match category {
            FeatureCategory::Isoform => &mut self.isoform_de_tests,
            FeatureCategory::TssGroup => &mut self.tss_group_de_tests,
            FeatureCategory::Gene => &mut self.gene_de_tests,
            FeatureCategory::Cds => &mut self.cds_de_tests,
        }
    }

    /// Structure tests of a category.
    pub fn structure_tests(&self, category: StructureCategory) -> &CategoryTests {
        match category {
            StructureCategory::Splicing => &self.diff_splicing_tests,
            StructureCategory::Promoter => &self.diff_promoter_tests,
            StructureCategory::CdsUse => &self.diff_cds_tests,
        }
    }

    fn structure_tests_mut(&mut self, category: StructureCategory) -> &mut CategoryTests {
        match category {
            StructureCategory::Splicing => &mut self.diff_splicing_tests,
            StructureCategory::Promoter => &mut self.diff_promoter_tests,
            StructureCategory::CdsUse => &mut self.diff_cds_tests,
        }
    }

    /// Applies a correction to every category independently.
    pub fn correct(&mut self, correction: &dyn MultipleTestCorrection) {
        for category in FeatureCategory::ALL {
            correction.correct(self.feature_tests_mut(category));
        }
        for category in StructureCategory::ALL {
            correction.correct(self.structure_tests_mut(category));
        }
    }

    /// The number of loci tested so far.
    pub fn num_loci(&self) -> usize {
        self.isoform_de_tests.len()
    }
}

//=========//
// Testing //
//=========//

/// The pairs of samples to compare: every `(i, j)` with `i < j`, or only
/// `(i, i + 1)` for a time series.
pub fn sample_pairs(num_samples: usize, time_series: bool) -> Vec<(usize, usize)> {
    use itertools::Itertools;

    match time_series {
        true => (0..num_samples).tuple_windows().collect(),
        false => (0..num_samples).tuple_combinations().collect(),
    }
}

/// log2(second / first). Zero when both are equal (including both zero) and
/// infinite when exactly one is zero.
fn log2_ratio(first: f64, second: f64) -> f64 {
    if first == second {
        0.0
    } else if first == 0.0 {
        f64::INFINITY
    } else if second == 0.0 {
        f64::NEG_INFINITY
    } else {
        (second / first).log2()
    }
}

/// Status shared by both kinds of test before the kernel is consulted.
/// Returns `None` if the kernel should decide.
fn precheck(
    first: &SampleAbundances,
    second: &SampleAbundances,
    statuses: Option<(AbundanceStatus, AbundanceStatus)>,
) -> Option<TestStatus> {
    if !first.usable || !second.usable {
        return Some(TestStatus::NoTest);
    }

    let (a, b) = match statuses {
        Some(s) => s,
        None => return Some(TestStatus::NoTest),
    };

    match a.worst(b) {
        AbundanceStatus::Failed => Some(TestStatus::Fail),
        AbundanceStatus::LowData => Some(TestStatus::NoTest),
        AbundanceStatus::Ok => None,
    }
}

fn union_ids<'a>(first: Vec<&'a str>, second: Vec<&'a str>) -> Vec<&'a str> {
    let mut ids: indexmap::IndexSet<&str> = first.into_iter().collect();
    ids.extend(second);
    ids.into_iter().collect()
}

fn test_features(
    locus_tag: &str,
    category: FeatureCategory,
    pair: (usize, usize),
    first: &SampleAbundances,
    second: &SampleAbundances,
    kernel: &dyn StatisticalKernel,
) -> SampleDiffs {
    let ids = union_ids(first.feature_ids(category), second.feature_ids(category));
    let mut diffs = SampleDiffs::new();

    for id in ids {
        let a = first.feature(category, id);
        let b = second.feature(category, id);

        let mut diff = SampleDifference {
            sample_1: pair.0,
            sample_2: pair.1,
            tested_group_id: id.to_string(),
            locus_desc: locus_tag.to_string(),
            ..Default::default()
        };

        if let Some(known) = a.or(b) {
            diff.gene_names = known.gene_names.clone();
            diff.protein_ids = known.protein_ids.clone();
            diff.description = known.description();
        }

        diff.value_1 = a.map(|x| x.fpkm).unwrap_or_default();
        diff.value_2 = b.map(|x| x.fpkm).unwrap_or_default();
        diff.differential = log2_ratio(diff.value_1, diff.value_2);

        let statuses = a.zip(b).map(|(a, b)| (a.status, b.status));
        match (precheck(first, second, statuses), a.zip(b)) {
            (None, Some((a, b))) => diff.apply(kernel.test_abundance(a, b)),
            (status, _) => diff.test_status = status_or_notest(status),
        }

        diffs.insert(id.to_string(), diff);
    }

    diffs
}

fn status_or_notest(status: Option<TestStatus>) -> TestStatus {
    status.unwrap_or(TestStatus::NoTest)
}

fn test_structure(
    locus_tag: &str,
    category: StructureCategory,
    pair: (usize, usize),
    first: &SampleAbundances,
    second: &SampleAbundances,
    kernel: &dyn StatisticalKernel,
) -> SampleDiffs {
    let ids = union_ids(first.structure_ids(category), second.structure_ids(category));
    let mut diffs = SampleDiffs::new();

    for id in ids {
        let a = first.structure_group(category, id);
        let b = second.structure_group(category, id);

        let known = match a.or(b) {
            Some(g) if g.members.len() >= 2 => g,
            _ => continue,
        };

        let mut diff = SampleDifference {
            sample_1: pair.0,
            sample_2: pair.1,
            tested_group_id: id.to_string(),
            locus_desc: locus_tag.to_string(),
            gene_names: known.summary.gene_names.clone(),
            protein_ids: known.summary.protein_ids.clone(),
            description: known.summary.description(),
            ..Default::default()
        };

        diff.value_1 = a.map(|g| g.summary.fpkm).unwrap_or_default();
        diff.value_2 = b.map(|g| g.summary.fpkm).unwrap_or_default();

        // Without expression on both sides there is no distribution to
        // compare; NaN is written out as null.
        let fractions = a
            .and_then(|g| g.fpkm_fractions())
            .zip(b.and_then(|g| g.fpkm_fractions()));
        diff.differential = match fractions {
            Some((p, q)) if p.len() == q.len() => js_distance(&p, &q),
            _ => f64::NAN,
        };

        let statuses = a
            .zip(b)
            .map(|(a, b)| (a.summary.status, b.summary.status));
        match (precheck(first, second, statuses), a.zip(b)) {
            (None, Some((a, b))) => diff.apply(kernel.test_distribution(a, b)),
            (status, _) => diff.test_status = status_or_notest(status),
        }

        diffs.insert(id.to_string(), diff);
    }

    diffs
}

/// Records the samples of one locus for tracking, then compares every pair
/// of samples in every category and appends the results to `tests`.
///
/// Each category of `tests` grows by exactly one entry (this locus), holding
/// one [`SampleDiffs`] per compared pair in the order of [`sample_pairs`].
pub fn test_differential(
    locus_tag: &str,
    samples: &[SampleAbundances],
    tests: &mut Tests,
    tracking: &mut Tracking,
    samples_are_time_series: bool,
    kernel: &dyn StatisticalKernel,
) {
    tracking.record(locus_tag, samples);

    let pairs = sample_pairs(samples.len(), samples_are_time_series);

    for category in FeatureCategory::ALL {
        let locus_tests: Vec<SampleDiffs> = pairs
            .iter()
            .map(|(i, j)| {
                test_features(locus_tag, category, (*i, *j), &samples[*i], &samples[*j], kernel)
            })
            .collect();

        for diff in locus_tests.iter().flat_map(|d| d.values()) {
            tracking.update_status(category, &diff.tested_group_id, diff.test_status);
        }

        tests.feature_tests_mut(category).push(locus_tests);
    }

    for category in StructureCategory::ALL {
        let locus_tests: Vec<SampleDiffs> = pairs
            .iter()
            .map(|(i, j)| {
                test_structure(locus_tag, category, (*i, *j), &samples[*i], &samples[*j], kernel)
            })
            .collect();

        tests.structure_tests_mut(category).push(locus_tests);
    }
}
