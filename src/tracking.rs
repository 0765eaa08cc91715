//! Longitudinal FPKM records for reporting.
//!
//! One [`FPKMTracking`] entry exists per feature id and category. Every time a
//! locus is recorded, each entry of that locus grows by exactly one
//! [`FPKMContext`] per sample, so the series of every feature lines up with
//! the sample order. Entries are only ever appended to.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::abundances::Abundance;
use crate::abundances::AbundanceStatus;
use crate::abundances::FeatureCategory;
use crate::abundances::SampleAbundances;
use crate::differential::TestStatus;

/// The abundance of a feature in one sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FPKMContext {
    /// Normalized fragment count.
    pub counts: f64,

    /// FPKM.
    pub fpkm: f64,

    /// Variance of the FPKM.
    pub fpkm_variance: f64,

    /// Status of the estimate.
    pub status: AbundanceStatus,
}

impl FPKMContext {
    /// Placeholder for a sample that has no estimate for the feature.
    pub fn missing() -> Self {
        FPKMContext {
            counts: 0.0,
            fpkm: 0.0,
            fpkm_variance: 0.0,
            status: AbundanceStatus::LowData,
        }
    }
}

impl From<&Abundance> for FPKMContext {
    fn from(abundance: &Abundance) -> Self {
        FPKMContext {
            counts: abundance.counts,
            fpkm: abundance.fpkm,
            fpkm_variance: abundance.fpkm_variance,
            status: abundance.status,
        }
    }
}

/// Everything recorded about one feature.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FPKMTracking {
    /// Tag of the locus the feature was first seen in.
    pub locus_tag: String,

    /// Class code relative to the reference, for isoforms.
    pub classcode: Option<char>,

    /// Transcription start sites of the feature.
    pub tss_ids: BTreeSet<String>,

    /// Gene names of the feature.
    pub gene_names: BTreeSet<String>,

    /// Proteins of the feature.
    pub protein_ids: BTreeSet<String>,

    /// Human readable description.
    pub description: String,

    /// The closest reference transcript.
    pub ref_match: Option<String>,

    /// The best status among the tests of the feature.
    pub test_status: TestStatus,

    /// One entry per recorded sample.
    pub fpkm_series: Vec<FPKMContext>,
}

impl FPKMTracking {
    fn new(locus_tag: &str, abundance: &Abundance) -> Self {
        FPKMTracking {
            locus_tag: locus_tag.to_string(),
            classcode: abundance.class_code,
            tss_ids: abundance.tss_ids.clone(),
            gene_names: abundance.gene_names.clone(),
            protein_ids: abundance.protein_ids.clone(),
            description: abundance.description(),
            ref_match: abundance.nearest_ref.clone(),
            test_status: TestStatus::NoTest,
            fpkm_series: Vec::new(),
        }
    }
}

/// Tracking entries by feature id, in first-seen order.
pub type FPKMTrackingTable = IndexMap<String, FPKMTracking>;

fn rank(status: TestStatus) -> u8 {
    match status {
        TestStatus::NoTest => 0,
        TestStatus::Fail => 1,
        TestStatus::Ok => 2,
    }
}

/// The four tracking tables.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Tracking {
    /// Isoforms.
    pub isoform_fpkm_tracking: FPKMTrackingTable,

    /// TSS groups.
    pub tss_group_fpkm_tracking: FPKMTrackingTable,

    /// Genes.
    pub gene_fpkm_tracking: FPKMTrackingTable,

    /// CDS groups.
    pub cds_fpkm_tracking: FPKMTrackingTable,
}

impl Tracking {
    /// The table of a category.
    pub fn table(&self, category: FeatureCategory) -> &FPKMTrackingTable {
        match category {
            FeatureCategory::Isoform => &self.isoform_fpkm_tracking,
            FeatureCategory::TssGroup => &self.tss_group_fpkm_tracking,
            FeatureCategory::Gene => &self.gene_fpkm_tracking,
            FeatureCategory::Cds => &self.cds_fpkm_tracking,
        }
    }

    fn table_mut(&mut self, category: FeatureCategory) -> &mut FPKMTrackingTable {
        match category {
            FeatureCategory::Isoform => &mut self.isoform_fpkm_tracking,
            FeatureCategory::TssGroup => &mut self.tss_group_fpkm_tracking,
            FeatureCategory::Gene => &mut self.gene_fpkm_tracking,
            FeatureCategory::Cds => &mut self.cds_fpkm_tracking,
        }
    }

    /// Appends one context per sample to every feature of the locus. Samples
    /// that are unusable or lack a feature get a zero, low data context.
    pub fn record(&mut self, locus_tag: &str, samples: &[SampleAbundances]) {
        for category in FeatureCategory::ALL {
            let mut ids: indexmap::IndexSet<&str> = indexmap::IndexSet::new();
            for sample in samples {
                ids.extend(sample.feature_ids(category));
            }

            let table = self.table_mut(category);
            for id in ids {
                if !table.contains_key(id) {
                    match samples.iter().find_map(|s| s.feature(category, id)) {
                        Some(abundance) => {
                            let entry = FPKMTracking::new(locus_tag, abundance);
                            table.insert(id.to_string(), entry);
                        }
                        None => continue,
                    }
                }

                let entry = match table.get_mut(id) {
                    Some(e) => e,
                    None => continue,
                };

                for sample in samples {
                    let context = match sample.feature(category, id) {
                        Some(abundance) if sample.usable => FPKMContext::from(abundance),
                        _ => FPKMContext::missing(),
                    };
                    entry.fpkm_series.push(context);
                }
            }
        }
    }

    /// Raises the test status of a feature to `status` if it is better than
    /// what was recorded so far (OK over FAIL over NOTEST).
    pub fn update_status(&mut self, category: FeatureCategory, id: &str, status: TestStatus) {
        if let Some(entry) = self.table_mut(category).get_mut(id) {
            if rank(status) > rank(entry.test_status) {
                entry.test_status = status;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundances::testing::isoform;

    fn sample(isoforms: Vec<Abundance>) -> SampleAbundances {
        SampleAbundances::from_isoforms("chr1:0-2000", isoforms, 10.0)
    }

    #[test]
    pub fn test_record_appends_one_context_per_sample() {
        let samples = vec![
            sample(vec![isoform("t1", "g1", Some("tss1"), 5.0)]),
            sample(vec![
                isoform("t1", "g1", Some("tss1"), 7.0),
                isoform("t2", "g1", Some("tss1"), 1.0),
            ]),
            SampleAbundances::unusable("chr1:0-2000"),
        ];

        let mut tracking = Tracking::default();
        tracking.record("chr1:0-2000", &samples);

        let isoforms = tracking.table(FeatureCategory::Isoform);
        let ids: Vec<_> = isoforms.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        let t1 = &isoforms["t1"];
        assert_eq!(t1.fpkm_series.len(), 3);
        assert_eq!(t1.fpkm_series[1].fpkm, 7.0);
        assert_eq!(t1.fpkm_series[2], FPKMContext::missing());
        assert_eq!(t1.classcode, Some('='));

        let t2 = &isoforms["t2"];
        assert_eq!(t2.fpkm_series[0].status, AbundanceStatus::LowData);
        assert_eq!(t2.fpkm_series[1].fpkm, 1.0);

        assert_eq!(tracking.table(FeatureCategory::Gene)["g1"].fpkm_series[1].fpkm, 8.0);
    }

    #[test]
    pub fn test_record_never_removes() {
        let mut tracking = Tracking::default();
        let first = vec![sample(vec![isoform("t1", "g1", None, 5.0)])];
        let second = vec![sample(vec![isoform("t2", "g2", None, 5.0)])];

        tracking.record("a", &first);
        tracking.record("b", &second);
        tracking.record("a", &first);

        let isoforms = tracking.table(FeatureCategory::Isoform);
        assert_eq!(isoforms.len(), 2);
        assert_eq!(isoforms["t1"].fpkm_series.len(), 2);
        assert_eq!(isoforms["t1"].locus_tag, "a");
    }

    #[test]
    pub fn test_update_status_keeps_the_best() {
        let mut tracking = Tracking::default();
        tracking.record("a", &[sample(vec![isoform("t1", "g1", None, 5.0)])]);

        tracking.update_status(FeatureCategory::Isoform, "t1", TestStatus::Fail);
        tracking.update_status(FeatureCategory::Isoform, "t1", TestStatus::NoTest);
        assert_eq!(
            tracking.table(FeatureCategory::Isoform)["t1"].test_status,
            TestStatus::Fail
        );

        tracking.update_status(FeatureCategory::Isoform, "t1", TestStatus::Ok);
        tracking.update_status(FeatureCategory::Isoform, "missing", TestStatus::Ok);
        assert_eq!(
            tracking.table(FeatureCategory::Isoform)["t1"].test_status,
            TestStatus::Ok
        );
    }
}
