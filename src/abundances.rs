//! Abundance estimates for one sample at one locus.
//!
//! The estimator produces one [`Abundance`] per reference transcript
//! (isoform). Everything else is derived from those by grouping:
//!
//! | Collection                  | Keyed by       | Members            |
//! |-----------------------------|----------------|--------------------|
//! | `transcripts`               | transcript id  | -                  |
//! | `primary_transcripts`       | TSS id         | isoforms           |
//! | `genes`                     | gene id        | isoforms           |
//! | `cds`                       | protein id     | isoforms           |
//! | `gene_primary_transcripts`  | gene id        | TSS group totals   |
//! | `gene_cds`                  | gene id        | CDS group totals   |
//!
//! Isoforms without a TSS id (or protein id) simply do not take part in the
//! TSS (or CDS) groupings.

use std::collections::BTreeSet;
use std::error;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::bundles::factory::CombinedBundle;
use crate::bundles::Scaffold;

//========//
// Status //
//========//

/// How trustworthy an abundance estimate is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbundanceStatus {
    /// The estimate can be tested.
    Ok,

    /// Too few fragments were observed to test the estimate.
    LowData,

    /// Estimation failed numerically.
    Failed,
}

impl AbundanceStatus {
    fn severity(&self) -> u8 {
        match self {
            AbundanceStatus::Ok => 0,
            AbundanceStatus::LowData => 1,
            AbundanceStatus::Failed => 2,
        }
    }

    /// The more severe of two statuses.
    pub fn worst(self, other: AbundanceStatus) -> AbundanceStatus {
        match other.severity() > self.severity() {
            true => other,
            false => self,
        }
    }
}

//============//
// Abundances //
//============//

/// An abundance estimate for a transcript or a group of transcripts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Abundance {
    /// Transcript or group id.
    pub id: String,

    /// Genes the feature belongs to.
    pub gene_ids: BTreeSet<String>,

    /// Names of those genes.
    pub gene_names: BTreeSet<String>,

    /// Transcription start sites of the feature.
    pub tss_ids: BTreeSet<String>,

    /// Proteins the feature encodes.
    pub protein_ids: BTreeSet<String>,

    /// Class code relative to the reference (isoforms only).
    pub class_code: Option<char>,

    /// Closest reference transcript (isoforms only).
    pub nearest_ref: Option<String>,

    /// Spliced length; the longest member for groups.
    pub length: u64,

    /// Normalized fragment count.
    pub counts: f64,

    /// Fragments per kilobase of transcript per million mapped fragments.
    pub fpkm: f64,

    /// Variance of the FPKM estimate.
    pub fpkm_variance: f64,

    /// Whether the estimate can be tested.
    pub status: AbundanceStatus,
}

impl Abundance {
    /// An abundance for `scaffold` with no fragments assigned yet.
    pub fn for_scaffold(scaffold: &Scaffold) -> Self {
        let single = |s: &Option<String>| s.iter().cloned().collect::<BTreeSet<_>>();

        Abundance {
            id: scaffold.transcript_id.clone(),
            gene_ids: BTreeSet::from([scaffold.gene_id.clone()]),
            gene_names: single(&scaffold.gene_name),
            tss_ids: single(&scaffold.tss_id),
            protein_ids: single(&scaffold.protein_id),
            class_code: Some(scaffold.class_code),
            nearest_ref: scaffold.nearest_ref.clone(),
            length: scaffold.length(),
            counts: 0.0,
            fpkm: 0.0,
            fpkm_variance: 0.0,
            status: AbundanceStatus::Ok,
        }
    }

    /// The gene this feature is grouped under.
    pub fn gene_id(&self) -> Option<&str> {
        self.gene_ids.iter().next().map(|s| s.as_str())
    }

    /// A comma separated list of the gene names, or `-` if there are none.
    pub fn description(&self) -> String {
        match self.gene_names.is_empty() {
            true => String::from("-"),
            false => self
                .gene_names
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// A group of abundances, together with its aggregate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AbundanceGroup {
    /// The aggregate of all members.
    pub summary: Abundance,

    /// The members, in the order they were added.
    pub members: Vec<Abundance>,
}

impl AbundanceGroup {
    /// Aggregates `members` under `id`: counts, FPKM and variance are summed,
    /// descriptive sets are merged and the most severe status wins.
    pub fn aggregate(id: &str, members: Vec<Abundance>) -> Self {
        let mut summary = Abundance {
            id: id.to_string(),
            gene_ids: BTreeSet::new(),
            gene_names: BTreeSet::new(),
            tss_ids: BTreeSet::new(),
            protein_ids: BTreeSet::new(),
            class_code: None,
            nearest_ref: None,
            length: 0,
            counts: 0.0,
            fpkm: 0.0,
            fpkm_variance: 0.0,
            status: AbundanceStatus::Ok,
        };

        for member in &members {
            summary.gene_ids.extend(member.gene_ids.iter().cloned());
            summary.gene_names.extend(member.gene_names.iter().cloned());
            summary.tss_ids.extend(member.tss_ids.iter().cloned());
            summary.protein_ids.extend(member.protein_ids.iter().cloned());
            summary.length = summary.length.max(member.length);
            summary.counts += member.counts;
            summary.fpkm += member.fpkm;
            summary.fpkm_variance += member.fpkm_variance;
            summary.status = summary.status.worst(member.status);
        }

        AbundanceGroup { summary, members }
    }

    /// Each member's share of the group FPKM. `None` if the group FPKM is
    /// zero.
    pub fn fpkm_fractions(&self) -> Option<Vec<f64>> {
        if self.summary.fpkm <= 0.0 {
            return None;
        }

        Some(
            self.members
                .iter()
                .map(|m| m.fpkm / self.summary.fpkm)
                .collect(),
        )
    }
}

//============//
// Categories //
//============//

/// Categories of features whose abundance is tested directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureCategory {
    /// Individual transcripts.
    Isoform,

    /// Transcripts sharing a transcription start site.
    TssGroup,

    /// Genes.
    Gene,

    /// Transcripts sharing a coding sequence.
    Cds,
}

impl FeatureCategory {
    /// Every category, in reporting order.
    pub const ALL: [FeatureCategory; 4] = [
        FeatureCategory::Isoform,
        FeatureCategory::TssGroup,
        FeatureCategory::Gene,
        FeatureCategory::Cds,
    ];

    /// Short name used in file names.
    pub fn name(&self) -> &'static str {
        match self {
            FeatureCategory::Isoform => "isoform",
            FeatureCategory::TssGroup => "tss_group",
            FeatureCategory::Gene => "gene",
            FeatureCategory::Cds => "cds",
        }
    }
}

/// Categories of tests on how a parent's abundance is distributed among its
/// members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructureCategory {
    /// Isoforms within a TSS group.
    Splicing,

    /// TSS groups within a gene.
    Promoter,

    /// CDS groups within a gene.
    CdsUse,
}

impl StructureCategory {
    /// Every category, in reporting order.
    pub const ALL: [StructureCategory; 3] = [
        StructureCategory::Splicing,
        StructureCategory::Promoter,
        StructureCategory::CdsUse,
    ];

    /// Short name used in file names.
    pub fn name(&self) -> &'static str {
        match self {
            StructureCategory::Splicing => "splicing",
            StructureCategory::Promoter => "promoters",
            StructureCategory::CdsUse => "cds_use",
        }
    }
}

//===================//
// Sample Abundances //
//===================//

/// Every abundance of one sample at one locus.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SampleAbundances {
    /// The locus these abundances belong to.
    pub locus_tag: String,

    /// Isoforms, by transcript id.
    pub transcripts: IndexMap<String, Abundance>,

    /// Isoforms grouped by TSS id.
    pub primary_transcripts: IndexMap<String, AbundanceGroup>,

    /// TSS groups grouped by gene id.
    pub gene_primary_transcripts: IndexMap<String, AbundanceGroup>,

    /// Isoforms grouped by protein id.
    pub cds: IndexMap<String, AbundanceGroup>,

    /// CDS groups grouped by gene id.
    pub gene_cds: IndexMap<String, AbundanceGroup>,

    /// Isoforms grouped by gene id.
    pub genes: IndexMap<String, AbundanceGroup>,

    /// Total mass of the fragments in the bundle.
    pub cluster_mass: f64,

    /// Whether the sample produced data for this locus.
    pub usable: bool,
}

/// Groups abundances by a key, keeping first-seen order.
fn group_by<F>(abundances: &[Abundance], key: F) -> IndexMap<String, AbundanceGroup>
where
    F: Fn(&Abundance) -> Option<String>,
{
    let mut grouped: IndexMap<String, Vec<Abundance>> = IndexMap::new();
    for abundance in abundances {
        if let Some(k) = key(abundance) {
            grouped.entry(k).or_default().push(abundance.clone());
        }
    }

    grouped
        .into_iter()
        .map(|(k, members)| {
            let group = AbundanceGroup::aggregate(&k, members);
            (k, group)
        })
        .collect()
}

fn summaries(groups: &IndexMap<String, AbundanceGroup>) -> Vec<Abundance> {
    groups.values().map(|g| g.summary.clone()).collect()
}

impl SampleAbundances {
    /// Abundances for a sample that produced nothing at this locus.
    pub fn unusable(locus_tag: &str) -> Self {
        SampleAbundances {
            locus_tag: locus_tag.to_string(),
            usable: false,
            ..Default::default()
        }
    }

    /// Builds every grouping from the isoform abundances.
    pub fn from_isoforms(locus_tag: &str, isoforms: Vec<Abundance>, cluster_mass: f64) -> Self {
        let primary_transcripts = group_by(&isoforms, |a| a.tss_ids.iter().next().cloned());
        let cds = group_by(&isoforms, |a| a.protein_ids.iter().next().cloned());
        let genes = group_by(&isoforms, |a| a.gene_id().map(String::from));

        let gene_primary_transcripts =
            group_by(&summaries(&primary_transcripts), |a| a.gene_id().map(String::from));
        let gene_cds = group_by(&summaries(&cds), |a| a.gene_id().map(String::from));

        SampleAbundances {
            locus_tag: locus_tag.to_string(),
            transcripts: isoforms.into_iter().map(|a| (a.id.clone(), a)).collect(),
            primary_transcripts,
            gene_primary_transcripts,
            cds,
            gene_cds,
            genes,
            cluster_mass,
            usable: true,
        }
    }

    /// Looks up a feature of a category.
    pub fn feature(&self, category: FeatureCategory, id: &str) -> Option<&Abundance> {
        match category {
            FeatureCategory::Isoform => self.transcripts.get(id),
            FeatureCategory::TssGroup => self.primary_transcripts.get(id).map(|g| &g.summary),
            FeatureCategory::Gene => self.genes.get(id).map(|g| &g.summary),
            FeatureCategory::Cds => self.cds.get(id).map(|g| &g.summary),
        }
    }

    /// The ids of every feature of a category, in insertion order.
    pub fn feature_ids(&self, category: FeatureCategory) -> Vec<&str> {
        let groups = match category {
            FeatureCategory::Isoform => {
                return self.transcripts.keys().map(|k| k.as_str()).collect();
            }
            FeatureCategory::TssGroup => &self.primary_transcripts,
            FeatureCategory::Gene => &self.genes,
            FeatureCategory::Cds => &self.cds,
        };
        groups.keys().map(|k| k.as_str()).collect()
    }

    fn structure_map(&self, category: StructureCategory) -> &IndexMap<String, AbundanceGroup> {
        match category {
            StructureCategory::Splicing => &self.primary_transcripts,
            StructureCategory::Promoter => &self.gene_primary_transcripts,
            StructureCategory::CdsUse => &self.gene_cds,
        }
    }

    /// Looks up the parent group of a structure category.
    pub fn structure_group(&self, category: StructureCategory, id: &str) -> Option<&AbundanceGroup> {
        self.structure_map(category).get(id)
    }

    /// The ids of every parent group of a structure category, in insertion
    /// order.
    pub fn structure_ids(&self, category: StructureCategory) -> Vec<&str> {
        self.structure_map(category)
            .keys()
            .map(|k| k.as_str())
            .collect()
    }
}

//============//
// Estimation //
//============//

/// Errors raised while estimating abundances.
#[derive(Debug, PartialEq)]
pub enum EstimationError {
    /// The bundle carried no replicate information.
    NoReplicates,

    /// A hit claimed to come from a replicate the bundle does not have.
    UnknownReplicate {
        /// The replicate the hit claimed.
        replicate: usize,

        /// How many replicates the bundle has.
        num_replicates: usize,
    },
}

impl fmt::Display for EstimationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationError::NoReplicates => write!(f, "bundle has no replicates"),
            EstimationError::UnknownReplicate {
                replicate,
                num_replicates,
            } => write!(
                f,
                "hit from replicate {} but the bundle has {} replicates",
                replicate, num_replicates
            ),
        }
    }
}

impl error::Error for EstimationError {}

/// Estimates abundances for one sample from its combined bundle.
pub trait AbundanceEstimator: Send + Sync {
    /// Produces the abundances of every reference transcript in `bundle`.
    fn estimate(
        &self,
        locus_tag: &str,
        bundle: &CombinedBundle,
    ) -> Result<SampleAbundances, EstimationError>;
}

/// Counts fragments per transcript and turns the replicate mean into FPKM.
///
/// A hit that names a transcript of the locus is assigned to it; any other
/// hit is split evenly among the transcripts whose exons it overlaps. Each
/// replicate's counts and mapped mass are divided by its scale factor before
/// averaging. The FPKM variance comes from the spread across replicates when
/// there are at least two, and from a Poisson model otherwise. Loci with
/// fewer than `min_read_count` normalized fragments are reported as low data.
#[derive(Clone, Debug)]
pub struct ReplicateCountEstimator {
    /// Minimum normalized fragment count for a locus to be tested.
    pub min_read_count: f64,
}

impl Default for ReplicateCountEstimator {
    fn default() -> Self {
        ReplicateCountEstimator {
            min_read_count: 10.0,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

impl AbundanceEstimator for ReplicateCountEstimator {
    fn estimate(
        &self,
        locus_tag: &str,
        bundle: &CombinedBundle,
    ) -> Result<SampleAbundances, EstimationError> {
        let num_replicates = bundle.replicates.len();
        if num_replicates == 0 {
            return Err(EstimationError::NoReplicates);
        }

        let scaffolds = &bundle.ref_scaffolds;
        let mut raw = vec![vec![0.0; num_replicates]; scaffolds.len()];

        for hit in &bundle.hits {
            if hit.replicate >= num_replicates {
                return Err(EstimationError::UnknownReplicate {
                    replicate: hit.replicate,
                    num_replicates,
                });
            }

            let named = hit
                .transcript_id
                .as_ref()
                .and_then(|id| scaffolds.iter().position(|s| &s.transcript_id == id));

            let targets: Vec<usize> = match named {
                Some(t) => vec![t],
                None => scaffolds
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.overlaps_exons(hit.left, hit.right))
                    .map(|(t, _)| t)
                    .collect(),
            };

            if targets.is_empty() {
                continue;
            }

            let share = hit.mass / targets.len() as f64;
            for t in targets {
                raw[t][hit.replicate] += share;
            }
        }

        // Replicates without a bundle or with a degenerate scale factor do
        // not contribute.
        let usable: Vec<usize> = bundle
            .replicates
            .iter()
            .enumerate()
            .filter(|(_, r)| r.has_bundle && r.scale_factor.is_finite() && r.scale_factor > 0.0)
            .map(|(i, _)| i)
            .collect();

        let mut isoforms: Vec<Abundance> = scaffolds.iter().map(Abundance::for_scaffold).collect();

        if usable.is_empty() {
            debug!("{}: no replicate could be normalized", locus_tag);
            for isoform in isoforms.iter_mut() {
                isoform.status = AbundanceStatus::Failed;
            }
            return Ok(SampleAbundances::from_isoforms(
                locus_tag,
                isoforms,
                bundle.hits.iter().map(|h| h.mass).sum(),
            ));
        }

        // Counts are scaled per replicate while the map mass is shared by all
        // samples, so the scale factors reach the FPKMs. Before normalization
        // has run the raw library sizes stand in.
        let map_mass = match bundle.replicates[usable[0]].normalized_map_mass {
            Some(mass) => mass,
            None => {
                let masses: Vec<f64> = usable
                    .iter()
                    .map(|i| bundle.replicates[*i].total_map_mass)
                    .collect();
                mean(&masses)
            }
        };

        let frag_lens: Vec<f64> = usable
            .iter()
            .filter_map(|i| bundle.replicates[*i].mean_frag_len)
            .collect();
        let mean_frag_len = match frag_lens.is_empty() {
            true => 0.0,
            false => mean(&frag_lens),
        };

        let mut locus_count = 0.0;

        for (t, isoform) in isoforms.iter_mut().enumerate() {
            let normalized: Vec<f64> = usable
                .iter()
                .map(|i| raw[t][*i] / bundle.replicates[*i].scale_factor)
                .collect();
            let count = mean(&normalized);
            locus_count += count;

            let count_variance = match normalized.len() {
                1 => count,
                n => {
                    normalized
                        .iter()
                        .map(|c| (c - count) * (c - count))
                        .sum::<f64>()
                        / (n - 1) as f64
                }
            };

            let mut effective_length = isoform.length as f64 - mean_frag_len + 1.0;
            if effective_length < 1.0 {
                effective_length = isoform.length as f64;
            }

            isoform.counts = count;

            if isoform.length == 0 || map_mass <= 0.0 {
                isoform.status = AbundanceStatus::Failed;
                continue;
            }

            let per_fragment = 1e9 / (effective_length * map_mass);
            isoform.fpkm = count * per_fragment;
            isoform.fpkm_variance = count_variance * per_fragment * per_fragment;
        }

        if locus_count < self.min_read_count {
            for isoform in isoforms
                .iter_mut()
                .filter(|i| i.status == AbundanceStatus::Ok)
            {
                isoform.status = AbundanceStatus::LowData;
            }
        }

        let cluster_mass = bundle.hits.iter().map(|h| h.mass).sum();
        Ok(SampleAbundances::from_isoforms(
            locus_tag,
            isoforms,
            cluster_mass,
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// An isoform abundance with the given grouping attributes and FPKM.
    pub fn isoform(id: &str, gene: &str, tss: Option<&str>, fpkm: f64) -> Abundance {
        Abundance {
            id: id.to_string(),
            gene_ids: BTreeSet::from([gene.to_string()]),
            gene_names: BTreeSet::from([gene.to_uppercase()]),
            tss_ids: tss.iter().map(|s| s.to_string()).collect(),
            protein_ids: BTreeSet::new(),
            class_code: Some('='),
            nearest_ref: None,
            length: 1_000,
            counts: fpkm,
            fpkm,
            fpkm_variance: fpkm,
            status: AbundanceStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::isoform;
    use super::*;
    use crate::bundles::factory::ReplicateContext;
    use crate::bundles::testing::scaffold;
    use crate::bundles::LocusSpan;
    use crate::bundles::ReadHit;
    use approx::assert_relative_eq;

    #[test]
    pub fn test_status_ordering() {
        use AbundanceStatus::*;
        assert_eq!(Ok.worst(LowData), LowData);
        assert_eq!(LowData.worst(Failed), Failed);
        assert_eq!(Failed.worst(Ok), Failed);
        assert_eq!(Ok.worst(Ok), Ok);
    }

    #[test]
    pub fn test_group_aggregation() {
        let mut low = isoform("t2", "g1", Some("tss1"), 2.0);
        low.status = AbundanceStatus::LowData;

        let group = AbundanceGroup::aggregate("tss1", vec![isoform("t1", "g1", Some("tss1"), 6.0), low]);
        assert_eq!(group.summary.fpkm, 8.0);
        assert_eq!(group.summary.counts, 8.0);
        assert_eq!(group.summary.status, AbundanceStatus::LowData);
        assert_eq!(group.fpkm_fractions(), Some(vec![0.75, 0.25]));
        assert_eq!(group.summary.description(), "G1");
    }

    #[test]
    pub fn test_groupings_from_isoforms() {
        let mut with_protein = isoform("t3", "g2", Some("tss3"), 1.0);
        with_protein.protein_ids.insert(String::from("p1"));

        let sample = SampleAbundances::from_isoforms(
            "chr1:0-100",
            vec![
                isoform("t1", "g1", Some("tss1"), 1.0),
                isoform("t2", "g1", Some("tss2"), 2.0),
                with_protein,
                isoform("t4", "g2", None, 4.0),
            ],
            10.0,
        );

        assert!(sample.usable);
        assert_eq!(sample.feature_ids(FeatureCategory::Isoform).len(), 4);
        assert_eq!(sample.feature_ids(FeatureCategory::TssGroup), vec!["tss1", "tss2", "tss3"]);
        assert_eq!(sample.feature_ids(FeatureCategory::Gene), vec!["g1", "g2"]);
        assert_eq!(sample.feature_ids(FeatureCategory::Cds), vec!["p1"]);
        assert_eq!(sample.feature(FeatureCategory::Gene, "g2").unwrap().fpkm, 5.0);

        let promoters = sample
            .structure_group(StructureCategory::Promoter, "g1")
            .unwrap();
        assert_eq!(promoters.members.len(), 2);
        assert_eq!(sample.structure_ids(StructureCategory::CdsUse), vec!["g2"]);
    }

    fn combined(hits: Vec<(u64, usize, Option<&str>)>, replicates: Vec<f64>) -> CombinedBundle {
        CombinedBundle {
            span: LocusSpan {
                reference_id: 0,
                left: 0,
                right: 1_500,
            },
            ref_scaffolds: vec![scaffold("a", "g1", 0), scaffold("b", "g1", 500)],
            hits: hits
                .into_iter()
                .map(|(left, replicate, tid)| ReadHit {
                    reference: String::from("chr1"),
                    left,
                    right: left + 50,
                    transcript_id: tid.map(String::from),
                    mass: 1.0,
                    replicate,
                })
                .collect(),
            replicates: replicates
                .into_iter()
                .map(|scale_factor| ReplicateContext {
                    has_bundle: true,
                    total_map_mass: 1e6,
                    scale_factor,
                    normalized_map_mass: None,
                    mean_frag_len: Some(1.0),
                })
                .collect(),
        }
    }

    #[test]
    pub fn test_hits_are_assigned_and_split() {
        let bundle = combined(
            vec![(10, 0, None), (600, 0, None), (600, 0, Some("b"))],
            vec![1.0],
        );
        let estimator = ReplicateCountEstimator { min_read_count: 0.0 };
        let sample = estimator.estimate("locus", &bundle).unwrap();

        assert_relative_eq!(sample.transcripts["a"].counts, 1.5);
        assert_relative_eq!(sample.transcripts["b"].counts, 1.5);
        assert_relative_eq!(sample.transcripts["a"].fpkm, 1.5 * 1e9 / (1_000.0 * 1e6));
        assert_eq!(sample.cluster_mass, 3.0);
    }

    #[test]
    pub fn test_scale_factors_normalize_replicates() {
        // Replicate 1 was sequenced twice as deep.
        let bundle = combined(
            vec![(10, 0, None), (10, 1, None), (20, 1, None)],
            vec![1.0, 2.0],
        );
        let estimator = ReplicateCountEstimator { min_read_count: 0.0 };
        let sample = estimator.estimate("locus", &bundle).unwrap();

        assert_relative_eq!(sample.transcripts["a"].counts, 1.0);
        assert_relative_eq!(sample.transcripts["a"].fpkm_variance, 0.0);
    }

    #[test]
    pub fn test_scale_factor_reaches_fpkm() {
        let hits: Vec<(u64, usize, Option<&str>)> = (0..40).map(|i| (10 + i, 0, None)).collect();
        let estimator = ReplicateCountEstimator { min_read_count: 0.0 };

        let fpkms: Vec<f64> = [1.0, 2.0]
            .iter()
            .map(|scale_factor| {
                let mut bundle = combined(hits.clone(), vec![*scale_factor]);
                bundle.replicates[0].normalized_map_mass = Some(1e6);
                estimator.estimate("locus", &bundle).unwrap().transcripts["a"].fpkm
            })
            .collect();

        assert!(fpkms[0] > 0.0);
        assert_relative_eq!(fpkms[1], fpkms[0] / 2.0, max_relative = 1e-12);
    }

    #[test]
    pub fn test_low_data_and_degenerate_replicates() {
        let bundle = combined(vec![(10, 0, None)], vec![1.0]);
        let sample = ReplicateCountEstimator::default()
            .estimate("locus", &bundle)
            .unwrap();
        assert_eq!(sample.transcripts["a"].status, AbundanceStatus::LowData);

        let bundle = combined(vec![(10, 0, None)], vec![0.0]);
        let sample = ReplicateCountEstimator::default()
            .estimate("locus", &bundle)
            .unwrap();
        assert_eq!(sample.genes["g1"].summary.status, AbundanceStatus::Failed);
    }

    #[test]
    pub fn test_estimation_errors() {
        let estimator = ReplicateCountEstimator::default();

        let bundle = combined(vec![], vec![]);
        assert_eq!(
            estimator.estimate("locus", &bundle).unwrap_err(),
            EstimationError::NoReplicates
        );

        let bundle = combined(vec![(10, 3, None)], vec![1.0]);
        assert!(matches!(
            estimator.estimate("locus", &bundle),
            Err(EstimationError::UnknownReplicate { replicate: 3, .. })
        ));
    }
}
