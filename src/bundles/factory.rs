//! Merges the bundles of several replicates of a condition, one locus at a
//! time.
//!
//! The [`ReplicatedBundleFactory`] behaves like a merge-join cursor over N
//! sorted streams that are assumed to be partitioned identically: every call
//! to [`next_bundle`](ReplicatedBundleFactory::next_bundle) advances each
//! producer exactly once and folds whatever they yielded into a single
//! [`CombinedBundle`].

use std::error;
use std::fmt;

use tracing::debug;

use super::BundleProducer;
use super::HitBundle;
use super::LocusSpan;
use super::ReadGroupProperties;
use super::ReadHit;
use super::Scaffold;
use crate::normalize::CountTable;

//========//
// Errors //
//========//

/// Errors raised while synchronizing replicates. These indicate that the
/// replicates were not configured consistently and are not recoverable.
#[derive(Debug, PartialEq)]
pub enum SynchronizeError {
    /// Two replicates disagree on the reference scaffolds of a locus.
    AnnotationMismatch {
        /// The locus being merged.
        locus: String,

        /// Index of the replicate the others are compared against.
        expected_replicate: usize,

        /// Index of the disagreeing replicate.
        replicate: usize,

        /// What differed.
        reason: String,
    },

    /// Two replicates reported counts for different loci at the same position
    /// of their count tables.
    UnalignedCountTables {
        /// Position within the count table.
        row: usize,

        /// The label the first replicate reported.
        expected: String,

        /// The label the disagreeing replicate reported.
        found: String,
    },

    /// The number of scale factors differs from the number of replicates.
    ScaleFactorCount {
        /// The number of replicates.
        expected: usize,

        /// The number of scale factors given.
        found: usize,
    },
}

impl fmt::Display for SynchronizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynchronizeError::AnnotationMismatch {
                locus,
                expected_replicate,
                replicate,
                reason,
            } => write!(
                f,
                "replicates {} and {} disagree on the reference annotation at locus {}: {}. \
                Were all replicates given the same annotation?",
                expected_replicate, replicate, locus, reason
            ),
            SynchronizeError::UnalignedCountTables {
                row,
                expected,
                found,
            } => write!(
                f,
                "count tables are not aligned at row {}: expected locus {}, found {}",
                row, expected, found
            ),
            SynchronizeError::ScaleFactorCount { expected, found } => write!(
                f,
                "{} scale factors were given for {} replicates",
                found, expected
            ),
        }
    }
}

impl error::Error for SynchronizeError {}

//=================//
// Combined Bundle //
//=================//

/// What the estimator needs to know about one replicate of a combined bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicateContext {
    /// Whether the replicate yielded a bundle for this locus.
    pub has_bundle: bool,

    /// Total mapped mass of the replicate.
    pub total_map_mass: f64,

    /// Normalization scale factor of the replicate.
    pub scale_factor: f64,

    /// Map mass shared by all samples, once normalization has run.
    pub normalized_map_mass: Option<f64>,

    /// Mean fragment length of the replicate, if known.
    pub mean_frag_len: Option<f64>,
}

impl ReplicateContext {
    fn from_properties(props: &ReadGroupProperties, has_bundle: bool) -> Self {
        ReplicateContext {
            has_bundle,
            total_map_mass: props.total_map_mass,
            scale_factor: props.scale_factor,
            normalized_map_mass: props.normalized_map_mass,
            mean_frag_len: props.frag_len_dist.mean(),
        }
    }
}

/// The merge of one locus across all replicates of a condition.
#[derive(Clone, Debug, Default)]
pub struct CombinedBundle {
    /// The region covered by the bundle.
    pub span: LocusSpan,

    /// Reference transcript models shared by all replicates.
    pub ref_scaffolds: Vec<Scaffold>,

    /// Pooled hits, each tagged with the replicate it came from.
    pub hits: Vec<ReadHit>,

    /// One entry per replicate, in producer order.
    pub replicates: Vec<ReplicateContext>,
}

impl CombinedBundle {
    /// Pools the bundles of all replicates. `bundles[i]` is `None` when
    /// replicate `i` yielded nothing at this position.
    pub fn combine(bundles: Vec<Option<HitBundle>>, replicates: Vec<ReplicateContext>) -> Self {
        let mut combined = CombinedBundle {
            replicates,
            ..Default::default()
        };

        let mut have_scaffolds = false;
        for (replicate, bundle) in bundles.into_iter().enumerate() {
            let bundle = match bundle {
                Some(b) => b,
                None => continue,
            };

            if !have_scaffolds {
                combined.span = bundle.span;
                combined.ref_scaffolds = bundle.ref_scaffolds;
                have_scaffolds = true;
            } else {
                combined.span.left = combined.span.left.min(bundle.span.left);
                combined.span.right = combined.span.right.max(bundle.span.right);
            }

            combined
                .hits
                .extend(bundle.hits.into_iter().map(|mut hit| {
                    hit.replicate = replicate;
                    hit
                }));
        }

        combined
            .hits
            .sort_by(|a, b| (a.left, a.right).cmp(&(b.left, b.right)));
        combined
    }

    /// Empties the bundle so it can be reused for the next locus.
    pub fn clear(&mut self) {
        *self = CombinedBundle::default();
    }

    /// The number of replicates that yielded a bundle for this locus.
    pub fn num_non_empty(&self) -> usize {
        self.replicates.iter().filter(|r| r.has_bundle).count()
    }
}

//================//
// Replicate Maps //
//================//

/// Results of a counting pass over all replicates of a condition.
#[derive(Clone, Debug)]
pub struct ReplicateMaps {
    /// Raw hit mass per locus (rows) and replicate (columns).
    pub counts: CountTable,

    /// Total mapped mass of each replicate.
    pub total_map_masses: Vec<f64>,

    /// Shortest fragment length observed across all replicates.
    pub min_frag_len: Option<usize>,

    /// Longest fragment length observed across all replicates.
    pub max_frag_len: Option<usize>,
}

//====================//
// The Factory Proper //
//====================//

/// Walks the producers of every replicate of a condition in lockstep.
pub struct ReplicatedBundleFactory {
    producers: Vec<Box<dyn BundleProducer>>,
}

impl ReplicatedBundleFactory {
    /// Creates a factory that takes ownership of the given producers.
    pub fn new(producers: Vec<Box<dyn BundleProducer>>) -> Self {
        ReplicatedBundleFactory { producers }
    }

    /// The number of loci the first replicate will yield.
    pub fn num_bundles(&self) -> usize {
        self.producers
            .first()
            .map(|p| p.num_bundles())
            .unwrap_or_default()
    }

    /// The number of replicates.
    pub fn num_replicates(&self) -> usize {
        self.producers.len()
    }

    /// The library properties of every replicate, in producer order.
    pub fn read_group_properties(&self) -> Vec<&ReadGroupProperties> {
        self.producers
            .iter()
            .map(|p| p.read_group_properties())
            .collect()
    }

    /// Advances every replicate by one locus and merges the results into
    /// `out`.
    ///
    /// Returns `Ok(false)` only when every replicate is exhausted. A locus
    /// that only some replicates cover still yields `Ok(true)`. Replicates
    /// that disagree on the reference scaffolds of the locus produce an
    /// error.
    pub fn next_bundle(&mut self, out: &mut CombinedBundle) -> Result<bool, SynchronizeError> {
        out.clear();

        let mut bundles = Vec::with_capacity(self.producers.len());
        let mut contexts = Vec::with_capacity(self.producers.len());
        let mut non_empty_bundle = false;

        for producer in self.producers.iter_mut() {
            let mut bundle = HitBundle::default();
            let has_bundle = producer.next_bundle(&mut bundle);
            non_empty_bundle |= has_bundle;

            contexts.push(ReplicateContext::from_properties(
                producer.read_group_properties(),
                has_bundle,
            ));
            bundles.push(has_bundle.then_some(bundle));
        }

        if !non_empty_bundle {
            return Ok(false);
        }

        validate_scaffolds(&bundles)?;

        *out = CombinedBundle::combine(bundles, contexts);
        Ok(true)
    }

    /// Rewinds every replicate to the start of the genome.
    pub fn reset(&mut self) {
        for producer in self.producers.iter_mut() {
            producer.reset();
        }
    }

    /// Gives every replicate its own copy of the reference transcripts.
    pub fn set_ref_rnas(&mut self, rnas: &[Scaffold]) {
        for producer in self.producers.iter_mut() {
            producer.set_ref_rnas(rnas);
        }
    }

    /// Gives every replicate its own copy of the masked transcripts.
    pub fn set_mask_rnas(&mut self, rnas: &[Scaffold]) {
        for producer in self.producers.iter_mut() {
            producer.set_mask_rnas(rnas);
        }
    }

    /// Assigns one normalization scale factor per replicate, in producer
    /// order. Nothing is assigned if the number of factors does not match the
    /// number of replicates.
    pub fn set_scale_factors(&mut self, scale_factors: &[f64]) -> Result<(), SynchronizeError> {
        if scale_factors.len() != self.producers.len() {
            return Err(SynchronizeError::ScaleFactorCount {
                expected: self.producers.len(),
                found: scale_factors.len(),
            });
        }

        for (producer, factor) in self.producers.iter_mut().zip(scale_factors) {
            producer.set_scale_factor(*factor);
        }

        Ok(())
    }

    /// Gives every replicate the map mass shared by all samples.
    pub fn set_normalized_map_mass(&mut self, mass: f64) {
        for producer in self.producers.iter_mut() {
            producer.set_normalized_map_mass(mass);
        }
    }

    /// Runs a counting pass over every replicate and rewinds them afterwards.
    pub fn inspect_replicate_maps(&mut self) -> Result<ReplicateMaps, SynchronizeError> {
        let mut counts = CountTable::default();
        let mut total_map_masses = Vec::with_capacity(self.producers.len());
        let mut min_frag_len: Option<usize> = None;
        let mut max_frag_len: Option<usize> = None;

        for (column, producer) in self.producers.iter_mut().enumerate() {
            producer.reset();

            let mut bundle = HitBundle::default();
            let mut row = 0;
            while producer.next_bundle(&mut bundle) {
                let label = bundle.span.to_string();
                let raw_count = bundle.raw_mass();

                if row < counts.len() {
                    if counts.labels[row] != label {
                        return Err(SynchronizeError::UnalignedCountTables {
                            row,
                            expected: counts.labels[row].clone(),
                            found: label,
                        });
                    }
                    counts.counts[row].push(raw_count);
                } else {
                    let mut values = vec![0.0; column];
                    values.push(raw_count);
                    counts.labels.push(label);
                    counts.counts.push(values);
                }

                row += 1;
                bundle.clear();
            }

            // Loci this replicate never reached count as zero.
            for values in counts.counts.iter_mut().skip(row) {
                values.push(0.0);
            }

            producer.reset();

            let props = producer.read_group_properties();
            total_map_masses.push(props.total_map_mass);
            if let Some(min) = props.frag_len_dist.min() {
                min_frag_len = Some(min_frag_len.map_or(min, |m| m.min(min)));
            }
            if let Some(max) = props.frag_len_dist.max() {
                max_frag_len = Some(max_frag_len.map_or(max, |m| m.max(max)));
            }

            debug!("  [*] Replicate {}: counted {} loci.", column, row);
        }

        Ok(ReplicateMaps {
            counts,
            total_map_masses,
            min_frag_len,
            max_frag_len,
        })
    }
}

/// Checks that every replicate which yielded a bundle agrees with the first
/// one on the number and identity of the reference scaffolds.
fn validate_scaffolds(bundles: &[Option<HitBundle>]) -> Result<(), SynchronizeError> {
    let mut present = bundles
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.as_ref().map(|b| (i, b)));

    let (first_index, first) = match present.next() {
        Some(p) => p,
        None => return Ok(()),
    };

    for (i, bundle) in present {
        let expected = &first.ref_scaffolds;
        let found = &bundle.ref_scaffolds;

        if expected.len() != found.len() {
            return Err(SynchronizeError::AnnotationMismatch {
                locus: first.span.to_string(),
                expected_replicate: first_index,
                replicate: i,
                reason: format!(
                    "{} reference transcripts versus {}",
                    expected.len(),
                    found.len()
                ),
            });
        }

        for (j, (a, b)) in expected.iter().zip(found.iter()).enumerate() {
            if a.annotated_trans_id() != b.annotated_trans_id() {
                return Err(SynchronizeError::AnnotationMismatch {
                    locus: first.span.to_string(),
                    expected_replicate: first_index,
                    replicate: i,
                    reason: format!(
                        "transcript {} is {} versus {}",
                        j,
                        a.annotated_trans_id(),
                        b.annotated_trans_id()
                    ),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::testing::{hit_bundle, VecProducer};

    #[test]
    pub fn test_next_bundle_yields_once_per_locus_regardless_of_coverage() {
        let loci = vec![
            hit_bundle(0, &["a", "b"], 3),
            hit_bundle(5_000, &["c"], 0),
            hit_bundle(9_000, &["d"], 2),
        ];

        // Second replicate has no hits in the first locus.
        let mut sparse = loci.clone();
        sparse[0].hits.clear();

        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(loci.clone())),
            Box::new(VecProducer::new(sparse)),
            Box::new(VecProducer::new(loci)),
        ]);

        let mut combined = CombinedBundle::default();
        let mut yielded = 0;
        while factory.next_bundle(&mut combined).unwrap() {
            yielded += 1;
        }
        assert_eq!(yielded, 3);
        assert!(!factory.next_bundle(&mut combined).unwrap());
    }

    #[test]
    pub fn test_next_bundle_tolerates_exhausted_replicates() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
            Box::new(VecProducer::new(vec![])),
        ]);

        let mut combined = CombinedBundle::default();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.num_non_empty(), 1);
        assert!(!combined.replicates[1].has_bundle);
        assert!(!factory.next_bundle(&mut combined).unwrap());
    }

    #[test]
    pub fn test_next_bundle_combines_hits_with_provenance() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 2)])),
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 3)])),
        ]);

        let mut combined = CombinedBundle::default();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.ref_scaffolds.len(), 1);
        assert_eq!(combined.hits.len(), 5);
        assert_eq!(combined.hits.iter().filter(|h| h.replicate == 1).count(), 3);
        assert!(combined
            .hits
            .windows(2)
            .all(|w| (w[0].left, w[0].right) <= (w[1].left, w[1].right)));
    }

    #[test]
    pub fn test_mismatched_annotation_fails_fast() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a", "b"], 1)])),
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a", "c"], 1)])),
        ]);

        let mut combined = CombinedBundle::default();
        let err = factory.next_bundle(&mut combined).unwrap_err();
        assert!(matches!(
            err,
            SynchronizeError::AnnotationMismatch { replicate: 1, .. }
        ));

        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a", "b"], 1)])),
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
        ]);
        assert!(factory.next_bundle(&mut combined).is_err());
    }

    #[test]
    pub fn test_reset_rewinds_every_replicate() {
        let loci = vec![hit_bundle(0, &["a"], 1), hit_bundle(5_000, &["b"], 1)];
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(loci.clone())),
            Box::new(VecProducer::new(loci)),
        ]);

        let mut combined = CombinedBundle::default();
        while factory.next_bundle(&mut combined).unwrap() {}
        factory.reset();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.span.left, 0);
    }

    #[test]
    pub fn test_inspect_replicate_maps() {
        let loci = vec![hit_bundle(0, &["a"], 4), hit_bundle(5_000, &["b"], 2)];
        let mut other = loci.clone();
        other[1].hits.truncate(1);

        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(loci)),
            Box::new(VecProducer::new(other)),
        ]);

        let maps = factory.inspect_replicate_maps().unwrap();
        assert_eq!(maps.counts.len(), 2);
        assert_eq!(maps.counts.counts[0], vec![4.0, 4.0]);
        assert_eq!(maps.counts.counts[1], vec![2.0, 1.0]);
        assert_eq!(maps.total_map_masses.len(), 2);

        // The producers were rewound.
        let mut combined = CombinedBundle::default();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.span.left, 0);
    }

    #[test]
    pub fn test_inspect_replicate_maps_rejects_unaligned_loci() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
            Box::new(VecProducer::new(vec![hit_bundle(7, &["a"], 1)])),
        ]);

        assert!(matches!(
            factory.inspect_replicate_maps(),
            Err(SynchronizeError::UnalignedCountTables { row: 0, .. })
        ));
    }

    #[test]
    pub fn test_set_scale_factors_reach_replicates() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
        ]);
        factory.set_scale_factors(&[0.5, 2.0]).unwrap();
        factory.set_normalized_map_mass(3.0);

        let mut combined = CombinedBundle::default();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.replicates[0].scale_factor, 0.5);
        assert_eq!(combined.replicates[1].scale_factor, 2.0);
        assert_eq!(combined.replicates[1].normalized_map_mass, Some(3.0));
    }

    #[test]
    pub fn test_set_scale_factors_rejects_wrong_length() {
        let mut factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
            Box::new(VecProducer::new(vec![hit_bundle(0, &["a"], 1)])),
        ]);

        assert_eq!(
            factory.set_scale_factors(&[0.5]),
            Err(SynchronizeError::ScaleFactorCount {
                expected: 2,
                found: 1
            })
        );

        let mut combined = CombinedBundle::default();
        assert!(factory.next_bundle(&mut combined).unwrap());
        assert_eq!(combined.replicates[0].scale_factor, 1.0);
    }
}
