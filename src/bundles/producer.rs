//! A bundle producer driven by the reference annotation.
//!
//! [`AnnotationBundleProducer`] partitions the genome into loci by clustering
//! reference transcripts whose spans overlap, then attaches the replicate's
//! pre-aligned hits to the locus they fall in. Because the partition depends
//! only on the annotation, every replicate given the same annotation yields
//! the same sequence of loci, which is what the synchronizer relies on.

use std::collections::HashMap;
use std::sync::Arc;

use rust_lapper::Interval;
use rust_lapper::Lapper;
use tracing::debug;
use tracing::warn;

use super::BundleProducer;
use super::HitBundle;
use super::LocusSpan;
use super::ReadGroupProperties;
use super::ReadHit;
use super::RefSequenceTable;
use super::Scaffold;
use crate::utils::histogram::Histogram;

/// Fragments longer than this are counted in the last bin of the fragment
/// length distribution.
const MAX_FRAGMENT_LENGTH: usize = 10_000;

/// One locus of the partition: a span, the scaffolds in it and the hits
/// placed in it (both as indices).
#[derive(Debug)]
struct Locus {
    span: LocusSpan,
    scaffolds: Vec<usize>,
    hits: Vec<usize>,
}

/// Produces bundles for one replicate from the reference annotation and the
/// replicate's hits.
pub struct AnnotationBundleProducer {
    /// Hits with a known reference sequence, paired with the id of that
    /// sequence and sorted by position.
    hits: Vec<(usize, ReadHit)>,

    ref_rnas: Vec<Scaffold>,
    mask_rnas: Vec<Scaffold>,

    loci: Vec<Locus>,
    cursor: usize,

    props: ReadGroupProperties,
}

impl AnnotationBundleProducer {
    /// Creates a producer over the given hits. Hits on reference sequences
    /// missing from `ref_table` are dropped. No loci are produced until
    /// [`set_ref_rnas`](BundleProducer::set_ref_rnas) is called.
    pub fn new(ref_table: Arc<RefSequenceTable>, hits: Vec<ReadHit>) -> Self {
        let mut unknown_references = 0usize;
        let mut frag_len_dist = Histogram::zero_based_with_capacity(MAX_FRAGMENT_LENGTH);

        let mut resolved = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = match ref_table.id(&hit.reference) {
                Some(id) => id,
                None => {
                    unknown_references += 1;
                    continue;
                }
            };

            let length = (hit.fragment_length() as usize).min(MAX_FRAGMENT_LENGTH);
            // The length was clamped to the capacity of the histogram above.
            frag_len_dist.increment(length).unwrap();

            resolved.push((id, hit));
        }

        if unknown_references > 0 {
            warn!(
                "{} hits were on reference sequences missing from the annotation and were ignored.",
                unknown_references
            );
        }

        resolved.sort_by(|(ra, a), (rb, b)| (ra, a.left, a.right).cmp(&(rb, b.left, b.right)));

        let mut producer = AnnotationBundleProducer {
            hits: resolved,
            ref_rnas: Vec::new(),
            mask_rnas: Vec::new(),
            loci: Vec::new(),
            cursor: 0,
            props: ReadGroupProperties {
                frag_len_dist,
                ..Default::default()
            },
        };
        producer.rebuild();
        producer
    }

    /// Recomputes the partition of the genome into loci, the assignment of
    /// hits to loci, and the total mapped mass.
    fn rebuild(&mut self) {
        self.cursor = 0;
        self.loci.clear();

        // (1) Order the scaffolds so that every replicate lists them in the
        // same order within a locus.
        self.ref_rnas.sort_by(|a, b| {
            (a.reference_id, a.left(), a.right(), &a.transcript_id).cmp(&(
                b.reference_id,
                b.left(),
                b.right(),
                &b.transcript_id,
            ))
        });

        // (2) Cluster scaffolds with overlapping spans into loci.
        for (i, scaffold) in self.ref_rnas.iter().enumerate() {
            let overlaps_last = matches!(
                self.loci.last(),
                Some(locus) if locus.span.reference_id == scaffold.reference_id
                    && scaffold.left() < locus.span.right
            );

            match overlaps_last {
                true => {
                    let last = self.loci.len() - 1;
                    let locus = &mut self.loci[last];
                    locus.span.right = locus.span.right.max(scaffold.right());
                    locus.scaffolds.push(i);
                }
                false => self.loci.push(Locus {
                    span: LocusSpan {
                        reference_id: scaffold.reference_id,
                        left: scaffold.left(),
                        right: scaffold.right(),
                    },
                    scaffolds: vec![i],
                    hits: Vec::new(),
                }),
            }
        }

        // (3) Index loci and masked exons by reference sequence.
        let mut locus_intervals: HashMap<usize, Vec<Interval<u64, usize>>> = HashMap::new();
        for (i, locus) in self.loci.iter().enumerate() {
            locus_intervals
                .entry(locus.span.reference_id)
                .or_default()
                .push(Interval {
                    start: locus.span.left,
                    stop: locus.span.right,
                    val: i,
                });
        }
        let locus_index: HashMap<usize, Lapper<u64, usize>> = locus_intervals
            .into_iter()
            .map(|(k, v)| (k, Lapper::new(v)))
            .collect();

        let mut mask_intervals: HashMap<usize, Vec<Interval<u64, usize>>> = HashMap::new();
        for (i, scaffold) in self.mask_rnas.iter().enumerate() {
            for (start, stop) in &scaffold.exons {
                mask_intervals
                    .entry(scaffold.reference_id)
                    .or_default()
                    .push(Interval {
                        start: *start,
                        stop: *stop,
                        val: i,
                    });
            }
        }
        let mask_index: HashMap<usize, Lapper<u64, usize>> = mask_intervals
            .into_iter()
            .map(|(k, v)| (k, Lapper::new(v)))
            .collect();

        // (4) Place every unmasked hit in the first locus it overlaps.
        let mut total_map_mass = 0.0;
        let mut masked = 0usize;
        let mut placed = 0usize;

        for (h, (reference_id, hit)) in self.hits.iter().enumerate() {
            if let Some(mask) = mask_index.get(reference_id) {
                if mask.find(hit.left, hit.right.max(hit.left + 1)).next().is_some() {
                    masked += 1;
                    continue;
                }
            }

            total_map_mass += hit.mass;

            if let Some(loci) = locus_index.get(reference_id) {
                if let Some(interval) = loci.find(hit.left, hit.right.max(hit.left + 1)).next() {
                    self.loci[interval.val].hits.push(h);
                    placed += 1;
                }
            }
        }

        self.props.total_map_mass = total_map_mass;

        debug!(
            "partitioned {} reference transcripts into {} loci; {} hits placed, {} masked",
            self.ref_rnas.len(),
            self.loci.len(),
            placed,
            masked
        );
    }
}

impl BundleProducer for AnnotationBundleProducer {
    fn next_bundle(&mut self, bundle: &mut HitBundle) -> bool {
        let locus = match self.loci.get(self.cursor) {
            Some(l) => l,
            None => return false,
        };

        bundle.clear();
        bundle.span = locus.span.clone();
        bundle.ref_scaffolds = locus
            .scaffolds
            .iter()
            .map(|i| self.ref_rnas[*i].clone())
            .collect();
        bundle.hits = locus.hits.iter().map(|i| self.hits[*i].1.clone()).collect();

        self.cursor += 1;
        true
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn set_ref_rnas(&mut self, rnas: &[Scaffold]) {
        self.ref_rnas = rnas.to_vec();
        self.rebuild();
    }

    fn set_mask_rnas(&mut self, rnas: &[Scaffold]) {
        self.mask_rnas = rnas.to_vec();
        self.rebuild();
    }

    fn read_group_properties(&self) -> &ReadGroupProperties {
        &self.props
    }

    fn set_scale_factor(&mut self, scale_factor: f64) {
        self.props.scale_factor = scale_factor;
    }

    fn set_normalized_map_mass(&mut self, mass: f64) {
        self.props.normalized_map_mass = Some(mass);
    }

    fn num_bundles(&self) -> usize {
        self.loci.len()
    }
}
