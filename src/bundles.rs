//! Loci, reference scaffolds, read hits and the producers that bundle them.
//!
//! A [`HitBundle`] is the unit of work for the whole engine: the reference
//! transcript models ([`Scaffold`]s) for one genomic locus together with the
//! fragments ([`ReadHit`]s) one replicate placed there. Bundles are produced,
//! one locus at a time and in genomic order, by a [`BundleProducer`]; the
//! [`factory`] module then walks the producers of all replicates of a
//! condition in lockstep.

pub mod factory;
pub mod producer;

use std::fmt;

use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;

use crate::utils::histogram::Histogram;

//========================//
// Reference Sequence IDs //
//========================//

/// Ordered table of reference sequence names. The position of a name in the
/// table is its numeric id, and loci are ordered by that id first.
#[derive(Clone, Debug, Default)]
pub struct RefSequenceTable {
    names: IndexSet<String>,
}

impl RefSequenceTable {
    /// Returns the id for a reference sequence name, inserting the name if it
    /// has not been seen before.
    pub fn get_or_insert(&mut self, name: &str) -> usize {
        match self.names.get_index_of(name) {
            Some(id) => id,
            None => self.names.insert_full(name.to_string()).0,
        }
    }

    /// Looks up the id for a reference sequence name.
    pub fn id(&self, name: &str) -> Option<usize> {
        self.names.get_index_of(name)
    }

    /// Looks up the name for a reference sequence id.
    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get_index(id).map(|s| s.as_str())
    }

    /// The number of reference sequences in the table.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

//===========//
// Scaffolds //
//===========//

/// Strand of a transcript model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    /// Forward (`+`) strand.
    Forward,

    /// Reverse (`-`) strand.
    Reverse,

    /// Strand not known.
    Unknown,
}

/// A transcript model from the reference annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaffold {
    /// The annotated transcript id.
    pub transcript_id: String,

    /// Id of the reference sequence within the [`RefSequenceTable`].
    pub reference_id: usize,

    /// Strand of the transcript.
    pub strand: Strand,

    /// Exons as sorted, half-open, zero-based `(start, end)` intervals.
    pub exons: Vec<(u64, u64)>,

    /// The gene this transcript belongs to.
    pub gene_id: String,

    /// Human readable gene name, if annotated.
    pub gene_name: Option<String>,

    /// Transcription start site group, if annotated.
    pub tss_id: Option<String>,

    /// Protein (coding sequence) id, if annotated.
    pub protein_id: Option<String>,

    /// Class code of the transcript relative to the reference.
    pub class_code: char,

    /// The closest reference transcript, if annotated.
    pub nearest_ref: Option<String>,
}

impl Scaffold {
    /// The leftmost coordinate of the scaffold.
    pub fn left(&self) -> u64 {
        self.exons.first().map(|e| e.0).unwrap_or_default()
    }

    /// The rightmost coordinate of the scaffold (exclusive).
    pub fn right(&self) -> u64 {
        self.exons.last().map(|e| e.1).unwrap_or_default()
    }

    /// The spliced length of the transcript.
    pub fn length(&self) -> u64 {
        self.exons.iter().map(|(s, e)| e.saturating_sub(*s)).sum()
    }

    /// The identity of the scaffold across replicates.
    pub fn annotated_trans_id(&self) -> &str {
        &self.transcript_id
    }

    /// Whether any exon of the scaffold overlaps the half-open interval
    /// `[left, right)`.
    pub fn overlaps_exons(&self, left: u64, right: u64) -> bool {
        self.exons.iter().any(|(s, e)| *s < right && left < *e)
    }
}

//===========//
// Read Hits //
//===========//

fn default_mass() -> f64 {
    1.0
}

/// An aligned fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadHit {
    /// Name of the reference sequence the fragment aligned to.
    pub reference: String,

    /// Leftmost aligned coordinate (zero-based, inclusive).
    pub left: u64,

    /// Rightmost aligned coordinate (exclusive).
    pub right: u64,

    /// The transcript the aligner assigned this fragment to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_id: Option<String>,

    /// Fragment mass; multi-mapped fragments carry a fraction of one.
    #[serde(default = "default_mass")]
    pub mass: f64,

    /// Which replicate of a combined bundle contributed this hit.
    #[serde(skip)]
    pub replicate: usize,
}

impl ReadHit {
    /// The length of the fragment on the genome.
    pub fn fragment_length(&self) -> u64 {
        self.right.saturating_sub(self.left)
    }
}

//=========//
// Bundles //
//=========//

/// The genomic region a bundle covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocusSpan {
    /// Id of the reference sequence within the [`RefSequenceTable`].
    pub reference_id: usize,

    /// Leftmost coordinate (zero-based, inclusive).
    pub left: u64,

    /// Rightmost coordinate (exclusive).
    pub right: u64,
}

impl LocusSpan {
    /// Renders the span as `name:left-right`, falling back to the numeric id
    /// for references missing from the table.
    pub fn tag(&self, table: &RefSequenceTable) -> String {
        match table.name(self.reference_id) {
            Some(name) => format!("{}:{}-{}", name, self.left, self.right),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for LocusSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.reference_id, self.left, self.right)
    }
}

/// One replicate's reference scaffolds and hits for a single locus.
#[derive(Clone, Debug, Default)]
pub struct HitBundle {
    /// The region covered by the bundle.
    pub span: LocusSpan,

    /// Reference transcript models in the locus, in a stable order.
    pub ref_scaffolds: Vec<Scaffold>,

    /// Fragments placed in the locus.
    pub hits: Vec<ReadHit>,
}

impl HitBundle {
    /// Empties the bundle so it can be reused for the next locus.
    pub fn clear(&mut self) {
        self.span = LocusSpan::default();
        self.ref_scaffolds.clear();
        self.hits.clear();
    }

    /// The total mass of the hits in the bundle.
    pub fn raw_mass(&self) -> f64 {
        self.hits.iter().map(|h| h.mass).sum()
    }
}

//=======================//
// Read Group Properties //
//=======================//

/// Per-replicate properties of the library.
#[derive(Clone, Debug)]
pub struct ReadGroupProperties {
    /// Total mass of mapped fragments in the replicate.
    pub total_map_mass: f64,

    /// Fragment length distribution.
    pub frag_len_dist: Histogram,

    /// Normalization scale factor; raw counts are divided by it.
    pub scale_factor: f64,

    /// Map mass shared by every sample once normalization has run. FPKMs of
    /// all samples are computed against this one value so the scale factors
    /// carry through to them.
    pub normalized_map_mass: Option<f64>,
}

impl Default for ReadGroupProperties {
    fn default() -> Self {
        ReadGroupProperties {
            total_map_mass: 0.0,
            frag_len_dist: Histogram::default(),
            scale_factor: 1.0,
            normalized_map_mass: None,
        }
    }
}

//===========//
// Producers //
//===========//

/// A source of bundles for one replicate.
///
/// Producers yield loci in increasing genomic order. Every producer that is
/// synchronized with others must be given the same reference annotation so
/// that all of them partition the genome identically.
pub trait BundleProducer: Send {
    /// Fills `bundle` with the next locus. Returns `false` once the producer
    /// is exhausted.
    fn next_bundle(&mut self, bundle: &mut HitBundle) -> bool;

    /// Rewinds the producer to the start of the genome.
    fn reset(&mut self);

    /// Replaces the reference transcript models. Implementations keep their
    /// own copy.
    fn set_ref_rnas(&mut self, rnas: &[Scaffold]);

    /// Replaces the transcript models whose hits should be ignored.
    fn set_mask_rnas(&mut self, rnas: &[Scaffold]);

    /// The library properties of this replicate.
    fn read_group_properties(&self) -> &ReadGroupProperties;

    /// Sets the normalization scale factor of this replicate.
    fn set_scale_factor(&mut self, scale_factor: f64);

    /// Sets the map mass shared by all samples after normalization.
    fn set_normalized_map_mass(&mut self, mass: f64);

    /// The number of loci this producer will yield.
    fn num_bundles(&self) -> usize;
}

/// Test doubles shared by the unit tests of the engine.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Builds a single-exon scaffold of length 1,000 starting at `left`.
    pub fn scaffold(id: &str, gene: &str, left: u64) -> Scaffold {
        Scaffold {
            transcript_id: id.to_string(),
            reference_id: 0,
            strand: Strand::Forward,
            exons: vec![(left, left + 1_000)],
            gene_id: gene.to_string(),
            gene_name: None,
            tss_id: None,
            protein_id: None,
            class_code: '=',
            nearest_ref: None,
        }
    }

    /// A locus at `left` holding one scaffold per id and `hits` unit-mass
    /// fragments.
    pub fn hit_bundle(left: u64, ids: &[&str], hits: usize) -> HitBundle {
        HitBundle {
            span: LocusSpan {
                reference_id: 0,
                left,
                right: left + 1_000,
            },
            ref_scaffolds: ids.iter().map(|id| scaffold(id, "g", left)).collect(),
            hits: (0..hits)
                .map(|i| ReadHit {
                    reference: String::from("chr1"),
                    left: left + i as u64,
                    right: left + i as u64 + 100,
                    transcript_id: None,
                    mass: 1.0,
                    replicate: 0,
                })
                .collect(),
        }
    }

    /// A producer that replays a fixed list of bundles.
    pub struct VecProducer {
        bundles: Vec<HitBundle>,
        cursor: usize,
        props: ReadGroupProperties,
    }

    impl VecProducer {
        pub fn new(bundles: Vec<HitBundle>) -> Self {
            let mut props = ReadGroupProperties {
                total_map_mass: bundles.iter().map(|b| b.raw_mass()).sum(),
                ..Default::default()
            };
            for hit in bundles.iter().flat_map(|b| b.hits.iter()) {
                let _ = props
                    .frag_len_dist
                    .increment(hit.fragment_length() as usize);
            }

            VecProducer {
                bundles,
                cursor: 0,
                props,
            }
        }
    }

    impl BundleProducer for VecProducer {
        fn next_bundle(&mut self, bundle: &mut HitBundle) -> bool {
            match self.bundles.get(self.cursor) {
                Some(b) => {
                    *bundle = b.clone();
                    self.cursor += 1;
                    true
                }
                None => false,
            }
        }

        fn reset(&mut self) {
            self.cursor = 0;
        }

        fn set_ref_rnas(&mut self, _: &[Scaffold]) {}

        fn set_mask_rnas(&mut self, _: &[Scaffold]) {}

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
            self.bundles.len()
        }
    }
}
