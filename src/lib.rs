//! `rnadiff` is a command line tool that compares transcript abundance across
//! biological replicates and conditions to call differential expression. This
//! package is composed of both a library crate, as well as a binary crate.
//!
//! The library is organized around the flow of a single genomic locus through
//! the engine:
//!
//! 1. Every replicate of a condition yields a [`bundles::HitBundle`] for the
//!    locus, and a [`bundles::factory::ReplicatedBundleFactory`] merges them
//!    (after checking that all replicates agree on the reference annotation).
//! 2. An [`abundances::AbundanceEstimator`] turns the merged bundle into
//!    [`abundances::SampleAbundances`], normalizing each replicate with the
//!    scale factors computed by [`normalize`].
//! 3. [`differential::test_differential`] compares every pair of conditions
//!    and [`tracking::Tracking`] keeps the per-condition FPKM series.
//!
//! The [`worker`] module drives this loop concurrently, one task per
//! condition, and the [`commands`] module wires it to the command line.
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]

pub mod abundances;
pub mod annotation;
pub mod bundles;
pub mod commands;
pub mod differential;
pub mod normalize;
pub mod report;
pub mod tracking;
pub mod utils;
pub mod worker;
