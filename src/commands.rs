//! The `rnadiff` subcommands and the input handling they share.

pub mod diff;
pub mod normalize;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use clap::Subcommand;
use tracing::debug;
use tracing::info;

use crate::annotation;
use crate::bundles::factory::ReplicatedBundleFactory;
use crate::bundles::producer::AnnotationBundleProducer;
use crate::bundles::BundleProducer;
use crate::bundles::RefSequenceTable;
use crate::utils::formats::hits::read_hits;

//===============//
// Command setup //
//===============//

/// Every subcommand of `rnadiff`.
#[derive(Subcommand)]
pub enum Command {
    /// Tests every pair of conditions for differential expression.
    Diff(self::diff::DiffArgs),

    /// Computes the normalization scale factors of every replicate.
    Normalize(self::normalize::NormalizeArgs),
}

/// Inputs shared by every subcommand.
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Reference annotation (GTF, optionally gzipped).
    #[arg(value_name = "GTF")]
    pub annotation: PathBuf,

    /// One argument per condition: the comma separated hit files of its
    /// replicates.
    #[arg(value_name = "HITS", required = true, num_args = 1..)]
    pub conditions: Vec<String>,

    /// Transcripts whose fragments should be ignored (GTF).
    #[arg(short = 'M', long, value_name = "GTF")]
    pub mask_file: Option<PathBuf>,

    /// Comma separated labels for the conditions. Defaults to q1, q2, ...
    #[arg(short = 'L', long, value_name = "LABELS", value_delimiter = ',')]
    pub labels: Vec<String>,
}

//==================//
// Condition set-up //
//==================//

/// Resolves the condition labels, checking that there is one per condition.
pub fn condition_labels(labels: &[String], num_conditions: usize) -> anyhow::Result<Vec<String>> {
    if labels.is_empty() {
        return Ok((1..=num_conditions).map(|i| format!("q{}", i)).collect());
    }

    if labels.len() != num_conditions {
        bail!(
            "{} labels were given for {} conditions. \
            Did you separate the labels with commas?",
            labels.len(),
            num_conditions
        );
    }

    Ok(labels.to_vec())
}

/// Splits a condition argument into its replicate files.
pub fn replicate_paths(condition: &str) -> Vec<PathBuf> {
    condition
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Loads the annotation, the optional mask and every replicate, returning
/// one factory per condition.
pub fn load_conditions(
    inputs: &InputArgs,
) -> anyhow::Result<(Arc<RefSequenceTable>, Vec<ReplicatedBundleFactory>)> {
    let mut ref_table = RefSequenceTable::default();
    let ref_rnas = annotation::load(&inputs.annotation, &mut ref_table)?;
    let mask_rnas = match &inputs.mask_file {
        Some(path) => annotation::load(path, &mut ref_table)?,
        None => Vec::new(),
    };

    let ref_table = Arc::new(ref_table);
    let mut factories = Vec::with_capacity(inputs.conditions.len());

    for (i, condition) in inputs.conditions.iter().enumerate() {
        let paths = replicate_paths(condition);
        if paths.is_empty() {
            bail!("condition {} has no replicate files", i + 1);
        }

        let mut producers: Vec<Box<dyn BundleProducer>> = Vec::with_capacity(paths.len());
        for path in &paths {
            producers.push(Box::new(load_replicate(&ref_table, path)?));
        }

        let mut factory = ReplicatedBundleFactory::new(producers);
        factory.set_ref_rnas(&ref_rnas);
        factory.set_mask_rnas(&mask_rnas);

        info!(
            "Condition {}: {} replicate(s), {} loci.",
            i + 1,
            factory.num_replicates(),
            factory.num_bundles()
        );
        factories.push(factory);
    }

    Ok((ref_table, factories))
}

fn load_replicate(
    ref_table: &Arc<RefSequenceTable>,
    path: &Path,
) -> anyhow::Result<AnnotationBundleProducer> {
    let hits = read_hits(path)?;
    debug!("  [*] {}: {} hits", path.display(), hits.len());
    Ok(AnnotationBundleProducer::new(Arc::clone(ref_table), hits))
}
