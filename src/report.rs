//! Writing the results of a run to disk.
//!
//! Every file is pretty-printed JSON:
//!
//! * `<category>.diff.json` for each of the seven test categories,
//! * `<category>.fpkm_tracking.json` for each of the four tracked categories,
//! * `run_info.json` describing the run itself.

use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::abundances::FeatureCategory;
use crate::abundances::StructureCategory;
use crate::differential::CategoryTests;
use crate::differential::SampleDifference;
use crate::differential::Tests;
use crate::normalize::NormalizationSummary;
use crate::tracking::FPKMTrackingTable;
use crate::tracking::Tracking;
use crate::worker::DiffResults;

//===========//
// Utilities //
//===========//

/// Serializes `value` as pretty JSON to `directory/filename`.
pub fn write_json<T>(directory: &Path, filename: &str, value: &T) -> io::Result<PathBuf>
where
    T: Serialize,
{
    let mut filepath = PathBuf::from(directory);
    filepath.push(filename);

    let mut file = File::create(&filepath)?;
    let output = serde_json::to_string_pretty(value)?;
    file.write_all(output.as_bytes())?;

    debug!("  [*] Wrote {}", filepath.display());
    Ok(filepath)
}

fn diff_stem(category: Category) -> &'static str {
    match category {
        Category::Feature(FeatureCategory::Isoform) => "isoform_exp",
        Category::Feature(FeatureCategory::TssGroup) => "tss_group_exp",
        Category::Feature(FeatureCategory::Gene) => "gene_exp",
        Category::Feature(FeatureCategory::Cds) => "cds_exp",
        Category::Structure(StructureCategory::Splicing) => "splicing",
        Category::Structure(StructureCategory::Promoter) => "promoters",
        Category::Structure(StructureCategory::CdsUse) => "cds",
    }
}

fn tracking_stem(category: FeatureCategory) -> &'static str {
    match category {
        FeatureCategory::Isoform => "isoforms",
        FeatureCategory::TssGroup => "tss_groups",
        FeatureCategory::Gene => "genes",
        FeatureCategory::Cds => "cds",
    }
}

#[derive(Clone, Copy)]
enum Category {
    Feature(FeatureCategory),
    Structure(StructureCategory),
}

//=============//
// Diff Tables //
//=============//

#[derive(Serialize)]
struct DiffTable<'a> {
    category: &'a str,
    samples: &'a [String],
    tests: Vec<&'a SampleDifference>,
}

fn write_diff_table(
    directory: &Path,
    category: Category,
    labels: &[String],
    tests: &CategoryTests,
) -> io::Result<PathBuf> {
    let stem = diff_stem(category);

    // Rows are written locus by locus, then pair by pair.
    let table = DiffTable {
        category: stem,
        samples: labels,
        tests: tests
            .iter()
            .flatten()
            .flat_map(|diffs| diffs.values())
            .collect(),
    };

    write_json(directory, &format!("{}.diff.json", stem), &table)
}

/// Writes one file per test category.
pub fn write_diff_tables(
    directory: &Path,
    labels: &[String],
    tests: &Tests,
) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for category in FeatureCategory::ALL {
        written.push(write_diff_table(
            directory,
            Category::Feature(category),
            labels,
            tests.feature_tests(category),
        )?);
    }

    for category in StructureCategory::ALL {
        written.push(write_diff_table(
            directory,
            Category::Structure(category),
            labels,
            tests.structure_tests(category),
        )?);
    }

    Ok(written)
}

//=================//
// Tracking Tables //
//=================//

#[derive(Serialize)]
struct TrackingTable<'a> {
    samples: &'a [String],
    features: &'a FPKMTrackingTable,
}

/// Writes one file per tracked category.
pub fn write_tracking_tables(
    directory: &Path,
    labels: &[String],
    tracking: &Tracking,
) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for category in FeatureCategory::ALL {
        let table = TrackingTable {
            samples: labels,
            features: tracking.table(category),
        };
        let filename = format!("{}.fpkm_tracking.json", tracking_stem(category));
        written.push(write_json(directory, &filename, &table)?);
    }

    Ok(written)
}

//==========//
// Run Info //
//==========//

/// A description of a run.
#[derive(Debug, Serialize)]
pub struct RunInfo {
    /// Version of the tool.
    pub version: String,

    /// The label of every condition.
    pub labels: Vec<String>,

    /// Normalization of the conditions.
    pub normalization: NormalizationSummary,

    /// Loci pulled from the inputs.
    pub loci_processed: usize,

    /// Loci that were tested.
    pub loci_tested: usize,

    /// Whether only consecutive conditions were compared.
    pub samples_are_time_series: bool,

    /// False discovery rate used for significance.
    pub fdr: f64,
}

impl RunInfo {
    /// Writes `run_info.json`.
    pub fn write(&self, directory: &Path) -> io::Result<PathBuf> {
        write_json(directory, "run_info.json", self)
    }
}

/// Writes every output of a run.
pub fn write_all(
    directory: &Path,
    labels: &[String],
    results: &DiffResults,
    run_info: &RunInfo,
) -> io::Result<Vec<PathBuf>> {
    let mut written = write_diff_tables(directory, labels, &results.tests)?;
    written.extend(write_tracking_tables(directory, labels, &results.tracking)?);
    written.push(run_info.write(directory)?);
    Ok(written)
}
