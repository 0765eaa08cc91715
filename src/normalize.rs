//! Normalization of raw per-locus counts across samples.
//!
//! # Overview
//!
//! Libraries are sequenced to different depths and, more subtly, with
//! different compositions: a handful of very highly expressed loci in one
//! sample can soak up enough reads to make everything else in that sample look
//! depleted. Dividing by the total mapped mass does not correct for the
//! latter. Instead, every sample gets a scale factor computed with the
//! median-of-ratios estimator:
//!
//! 1. For each locus, compute the geometric mean of its counts across samples
//!    using only the non-zero counts. Loci where every count is zero have a
//!    geometric mean of zero and are excluded from step 2.
//! 2. For each sample, compute the ratio of its count to the geometric mean
//!    at every remaining locus.
//! 3. The scale factor of a sample is the median of its ratios (the element
//!    at position `len / 2` of the sorted ratios). A sample without any
//!    eligible locus gets a factor of zero.
//!
//! As long as most loci are not differentially expressed, the median is
//! unaffected by the few that are.
//!
//! ```
//! use rnadiff::normalize::{compute_scale_factors, CountTable};
//!
//! let table = CountTable {
//!     labels: vec![String::from("locus")],
//!     counts: vec![vec![10.0, 20.0, 5.0]],
//! };
//!
//! let factors = compute_scale_factors(&table);
//! assert!((factors[0] - 1.0).abs() < 1e-9);
//! assert!((factors[1] - 2.0).abs() < 1e-9);
//! assert!((factors[2] - 0.5).abs() < 1e-9);
//! ```
//!
//! Geometric means are accumulated in log space so that deep libraries with
//! many samples do not overflow.
//!
//! The mean and variance of the rescaled counts of every locus can be written
//! to a diagnostic table (see [`write_mean_variance_table`]) for inspecting
//! the mean-variance trend; an optional [`loess`] fit can be added to it.

pub mod loess;

use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bundles::factory::ReplicatedBundleFactory;
use crate::bundles::factory::SynchronizeError;

//=============//
// Count Table //
//=============//

/// Raw counts laid out as loci (rows) by samples (columns).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CountTable {
    /// Label of every locus.
    pub labels: Vec<String>,

    /// Counts for every locus, one value per sample.
    pub counts: Vec<Vec<f64>>,
}

impl CountTable {
    /// The number of loci in the table.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table has no loci.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The number of samples in the table.
    pub fn num_samples(&self) -> usize {
        self.counts.first().map(|r| r.len()).unwrap_or_default()
    }

    /// Places the columns of several tables side by side. Every table must
    /// list the same loci in the same order.
    pub fn join(tables: &[CountTable]) -> Result<CountTable, SynchronizeError> {
        let first = match tables.first() {
            Some(t) => t,
            None => return Ok(CountTable::default()),
        };

        let mut joined = first.clone();
        for table in &tables[1..] {
            let width = table.num_samples();

            for row in 0..joined.len().max(table.len()) {
                match (joined.labels.get(row), table.labels.get(row)) {
                    (Some(expected), Some(found)) if expected != found => {
                        return Err(SynchronizeError::UnalignedCountTables {
                            row,
                            expected: expected.clone(),
                            found: found.clone(),
                        })
                    }
                    (Some(_), Some(_)) => {
                        joined.counts[row].extend_from_slice(&table.counts[row]);
                    }
                    (Some(_), None) => {
                        joined.counts[row].extend(std::iter::repeat(0.0).take(width));
                    }
                    (None, Some(found)) => {
                        let mut values = vec![0.0; joined.num_samples()];
                        values.extend_from_slice(&table.counts[row]);
                        joined.labels.push(found.clone());
                        joined.counts.push(values);
                    }
                    (None, None) => unreachable!(),
                }
            }
        }

        Ok(joined)
    }
}

//===============//
// Scale Factors //
//===============//

/// Geometric mean of the non-zero values of a row, computed in log space.
/// Returns zero if every value is zero.
fn geometric_mean(row: &[f64]) -> f64 {
    let mut log_sum = 0.0;
    let mut non_zero = 0usize;

    for value in row.iter().filter(|v| **v > 0.0) {
        log_sum += value.ln();
        non_zero += 1;
    }

    match non_zero {
        0 => 0.0,
        n => (log_sum / n as f64).exp(),
    }
}

/// Computes one median-of-ratios scale factor per sample. See the
/// [module-level documentation](self) for details.
pub fn compute_scale_factors(table: &CountTable) -> Vec<f64> {
    let geom_means: Vec<f64> = table.counts.iter().map(|r| geometric_mean(r)).collect();

    (0..table.num_samples())
        .map(|j| {
            let mut ratios: Vec<f64> = table
                .counts
                .iter()
                .zip(geom_means.iter())
                .filter(|(_, gm)| **gm > 0.0)
                .map(|(row, gm)| row.get(j).copied().unwrap_or_default() / gm)
                .collect();

            if ratios.is_empty() {
                return 0.0;
            }

            ratios.sort_by(|a, b| a.total_cmp(b));
            ratios[ratios.len() / 2]
        })
        .collect()
}

/// Divides every count by the scale factor of its sample, in place. Samples
/// with a degenerate (zero or non-finite) factor are left unscaled.
pub fn rescale(table: &mut CountTable, scale_factors: &[f64]) {
    for (j, factor) in scale_factors.iter().enumerate() {
        if !(factor.is_finite() && *factor > 0.0) {
            warn!(
                "Sample {} has a degenerate scale factor ({}); its counts are left unscaled.",
                j, factor
            );
        }
    }

    for row in table.counts.iter_mut() {
        for (value, factor) in row.iter_mut().zip(scale_factors) {
            if factor.is_finite() && *factor > 0.0 {
                *value /= factor;
            }
        }
    }
}

//==========================//
// Mean-Variance Diagnostic //
//==========================//

/// Population mean and variance of every locus, sorted by mean and then by
/// variance.
pub fn mean_variance(table: &CountTable) -> Vec<(f64, f64)> {
    let mut result: Vec<(f64, f64)> = table
        .counts
        .iter()
        .map(|row| {
            if row.is_empty() {
                return (0.0, 0.0);
            }

            let n = row.len() as f64;
            let mean = row.iter().sum::<f64>() / n;
            let var = row.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / n;
            (mean, var)
        })
        .collect();

    result.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    result
}

/// Writes the mean-variance table to `<random number>_counts.txt` inside
/// `directory`, one row per locus with a positive mean. If `fitted` is given
/// it must be parallel to `rows` and is written as a third column.
pub fn write_mean_variance_table(
    directory: &Path,
    rows: &[(f64, f64)],
    fitted: Option<&[f64]>,
) -> io::Result<PathBuf> {
    let mut path = PathBuf::from(directory);
    path.push(format!("{}_counts.txt", rand::random::<u32>()));

    let mut writer = BufWriter::new(File::create(&path)?);
    match fitted {
        Some(_) => writeln!(writer, "count_mean\tcount_var\tcount_var_fit")?,
        None => writeln!(writer, "count_mean\tcount_var")?,
    }

    for (i, (mean, var)) in rows.iter().enumerate() {
        if *mean <= 0.0 {
            continue;
        }

        match fitted.and_then(|f| f.get(i)) {
            Some(fit) => writeln!(writer, "{}\t{}\t{}", mean, var, fit)?,
            None => writeln!(writer, "{}\t{}", mean, var)?,
        }
    }

    writer.flush()?;
    Ok(path)
}

//=======================//
// Normalizing a Dataset //
//=======================//

/// Options controlling [`normalize_conditions`].
#[derive(Clone, Debug, Default)]
pub struct NormalizationOptions {
    /// Directory for the mean-variance diagnostic table. No table is written
    /// when this is `None`.
    pub diagnostics_directory: Option<PathBuf>,

    /// Number of nearest points used by the loess fit of the diagnostic
    /// table. No fit is computed when this is `None`.
    pub smoothing_points: Option<usize>,
}

/// The outcome of normalizing all conditions.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NormalizationSummary {
    /// Scale factors, one vector per condition with one value per replicate.
    pub scale_factors: Vec<Vec<f64>>,

    /// Total mapped mass, laid out like `scale_factors`.
    pub total_map_masses: Vec<Vec<f64>>,

    /// Mean of the scaled map masses of every replicate, shared by all
    /// samples when computing FPKMs. `None` if no replicate could be scaled.
    pub normalized_map_mass: Option<f64>,

    /// Shortest fragment length observed in any replicate.
    pub min_frag_len: Option<usize>,

    /// Longest fragment length observed in any replicate.
    pub max_frag_len: Option<usize>,

    /// Where the mean-variance table was written, if anywhere.
    pub mean_variance_table: Option<PathBuf>,
}

/// Counts every replicate of every condition, computes scale factors over all
/// of them jointly, and hands each replicate its factor along with the
/// normalized map mass shared by all samples. The producers are rewound
/// afterwards.
pub fn normalize_conditions(
    factories: &mut [ReplicatedBundleFactory],
    options: &NormalizationOptions,
) -> anyhow::Result<NormalizationSummary> {
    info!("Counting loci in every replicate for normalization.");

    let mut summary = NormalizationSummary::default();
    let mut tables = Vec::with_capacity(factories.len());

    for (i, factory) in factories.iter_mut().enumerate() {
        let maps = factory
            .inspect_replicate_maps()
            .with_context(|| format!("counting loci for condition {}", i))?;

        summary.min_frag_len = match (summary.min_frag_len, maps.min_frag_len) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        summary.max_frag_len = match (summary.max_frag_len, maps.max_frag_len) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        summary.total_map_masses.push(maps.total_map_masses);
        tables.push(maps.counts);
    }

    let mut table = CountTable::join(&tables).with_context(|| "joining count tables")?;
    let scale_factors = compute_scale_factors(&table);
    debug!("Scale factors: {:?}", scale_factors);

    // Hand every condition the slice belonging to its replicates.
    let mut offset = 0;
    for factory in factories.iter_mut() {
        let n = factory.num_replicates();
        let factors = scale_factors[offset..offset + n].to_vec();
        factory
            .set_scale_factors(&factors)
            .with_context(|| "assigning scale factors")?;
        summary.scale_factors.push(factors);
        offset += n;
    }

    let scaled_masses: Vec<f64> = summary
        .total_map_masses
        .iter()
        .flatten()
        .zip(scale_factors.iter())
        .filter(|(_, sf)| sf.is_finite() && **sf > 0.0)
        .map(|(mass, sf)| mass / sf)
        .collect();

    if scaled_masses.is_empty() {
        warn!("No replicate could be scaled; FPKMs will use raw map masses.");
    } else {
        let mass = scaled_masses.iter().sum::<f64>() / scaled_masses.len() as f64;
        debug!("Normalized map mass: {}", mass);
        for factory in factories.iter_mut() {
            factory.set_normalized_map_mass(mass);
        }
        summary.normalized_map_mass = Some(mass);
    }

    if let Some(directory) = &options.diagnostics_directory {
        rescale(&mut table, &scale_factors);
        let rows = mean_variance(&table);

        let fitted = options.smoothing_points.map(|n| {
            let (x, y): (Vec<f64>, Vec<f64>) = rows.iter().copied().unzip();
            loess::smooth(&x, &y, n)
        });

        let path = write_mean_variance_table(directory, &rows, fitted.as_deref())
            .with_context(|| "writing the mean-variance table")?;
        info!("Wrote mean-variance table to {}", path.display());
        summary.mean_variance_table = Some(path);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::factory::CombinedBundle;
    use crate::bundles::testing::{hit_bundle, VecProducer};
    use crate::bundles::BundleProducer;
    use approx::assert_relative_eq;

    fn table(counts: Vec<Vec<f64>>) -> CountTable {
        CountTable {
            labels: (0..counts.len()).map(|i| format!("locus{}", i)).collect(),
            counts,
        }
    }

    #[test]
    pub fn test_single_locus_example() {
        let factors = compute_scale_factors(&table(vec![vec![10.0, 20.0, 5.0]]));
        assert_relative_eq!(factors[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(factors[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(factors[2], 0.5, epsilon = 1e-9);
    }

    #[test]
    pub fn test_uniform_scaling_preserves_relative_factors() {
        let counts = vec![
            vec![10.0, 22.0, 4.0],
            vec![100.0, 180.0, 61.0],
            vec![3.0, 9.0, 1.0],
            vec![0.0, 7.0, 2.0],
        ];
        let doubled: Vec<Vec<f64>> = counts
            .iter()
            .map(|r| r.iter().map(|v| v * 2.0).collect())
            .collect();

        let a = compute_scale_factors(&table(counts));
        let b = compute_scale_factors(&table(doubled));

        for j in 1..a.len() {
            assert_relative_eq!(a[j] / a[0], b[j] / b[0], epsilon = 1e-9);
        }
    }

    #[test]
    pub fn test_all_zero_sample_gets_zero_factor() {
        let factors = compute_scale_factors(&table(vec![
            vec![10.0, 0.0, 12.0],
            vec![30.0, 0.0, 28.0],
        ]));
        assert_eq!(factors[1], 0.0);
        assert!(factors[0] > 0.0);
    }

    #[test]
    pub fn test_all_zero_loci_are_excluded() {
        let factors = compute_scale_factors(&table(vec![vec![0.0, 0.0], vec![0.0, 0.0]]));
        assert_eq!(factors, vec![0.0, 0.0]);
    }

    #[test]
    pub fn test_geometric_mean_is_stable_for_large_counts() {
        let row = vec![1e200, 1e200, 1e200, 1e200];
        assert_relative_eq!(geometric_mean(&row), 1e200, max_relative = 1e-9);
    }

    #[test]
    pub fn test_geometric_mean_ignores_zeros() {
        assert_relative_eq!(geometric_mean(&[0.0, 4.0, 16.0]), 8.0, epsilon = 1e-9);
        assert_relative_eq!(
            geometric_mean(&[0.0, 8.0, 32.0]),
            2.0 * geometric_mean(&[0.0, 4.0, 16.0]),
            epsilon = 1e-9
        );
        assert_eq!(geometric_mean(&[0.0, 0.0]), 0.0);
    }

    #[test]
    pub fn test_rescale_guards_zero_factor() {
        let mut t = table(vec![vec![10.0, 20.0, 8.0]]);
        rescale(&mut t, &[2.0, 0.0, 4.0]);
        assert_eq!(t.counts[0], vec![5.0, 20.0, 2.0]);
    }

    #[test]
    pub fn test_mean_variance_is_sorted() {
        let rows = mean_variance(&table(vec![vec![4.0, 6.0], vec![1.0, 1.0]]));
        assert_eq!(rows, vec![(1.0, 0.0), (5.0, 1.0)]);
    }

    #[test]
    pub fn test_join_tables() {
        let a = table(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = table(vec![vec![5.0], vec![6.0]]);
        let joined = CountTable::join(&[a, b]).unwrap();
        assert_eq!(joined.num_samples(), 3);
        assert_eq!(joined.counts[1], vec![3.0, 4.0, 6.0]);

        let mut c = table(vec![vec![5.0]]);
        c.labels[0] = String::from("elsewhere");
        assert!(CountTable::join(&[joined, c]).is_err());
    }

    #[test]
    pub fn test_write_mean_variance_table_skips_zero_means() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            write_mean_variance_table(dir.path(), &[(0.0, 0.0), (2.5, 1.25)], None).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "count_mean\tcount_var\n2.5\t1.25\n");
    }

    fn replicate(hits: [usize; 3]) -> Box<dyn BundleProducer> {
        Box::new(VecProducer::new(vec![
            hit_bundle(0, &["a"], hits[0]),
            hit_bundle(5_000, &["b"], hits[1]),
            hit_bundle(9_000, &["c"], hits[2]),
        ]))
    }

    fn conditions() -> Vec<ReplicatedBundleFactory> {
        vec![
            ReplicatedBundleFactory::new(vec![replicate([10, 20, 40])]),
            ReplicatedBundleFactory::new(vec![replicate([20, 40, 80]), replicate([5, 10, 20])]),
        ]
    }

    fn header(path: &Path) -> String {
        let contents = std::fs::read_to_string(path).unwrap();
        contents.lines().next().unwrap().to_string()
    }

    #[test]
    pub fn test_normalize_conditions_jointly() {
        let mut factories = conditions();
        let summary =
            normalize_conditions(&mut factories, &NormalizationOptions::default()).unwrap();

        assert_eq!(summary.scale_factors.len(), 2);
        assert_eq!(summary.scale_factors[0].len(), 1);
        assert_eq!(summary.scale_factors[1].len(), 2);
        assert_relative_eq!(summary.scale_factors[0][0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(summary.scale_factors[1][0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(summary.scale_factors[1][1], 0.5, epsilon = 1e-9);
        assert_eq!(summary.total_map_masses, vec![vec![70.0], vec![140.0, 35.0]]);
        assert_relative_eq!(summary.normalized_map_mass.unwrap(), 70.0, epsilon = 1e-9);
        assert!(summary.mean_variance_table.is_none());

        // The producers start over at the first locus and carry their factors.
        let mut combined = CombinedBundle::default();
        assert!(factories[1].next_bundle(&mut combined).unwrap());
        assert_eq!(combined.span.left, 0);
        assert_eq!(combined.hits.len(), 25);
        assert_relative_eq!(combined.replicates[0].scale_factor, 2.0, epsilon = 1e-9);
        assert_relative_eq!(combined.replicates[1].scale_factor, 0.5, epsilon = 1e-9);
        assert_relative_eq!(
            combined.replicates[1].normalized_map_mass.unwrap(),
            70.0,
            epsilon = 1e-9
        );
    }

    #[test]
    pub fn test_normalize_conditions_writes_diagnostics() {
        let dir = tempfile::tempdir().unwrap();

        let mut factories = conditions();
        let options = NormalizationOptions {
            diagnostics_directory: Some(dir.path().to_path_buf()),
            smoothing_points: None,
        };
        let summary = normalize_conditions(&mut factories, &options).unwrap();
        let path = summary.mean_variance_table.unwrap();
        assert_eq!(header(&path), "count_mean\tcount_var");

        let mut factories = conditions();
        let options = NormalizationOptions {
            diagnostics_directory: Some(dir.path().to_path_buf()),
            smoothing_points: Some(3),
        };
        let summary = normalize_conditions(&mut factories, &options).unwrap();
        let path = summary.mean_variance_table.unwrap();
        assert_eq!(header(&path), "count_mean\tcount_var\tcount_var_fit");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.lines().skip(1).all(|l| l.split('\t').count() == 3));
    }
}
