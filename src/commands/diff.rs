//! Functionality relating to the `rnadiff diff` subcommand itself.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use clap::Args;
use tracing::debug;
use tracing::info;

use super::condition_labels;
use super::load_conditions;
use super::InputArgs;
use crate::abundances::ReplicateCountEstimator;
use crate::differential::kernel::LogRatioKernel;
use crate::normalize::normalize_conditions;
use crate::normalize::NormalizationOptions;
use crate::report;
use crate::report::RunInfo;
use crate::worker::DiffOptions;
use crate::worker::Driver;

//========================//
// Command line arguments //
//========================//

/// Clap arguments for the `rnadiff diff` subcommand.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Directory to output files to. Defaults to current working directory.
    #[arg(short = 'o', long, value_name = "PATH")]
    output_directory: Option<PathBuf>,

    /// Number of loci estimated at once.
    #[arg(short = 'p', long, value_name = "USIZE", default_value_t = 1)]
    num_threads: usize,

    /// Minimum number of normalized fragments for a locus to be tested.
    #[arg(short = 'c', long, value_name = "F64", default_value_t = 10.0)]
    min_read_count: f64,

    /// False discovery rate at which differences are called significant.
    #[arg(long, value_name = "F64", default_value_t = 0.05)]
    fdr: f64,

    /// Treat the conditions as a time series and compare only consecutive
    /// ones.
    #[arg(short = 'T', long)]
    time_series: bool,

    /// Fit a loess trend over the N nearest points of the mean-variance table.
    #[arg(long, value_name = "N")]
    smooth_mean_variance: Option<usize>,
}

//============================//
// Runs the `diff` subcommand //
//============================//

/// Main function for the `rnadiff diff` subcommand.
pub fn diff(args: DiffArgs) -> anyhow::Result<()> {
    info!("Starting diff command...");
    debug!("Arguments: {:?}", args);

    if !(args.fdr > 0.0 && args.fdr <= 1.0) {
        bail!("--fdr must be in (0, 1], got {}", args.fdr);
    }

    if args.inputs.conditions.len() < 2 {
        bail!(
            "at least two conditions are needed for testing, got {}",
            args.inputs.conditions.len()
        );
    }

    let labels = condition_labels(&args.inputs.labels, args.inputs.conditions.len())?;

    let output_directory = match args.output_directory {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&output_directory).with_context(|| {
        format!(
            "creating output directory: {}",
            output_directory.display()
        )
    })?;
    debug!("  [*] Output directory: {}", output_directory.display());

    //====================//
    // Load and normalize //
    //====================//

    let (ref_table, mut factories) = load_conditions(&args.inputs)?;

    let normalization = normalize_conditions(
        &mut factories,
        &NormalizationOptions {
            diagnostics_directory: Some(output_directory.clone()),
            smoothing_points: args.smooth_mean_variance,
        },
    )?;

    //======//
    // Test //
    //======//

    let options = DiffOptions {
        num_threads: args.num_threads,
        min_read_count: args.min_read_count,
        fdr: args.fdr,
        samples_are_time_series: args.time_series,
    };

    let driver = Driver::new(
        ref_table,
        Arc::new(ReplicateCountEstimator {
            min_read_count: options.min_read_count,
        }),
        Arc::new(LogRatioKernel),
        options.clone(),
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (_, results) = rt.block_on(driver.run(factories))?;

    //=======//
    // Write //
    //=======//

    let run_info = RunInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        labels: labels.clone(),
        normalization,
        loci_processed: results.loci_processed,
        loci_tested: results.loci_tested,
        samples_are_time_series: options.samples_are_time_series,
        fdr: options.fdr,
    };

    let written = report::write_all(&output_directory, &labels, &results, &run_info)
        .with_context(|| "writing results")?;
    info!(
        "Wrote {} files to {}.",
        written.len(),
        output_directory.display()
    );

    Ok(())
}
