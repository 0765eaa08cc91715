//! Functionality relating to the `rnadiff normalize` subcommand itself.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::debug;
use tracing::info;

use super::load_conditions;
use super::InputArgs;
use crate::normalize::normalize_conditions;
use crate::normalize::NormalizationOptions;

/// Clap arguments for the `rnadiff normalize` subcommand.
#[derive(Args, Debug)]
pub struct NormalizeArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Directory for the mean-variance table. No table is written if unset.
    #[arg(short = 'o', long, value_name = "PATH")]
    output_directory: Option<PathBuf>,

    /// Fit a loess trend over the N nearest points of the mean-variance table.
    #[arg(long, value_name = "N")]
    smooth_mean_variance: Option<usize>,
}

/// Main function for the `rnadiff normalize` subcommand.
pub fn normalize(args: NormalizeArgs) -> anyhow::Result<()> {
    info!("Starting normalize command...");
    debug!("Arguments: {:?}", args);

    let (_, mut factories) = load_conditions(&args.inputs)?;

    let options = NormalizationOptions {
        diagnostics_directory: args.output_directory,
        smoothing_points: args.smooth_mean_variance,
    };
    let summary = normalize_conditions(&mut factories, &options)?;

    let output =
        serde_json::to_string_pretty(&summary).with_context(|| "serializing scale factors")?;
    print!("{}", output);

    Ok(())
}
