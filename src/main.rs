use clap::Parser;
use git_testament::git_testament;
use git_testament::render_testament;
use tracing::Level;

use rnadiff::commands;
use rnadiff::commands::Command;

git_testament!(TESTAMENT);

/// Replicate-aware differential expression testing of RNA-Seq loci.
#[derive(Parser)]
#[command(author, version = render_testament!(TESTAMENT), propagate_version = true, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only errors are printed to the stderr stream.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// All available information, including debug information, is printed to
    /// stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut level = Level::INFO;
    if cli.quiet {
        level = Level::ERROR;
    } else if cli.verbose {
        level = Level::DEBUG;
    }

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Command::Diff(args) => commands::diff::diff(args),
        Command::Normalize(args) => commands::normalize::normalize(args),
    }
}
