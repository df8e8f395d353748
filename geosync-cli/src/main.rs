//! geosync: change-detecting feature and package sync CLI.
//!
//! # Usage
//!
//! ```text
//! geosync [--root DIR] [--config FILE] [-f] [-n] [-s] [-v] [--json] feature <source-name>
//! geosync ... package <name>
//! geosync ... features [--category <category>]
//! geosync ... packages
//! geosync ... list <file.json>
//! geosync ... upload <source-name>
//! ```
//!
//! Exit codes: `0` success, `1` fatal runtime error, `2` partial failure,
//! `3` configuration error.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    sync::{FeatureArgs, FeaturesArgs, ListArgs, PackageArgs},
    upload::UploadArgs,
    GlobalArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "geosync",
    version,
    about = "Sync geospatial features and packages to a distribution store, uploading only what changed",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync one feature, then the packages it belongs to.
    Feature(FeatureArgs),

    /// Sync one package after its member features.
    Package(PackageArgs),

    /// Sync every feature in the metadata store.
    Features(FeaturesArgs),

    /// Sync the members of every package, then every affected package.
    Packages,

    /// Sync the features and packages named in a JSON list.
    List(ListArgs),

    /// Upload archives built by an earlier `--no-upload` run.
    Upload(UploadArgs),
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let result = match cli.command {
        Commands::Feature(args) => args.run(&cli.global),
        Commands::Package(args) => args.run(&cli.global),
        Commands::Features(args) => args.run(&cli.global),
        Commands::Packages => commands::sync::run_all_packages(&cli.global),
        Commands::List(args) => args.run(&cli.global),
        Commands::Upload(args) => args.run(&cli.global),
    };

    match result {
        Ok(status) => ExitCode::from(status.code()),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(commands::exit_code_for(&err))
        }
    }
}

/// Default run root: the current directory.
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
