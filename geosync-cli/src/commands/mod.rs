//! Subcommand implementations and the shared run path.

pub mod report;
pub mod sync;
pub mod upload;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use geosync_core::{SpecError, SpecStore, SyncConfig};
use geosync_sync::{
    pipeline::{self, ExitStatus, RunOptions, RunScope},
    DirectoryRemote, JsonWorkspace, SyncError,
};

/// Flags accepted before or after any subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Run root holding `geosync.yaml` (default: current directory).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file path (default: `<root>/geosync.yaml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Build and upload even when nothing changed.
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Build archives locally without uploading them.
    #[arg(short = 'n', long, global = true)]
    pub no_upload: bool,

    /// Do not rebuild packages affected by synced features.
    #[arg(short, long, global = true)]
    pub skip_packages: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the run summary as JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(path) => path.clone(),
            None => SyncConfig::default_path(&self.root.clone().unwrap_or_else(crate::default_root)),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            force: self.force,
            upload: !self.no_upload,
            skip_packages: self.skip_packages,
        }
    }
}

/// Load configuration, open the collaborators and execute `scope`.
pub fn run_scope(global: &GlobalArgs, scope: RunScope) -> Result<ExitStatus> {
    let config_path = global.config_path();
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    tracing::debug!(config = %config_path.display(), workspace = %config.workspace.display(), "config loaded");

    let specs = SpecStore::new(&config.spec_dir);
    let source = JsonWorkspace::new(&config.workspace);
    let mut remote = DirectoryRemote::open(&config.remote_dir)
        .with_context(|| format!("failed to open remote store {}", config.remote_dir.display()))?;

    let summary = pipeline::execute(
        &source,
        &mut remote,
        &specs,
        &config,
        &scope,
        global.run_options(),
    )
    .context("run aborted")?;

    if global.json {
        report::print_json(&summary)?;
    } else {
        report::print_table(&summary, global.run_options());
    }
    Ok(summary.exit_status())
}

/// Map an error that aborted the run to a process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    let config = err.chain().any(|cause| {
        cause
            .downcast_ref::<SyncError>()
            .is_some_and(SyncError::is_fatal_config)
            || cause.downcast_ref::<SpecError>().is_some_and(SpecError::is_config)
    });
    if config {
        ExitStatus::ConfigError.code()
    } else {
        ExitStatus::Failed.code()
    }
}
