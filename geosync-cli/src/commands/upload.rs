//! `geosync upload`: push archives left by a `--no-upload` run.

use anyhow::Result;
use clap::Args;

use geosync_sync::pipeline::{ExitStatus, RunScope};

use super::{run_scope, GlobalArgs};

/// Arguments for `geosync upload`.
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Source name of the feature whose archives should be uploaded.
    pub name: String,
}

impl UploadArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitStatus> {
        run_scope(global, RunScope::UploadOnly(self.name))
    }
}
