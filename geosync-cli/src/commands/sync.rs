//! `geosync feature|package|features|packages|list`: run a sync scope.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use geosync_core::PackageName;
use geosync_sync::pipeline::{ExitStatus, RunScope};

use super::{run_scope, GlobalArgs};

/// Arguments for `geosync feature`.
#[derive(Args, Debug)]
pub struct FeatureArgs {
    /// Fully qualified source name, e.g. `GIS.WATER.Lakes`.
    pub name: String,
}

impl FeatureArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitStatus> {
        run_scope(global, RunScope::Feature(self.name))
    }
}

/// Arguments for `geosync package`.
#[derive(Args, Debug)]
pub struct PackageArgs {
    /// Package name as stored in the metadata store.
    pub name: String,
}

impl PackageArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitStatus> {
        run_scope(global, RunScope::Package(PackageName::from(self.name)))
    }
}

/// Arguments for `geosync features`.
#[derive(Args, Debug)]
pub struct FeaturesArgs {
    /// Only features in this category (case-insensitive).
    #[arg(long)]
    pub category: Option<String>,
}

impl FeaturesArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitStatus> {
        run_scope(
            global,
            RunScope::AllFeatures {
                category: self.category,
            },
        )
    }
}

pub fn run_all_packages(global: &GlobalArgs) -> Result<ExitStatus> {
    run_scope(global, RunScope::AllPackages)
}

/// Arguments for `geosync list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// JSON file with `features` and/or `packages` arrays.
    pub file: PathBuf,
}

impl ListArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitStatus> {
        run_scope(global, RunScope::List(self.file))
    }
}
