//! Batch pipeline: run scopes, iteration policy and the run summary.
//!
//! Every item is processed on its own: a failure is logged, recorded in the
//! [`RunSummary`] and the batch moves on. Features always run before the
//! packages that depend on them, and each distinct feature or package is
//! synchronised at most once per run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use geosync_core::spec_store::Scanned;
use geosync_core::{FeatureSpec, PackageName, SpecStore, SyncConfig};

use crate::error::{config_err, io_err, SyncError};
use crate::orchestrator::{FeatureReport, PackageReport, SyncContext, SyncOptions};
use crate::remote::RemoteStore;
use crate::source::DataSource;

// ---------------------------------------------------------------------------
// Scope and options
// ---------------------------------------------------------------------------

/// What one invocation processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunScope {
    Feature(String),
    Package(PackageName),
    AllFeatures { category: Option<String> },
    AllPackages,
    /// JSON file `{ "features": [...], "packages": [...] }`.
    List(PathBuf),
    /// Upload archives left by an earlier `--no-upload` run.
    UploadOnly(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub force: bool,
    pub upload: bool,
    pub skip_packages: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            upload: true,
            skip_packages: false,
        }
    }
}

impl RunOptions {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            force: self.force,
            upload: self.upload,
        }
    }
}

/// Explicit list of items for [`RunScope::List`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunList {
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PackageName>,
}

impl RunList {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        if !path.is_file() {
            return Err(config_err(format!("run list {} does not exist", path.display())));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| config_err(format!("run list {} is malformed: {e}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Feature,
    Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: ItemKind,
    pub name: String,
    pub message: String,
    pub fatal_config: bool,
}

/// Process exit status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    /// Nothing succeeded and at least one failure was a runtime error.
    Failed,
    /// Some items failed, others went through.
    Partial,
    /// Nothing succeeded and every failure was a configuration error.
    ConfigError,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Partial => 2,
            ExitStatus::ConfigError => 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub features: Vec<FeatureReport>,
    pub packages: Vec<PackageReport>,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.features.len() + self.packages.len()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.failures.is_empty() {
            ExitStatus::Success
        } else if self.succeeded() > 0 {
            ExitStatus::Partial
        } else if self.failures.iter().all(|f| f.fatal_config) {
            ExitStatus::ConfigError
        } else {
            ExitStatus::Failed
        }
    }

    fn record_failure(&mut self, kind: ItemKind, name: &str, err: &SyncError) {
        tracing::error!(item = name, error = %err, "item failed, continuing");
        self.failures.push(ItemFailure {
            kind,
            name: name.to_string(),
            message: err.to_string(),
            fatal_config: err.is_fatal_config(),
        });
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Delete and recreate the output directory with its package subdirectory.
pub fn renew_output_dir(config: &SyncConfig) -> Result<(), SyncError> {
    let dir = &config.output_dir;
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let packages = config.package_output_dir();
    std::fs::create_dir_all(&packages).map_err(|e| io_err(&packages, e))
}

/// Source names selected by the "all features" driver.
pub fn select_features(features: Vec<FeatureSpec>, category: Option<&str>) -> Vec<String> {
    features
        .into_iter()
        .filter(|f| !f.source_name.trim().is_empty())
        .filter(|f| category.map_or(true, |c| f.category.eq_ignore_ascii_case(c)))
        .map(|f| f.source_name)
        .collect()
}

/// Run `scope` to completion.
///
/// Returns `Err` only when the run cannot start at all; per-item failures
/// land in [`RunSummary::failures`].
pub fn execute(
    source: &dyn DataSource,
    remote: &mut dyn RemoteStore,
    specs: &SpecStore,
    config: &SyncConfig,
    scope: &RunScope,
    options: RunOptions,
) -> Result<RunSummary, SyncError> {
    if !config.workspace.is_dir() {
        return Err(config_err(format!(
            "workspace {} does not exist",
            config.workspace.display()
        )));
    }
    if !matches!(scope, RunScope::UploadOnly(_)) {
        renew_output_dir(config)?;
    }
    tracing::info!(scope = ?scope, force = options.force, upload = options.upload, "run started");

    let mut run = BatchRun {
        ctx: SyncContext::new(source, remote, specs, config, options.sync_options()),
        specs,
        skip_packages: options.skip_packages,
        summary: RunSummary::default(),
    };

    match scope {
        RunScope::Feature(name) => {
            let affected = run.sync_features([name.clone()]);
            run.sync_packages(affected);
        }
        RunScope::AllFeatures { category } => {
            let scanned = specs.scan_features()?;
            let features = run.readable(ItemKind::Feature, scanned);
            let names = select_features(features, category.as_deref());
            let affected = run.sync_features(names);
            run.sync_packages(affected);
        }
        RunScope::Package(name) => {
            let targets = run.package_driver(&[name.clone()], &[]);
            let targets = targets.into_iter().filter(|p| p == name).collect();
            run.sync_packages(targets);
        }
        RunScope::AllPackages => {
            let scanned = specs.scan_packages()?;
            let names: Vec<PackageName> = run
                .readable(ItemKind::Package, scanned)
                .into_iter()
                .map(|p| p.name)
                .collect();
            let targets = run.package_driver(&names, &[]);
            run.sync_packages(targets);
        }
        RunScope::List(path) => {
            let list = RunList::load(path)?;
            let targets = run.package_driver(&list.packages, &list.features);
            run.sync_packages(targets);
        }
        RunScope::UploadOnly(name) => match run.ctx.upload_archives(name) {
            Ok(report) => run.summary.features.push(report),
            Err(e) => run.summary.record_failure(ItemKind::Feature, name, &e),
        },
    }

    let summary = run.summary;
    tracing::info!(
        features = summary.features.len(),
        packages = summary.packages.len(),
        failures = summary.failures.len(),
        "run finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

struct BatchRun<'a> {
    ctx: SyncContext<'a>,
    specs: &'a SpecStore,
    skip_packages: bool,
    summary: RunSummary,
}

impl BatchRun<'_> {
    /// Documents that loaded; each one that did not is recorded as a failure
    /// under its file stem.
    fn readable<T>(&mut self, kind: ItemKind, scanned: Vec<Scanned<T>>) -> Vec<T> {
        let mut docs = Vec::with_capacity(scanned.len());
        for (path, doc) in scanned {
            match doc {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    let label = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    self.summary.record_failure(kind, &label, &SyncError::from(e));
                }
            }
        }
        docs
    }

    /// Sync each distinct feature once; returns the packages they affect.
    fn sync_features<I>(&mut self, names: I) -> BTreeSet<PackageName>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = BTreeSet::new();
        let mut affected = BTreeSet::new();
        for name in names {
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.ctx.sync_feature(&name) {
                Ok(report) => {
                    affected.extend(report.affected_packages().iter().cloned());
                    self.summary.features.push(report);
                }
                Err(e) => self.summary.record_failure(ItemKind::Feature, &name, &e),
            }
        }
        affected
    }

    /// Record membership edges for `packages`, sync the union of their
    /// members plus `extra_features`, and return the packages to rebuild:
    /// those affected by a feature update plus listed packages never built.
    fn package_driver(
        &mut self,
        packages: &[PackageName],
        extra_features: &[String],
    ) -> BTreeSet<PackageName> {
        let mut members: Vec<String> = extra_features.to_vec();
        let mut never_built = BTreeSet::new();
        for name in packages {
            let package = match self.specs.load_package(name) {
                Ok(p) => p,
                Err(e) => {
                    self.summary.record_failure(ItemKind::Package, &name.0, &SyncError::from(e));
                    continue;
                }
            };
            if package.synced_at.is_none() {
                never_built.insert(package.name.clone());
            }
            for member in &package.feature_classes {
                if let Err(e) = self.specs.add_package_to_feature(member, &package.name) {
                    self.summary.record_failure(ItemKind::Feature, member, &SyncError::from(e));
                    continue;
                }
                members.push(member.clone());
            }
        }

        let mut targets = self.sync_features(members);
        targets.extend(never_built);
        targets
    }

    /// Sync each package once. Members synced on a package's behalf join
    /// the summary, and the other packages they belong to are queued too.
    fn sync_packages(&mut self, names: BTreeSet<PackageName>) {
        if self.skip_packages {
            if !names.is_empty() {
                tracing::info!(count = names.len(), "skipping dependent packages");
            }
            return;
        }
        let mut queue = names;
        let mut done = BTreeSet::new();
        while let Some(name) = queue.pop_first() {
            done.insert(name.clone());
            if !self.specs.package_path(&name).is_file() {
                tracing::warn!(package = %name, "feature references unknown package, skipping");
                continue;
            }
            match self.ctx.sync_package(&name) {
                Ok(mut report) => {
                    for member in std::mem::take(&mut report.member_reports) {
                        queue.extend(
                            member
                                .affected_packages()
                                .iter()
                                .filter(|p| !done.contains(*p))
                                .cloned(),
                        );
                        self.summary.features.push(member);
                    }
                    self.summary.packages.push(report);
                }
                Err(e) => self.summary.record_failure(ItemKind::Package, &name.0, &e),
            }
        }
    }
}
