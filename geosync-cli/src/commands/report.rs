//! Human and JSON renderings of a run summary.

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use geosync_sync::{
    pipeline::{ExitStatus, ItemFailure, ItemKind, RunOptions, RunSummary},
    FeatureOutcome, FeatureReport, PackageReport,
};

#[derive(Serialize)]
struct SummaryJson<'a> {
    status: ExitStatus,
    exit_code: u8,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "item")]
    item: String,
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

pub fn print_json(summary: &RunSummary) -> Result<()> {
    let status = summary.exit_status();
    let payload = SummaryJson {
        status,
        exit_code: status.code(),
        summary,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize run summary")?
    );
    Ok(())
}

pub fn print_table(summary: &RunSummary, options: RunOptions) {
    let mode = match (options.force, options.upload) {
        (true, false) => " [force, no-upload]",
        (true, true) => " [force]",
        (false, false) => " [no-upload]",
        (false, true) => "",
    };
    println!(
        "geosync v{}{mode} | {} features | {} packages | {} failed",
        env!("CARGO_PKG_VERSION"),
        summary.features.len(),
        summary.packages.len(),
        summary.failures.len(),
    );

    let mut rows: Vec<SummaryRow> = summary.features.iter().map(feature_row).collect();
    rows.extend(summary.packages.iter().map(package_row));
    rows.extend(summary.failures.iter().map(failure_row));
    if rows.is_empty() {
        println!("Nothing to sync.");
        return;
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    match summary.exit_status() {
        ExitStatus::Success => println!("{}", "✓ run complete".green()),
        ExitStatus::Partial => println!("{}", "! run finished with failures".yellow()),
        ExitStatus::Failed | ExitStatus::ConfigError => println!("{}", "✗ run failed".red()),
    }
}

fn feature_row(report: &FeatureReport) -> SummaryRow {
    let (status, detail) = match &report.outcome {
        FeatureOutcome::Skipped => (
            "SKIPPED".bright_black().bold().to_string(),
            "flagged skip".to_string(),
        ),
        FeatureOutcome::Unchanged { change } => (
            "UNCHANGED".green().bold().to_string(),
            format!("{} rows removed", change.removed),
        ),
        FeatureOutcome::Updated {
            change,
            forced,
            uploaded,
        } => {
            let mut detail = if change.first_sync {
                "first sync".to_string()
            } else {
                format!("+{} / -{} digests", change.added, change.removed)
            };
            if *forced {
                detail.push_str(", forced");
            }
            if !*uploaded {
                detail.push_str(", not uploaded");
            }
            ("UPDATED".yellow().bold().to_string(), detail)
        }
        FeatureOutcome::Uploaded => (
            "UPLOADED".cyan().bold().to_string(),
            "archives from earlier build".to_string(),
        ),
    };
    SummaryRow {
        item: report.source_name.clone(),
        kind: "feature",
        status,
        detail,
    }
}

fn package_row(report: &PackageReport) -> SummaryRow {
    let members = report.merged_local.len() + report.merged_source.len();
    let mut detail = format!("{members} members");
    if !report.synced_members.is_empty() {
        detail.push_str(&format!(", {} synced first", report.synced_members.len()));
    }
    let status = if report.uploaded { "UPLOADED" } else { "BUILT" };
    SummaryRow {
        item: report.name.to_string(),
        kind: "package",
        status: status.cyan().bold().to_string(),
        detail,
    }
}

fn failure_row(failure: &ItemFailure) -> SummaryRow {
    SummaryRow {
        item: failure.name.clone(),
        kind: match failure.kind {
            ItemKind::Feature => "feature",
            ItemKind::Package => "package",
        },
        status: "FAILED".red().bold().to_string(),
        detail: failure.message.clone(),
    }
}
