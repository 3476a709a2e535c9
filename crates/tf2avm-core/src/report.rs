//! Terminal Markdown report
//!
//! Sections appear in a fixed order and are omitted when empty. Nothing is
//! listed as converted unless the writer placed a module block for it.

use crate::state::{IssueKind, RunState, RunStatus};
use crate::writer::WriteSummary;
use std::fmt::Write as _;
use std::path::Path;
use tf2avm_model::{FixProposal, MappingResult, MappingStatus};

pub const TITLE: &str = "# Terraform to AVM Conversion Report";
pub const CONVERTED_FILES: &str = "## Converted Files";
pub const SUCCESSFUL_MAPPINGS: &str = "## Successful Mappings";
pub const ISSUES_FOUND: &str = "## Issues Found";
pub const NEXT_STEPS: &str = "## Next Steps";
pub const OUTPUT_LOCATION: &str = "## Converted Output Location";

/// Everything the report is built from
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub state: &'a RunState,
    pub mapping: Option<&'a MappingResult>,
    pub summary: Option<&'a WriteSummary>,
    pub fixes: &'a [FixProposal],
    pub run_dir: &'a Path,
    pub migrated_dir: Option<&'a Path>,
}

#[must_use]
pub fn render_report(input: &ReportInput<'_>) -> String {
    let mut sections: Vec<(&str, String)> = Vec::new();
    sections.push((CONVERTED_FILES, converted_files(input)));
    sections.push((SUCCESSFUL_MAPPINGS, successful_mappings(input)));
    sections.push((ISSUES_FOUND, issues(input)));
    sections.push((NEXT_STEPS, next_steps(input)));
    if input.state.status == RunStatus::Succeeded {
        if let Some(dir) = input.migrated_dir {
            sections.push((OUTPUT_LOCATION, format!("`{}`\n", dir.display())));
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{TITLE}\n");
    let _ = writeln!(out, "- Run: `{}`", input.state.run_id);
    let _ = writeln!(out, "- Status: **{}**", input.state.status);
    if let Some(summary) = input.summary {
        let converted = summary.placements.iter().filter(|p| p.is_converted()).count();
        let _ = writeln!(
            out,
            "- Resources: {} total, {converted} converted, {} left as original",
            summary.placements.len(),
            summary.placements.len() - converted
        );
    }
    for (heading, body) in sections {
        if body.trim().is_empty() {
            continue;
        }
        let _ = write!(out, "\n{heading}\n\n{body}");
    }
    out
}

fn converted_files(input: &ReportInput<'_>) -> String {
    let Some(summary) = input.summary else {
        return String::new();
    };
    let mut body = String::new();
    for file in summary.converted_files() {
        let blocks: Vec<&str> = summary
            .placements
            .iter()
            .filter(|p| p.file == file)
            .filter_map(|p| p.module_label.as_deref())
            .collect();
        if blocks.is_empty() {
            let _ = writeln!(body, "- `{file}`: {} new variable(s)", summary.variables_added.len());
        } else {
            let labels = blocks.iter().map(|l| format!("`module.{l}`")).collect::<Vec<_>>();
            let _ = writeln!(body, "- `{file}`: {}", labels.join(", "));
        }
    }
    body
}

fn successful_mappings(input: &ReportInput<'_>) -> String {
    let (Some(mapping), Some(summary)) = (input.mapping, input.summary) else {
        return String::new();
    };
    let mut rows = Vec::new();
    for placement in summary.placements.iter().filter(|p| p.is_converted()) {
        let Some(candidate) = mapping.candidate(&placement.address) else {
            continue;
        };
        let (module, version) = candidate.target().unwrap_or_default();
        rows.push(format!(
            "| `{}` | `{module}` | `{version}` | {:.2} | `module.{}` |",
            placement.address,
            candidate.confidence,
            placement.module_label.as_deref().unwrap_or_default()
        ));
    }
    for candidate in mapping.with_status(MappingStatus::AlreadyCompliant) {
        let module = candidate.target_module.as_deref().unwrap_or_default();
        let version = candidate.target_version.as_deref().unwrap_or("unpinned");
        rows.push(format!(
            "| `{}` | `{module}` | `{version}` | {:.2} | already compliant |",
            candidate.resource_address, candidate.confidence
        ));
    }
    if rows.is_empty() {
        return String::new();
    }
    let mut body = String::from("| Resource | Module | Version | Confidence | Result |\n");
    body.push_str("|---|---|---|---|---|\n");
    for row in rows {
        body.push_str(&row);
        body.push('\n');
    }
    body
}

fn issues(input: &ReportInput<'_>) -> String {
    let mut body = String::new();
    for issue in &input.state.issues {
        match &issue.address {
            Some(address) => {
                let _ = writeln!(body, "- **{}** `{address}`: {}", issue.kind, issue.message);
            }
            None => {
                let _ = writeln!(body, "- **{}**: {}", issue.kind, issue.message);
            }
        }
    }
    body
}

fn next_steps(input: &ReportInput<'_>) -> String {
    let state = input.state;
    let mut steps = Vec::new();
    match state.status {
        RunStatus::Succeeded => {
            steps.push("Run `terraform plan` against the converted output and compare it with the original state".to_string());
        }
        RunStatus::PartiallySucceeded => {
            let files: std::collections::BTreeSet<&str> = input.fixes.iter().map(|f| f.file.as_str()).collect();
            steps.push(format!(
                "Work through the fix plan (`10_fix_plan.json`): {} proposal(s) across {} file(s), then re-run `terraform validate`",
                input.fixes.len(),
                files.len()
            ));
            for fix in input.fixes {
                steps.push(format!(
                    "`{}` ({}, {} confidence): {}",
                    fix.file, fix.priority, fix.confidence, fix.proposed_fix_text
                ));
            }
        }
        RunStatus::Failed => {
            steps.push(format!(
                "Resolve the fatal issue above and re-run the conversion; partial artifacts are kept in `{}`",
                input.run_dir.display()
            ));
        }
        RunStatus::Running => {}
    }
    let left = state
        .issues
        .iter()
        .filter(|i| {
            matches!(
                i.kind,
                IssueKind::Unmapped | IssueKind::NeedsReview | IssueKind::ModuleNotFound | IssueKind::PlanningFailed
            )
        })
        .count();
    if left > 0 && state.status != RunStatus::Failed {
        steps.push(format!("Convert the {left} resource(s) left as original by hand"));
    }
    let unresolved = state.issues_of(IssueKind::Unresolved).count();
    if unresolved > 0 && state.status != RunStatus::Failed {
        steps.push(format!(
            "Resolve the {unresolved} `TODO(tf2avm)` item(s) in the converted module calls"
        ));
    }
    steps.iter().map(|s| format!("- {s}\n")).collect()
}
