//! Summarize a processed coverage model for text or JSON output.

use serde::Serialize;

use crate::model::{rate, CovData, FileCoverage};

/// Per-file summary row.
#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub total_lines: u64,
    pub covered_lines: u64,
    pub excluded_lines: u64,
    pub total_branches: u64,
    pub covered_branches: u64,
    pub total_functions: u64,
    pub covered_functions: u64,
}

impl FileSummary {
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }

    #[must_use]
    pub fn branch_rate(&self) -> f64 {
        rate(self.covered_branches, self.total_branches)
    }
}

/// Summary stats across the whole run.
#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub files: Vec<FileSummary>,
    pub total_lines: u64,
    pub covered_lines: u64,
    pub excluded_lines: u64,
    pub total_branches: u64,
    pub covered_branches: u64,
    pub total_functions: u64,
    pub covered_functions: u64,
}

impl ReportSummary {
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }

    #[must_use]
    pub fn branch_rate(&self) -> f64 {
        rate(self.covered_branches, self.total_branches)
    }

    #[must_use]
    pub fn function_rate(&self) -> f64 {
        rate(self.covered_functions, self.total_functions)
    }
}

fn summarize_file(filecov: &FileCoverage) -> FileSummary {
    let mut summary = FileSummary {
        path: filecov.filename.clone(),
        total_lines: 0,
        covered_lines: 0,
        excluded_lines: 0,
        total_branches: 0,
        covered_branches: 0,
        total_functions: 0,
        covered_functions: 0,
    };

    for linecov in filecov.lines.values() {
        if !linecov.is_reportable() {
            continue;
        }
        if linecov.excluded {
            summary.excluded_lines += 1;
            continue;
        }
        summary.total_lines += 1;
        if linecov.is_covered() {
            summary.covered_lines += 1;
        }
        for branchcov in linecov.branches.values() {
            if branchcov.is_reportable() {
                summary.total_branches += 1;
                if branchcov.is_covered() {
                    summary.covered_branches += 1;
                }
            }
        }
    }

    for function in filecov.functions.values() {
        for (lineno, count) in &function.count {
            if function.excluded.get(lineno).copied().unwrap_or(false) {
                continue;
            }
            summary.total_functions += 1;
            if *count > 0 {
                summary.covered_functions += 1;
            }
        }
    }

    summary
}

/// Summarize all files of a processed run.
pub fn summarize(covdata: &CovData) -> ReportSummary {
    let files: Vec<FileSummary> = covdata.files.values().map(summarize_file).collect();

    let mut summary = ReportSummary {
        total_lines: files.iter().map(|f| f.total_lines).sum(),
        covered_lines: files.iter().map(|f| f.covered_lines).sum(),
        excluded_lines: files.iter().map(|f| f.excluded_lines).sum(),
        total_branches: files.iter().map(|f| f.total_branches).sum(),
        covered_branches: files.iter().map(|f| f.covered_branches).sum(),
        total_functions: files.iter().map(|f| f.total_functions).sum(),
        covered_functions: files.iter().map(|f| f.covered_functions).sum(),
        files: Vec::new(),
    };
    summary.files = files;
    summary
}

/// Render a plain-text coverage table.
pub fn render_text(summary: &ReportSummary) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    writeln!(out, "{:<40} {:>12} {:>12} {:>8}", "FILE", "LINES", "BRANCHES", "COVER").ok();
    writeln!(out, "{}", "-".repeat(76)).ok();
    for file in &summary.files {
        writeln!(
            out,
            "{:<40} {:>5}/{:<6} {:>5}/{:<6} {:>6.1}%",
            file.path,
            file.covered_lines,
            file.total_lines,
            file.covered_branches,
            file.total_branches,
            file.line_rate() * 100.0
        )
        .ok();
    }
    writeln!(out, "{}", "-".repeat(76)).ok();
    writeln!(
        out,
        "Lines:      {}/{} ({:.1}%)",
        summary.covered_lines,
        summary.total_lines,
        summary.line_rate() * 100.0
    )
    .ok();
    if summary.total_branches > 0 {
        writeln!(
            out,
            "Branches:   {}/{} ({:.1}%)",
            summary.covered_branches,
            summary.total_branches,
            summary.branch_rate() * 100.0
        )
        .ok();
    }
    if summary.total_functions > 0 {
        writeln!(
            out,
            "Functions:  {}/{} ({:.1}%)",
            summary.covered_functions,
            summary.total_functions,
            summary.function_rate() * 100.0
        )
        .ok();
    }
    if summary.excluded_lines > 0 {
        writeln!(out, "Excluded:   {} lines", summary.excluded_lines).ok();
    }
    out
}

/// Render the summary as JSON.
pub fn render_json(summary: &ReportSummary) -> crate::error::Result<String> {
    serde_json::to_string_pretty(summary)
        .map_err(|error| crate::error::GcovrsError::Other(error.to_string()))
}
