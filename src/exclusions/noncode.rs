//! Heuristics for ignoring data on lines that don't look like actual code.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::FileCoverage;

static C_STYLE_COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*.*?\*/").unwrap());
static CPP_STYLE_COMMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"//.*").unwrap());

fn strip_comments(code: &str) -> String {
    let code = CPP_STYLE_COMMENT_PATTERN.replace_all(code, "");
    C_STYLE_COMMENT_PATTERN.replace_all(&code, "").into_owned()
}

/// Remove branches on lines that look like they can't contain useful code.
pub fn remove_unreachable_branches(filecov: &mut FileCoverage, lines: &[String]) {
    let filename = filecov.filename.clone();
    for linecov in filecov.lines.values_mut() {
        if !linecov.has_reportable_branches() {
            continue;
        }

        let code = lines
            .get(linecov.lineno as usize - 1)
            .map(String::as_str)
            .unwrap_or("");
        if line_can_contain_branches(code) {
            continue;
        }

        debug!(
            "Excluding unreachable branch on line {} file {filename}: \
             detected as compiler-generated code",
            linecov.lineno
        );
        linecov.branches.clear();
    }
}

/// False if the line looks empty except for braces.
fn line_can_contain_branches(code: &str) -> bool {
    let code = strip_comments(code).trim().replace(' ', "");
    !matches!(code.as_str(), "" | "{" | "}" | "{}")
}

/// Flag lines that look like non-code, so they no longer contribute to
/// totals. The lines stay listed.
pub fn remove_noncode_lines(filecov: &mut FileCoverage, lines: &[String]) {
    let filename = filecov.filename.clone();
    for linecov in filecov.lines.values_mut() {
        let code = lines
            .get(linecov.lineno as usize - 1)
            .map(String::as_str)
            .unwrap_or("");
        if linecov.count == 0 && is_non_code(code) {
            debug!(
                "Removing line {} in file {filename}: detected as non code",
                linecov.lineno
            );
            linecov.noncode = true;
            linecov.branches.clear();
        }
    }
}

/// Check for patterns that indicate that this line doesn't contain useful
/// code.
fn is_non_code(code: &str) -> bool {
    let code = strip_comments(code);
    let code = code.trim();
    matches!(code, "" | "{" | "}" | "else")
}
