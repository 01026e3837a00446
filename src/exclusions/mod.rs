//! Exclusion markers and other source-level filtering mechanisms.
//!
//! The different mechanisms are exposed as separate passes that remove
//! unwanted aspects from the coverage data. The full suite can be invoked
//! via [`apply_all_exclusions`], configured through [`ExclusionOptions`].

pub mod markers;
pub mod noncode;

use regex::Regex;
use tracing::debug;

use crate::model::FileCoverage;
use self::markers::{
    apply_exclusion_markers, apply_exclusion_ranges, get_function_exclude_ranges,
    get_functions_by_line, ExclusionRangeWarnings, RangeLookup,
};
use self::noncode::{remove_noncode_lines, remove_unreachable_branches};

/// Options used by exclusion processing.
#[derive(Debug, Clone)]
pub struct ExclusionOptions {
    /// Honor in-source markers such as `GCOVR_EXCL_LINE`.
    pub respect_exclusion_markers: bool,
    /// Exclude functions whose demangled name fully matches any pattern.
    pub exclude_functions: Vec<Regex>,
    /// Regex marking fully-matching source lines as excluded.
    pub exclude_lines_by_pattern: Option<String>,
    /// Regex marking fully-matching source lines as branch-excluded.
    pub exclude_branches_by_pattern: Option<String>,
    /// Prefix (regex) for the `_EXCL_LINE`/`_EXCL_START`/... markers.
    pub exclude_pattern_prefix: String,
    pub exclude_throw_branches: bool,
    pub exclude_unreachable_branches: bool,
    pub exclude_function_lines: bool,
    pub exclude_internal_functions: bool,
    pub exclude_noncode_lines: bool,
    pub exclude_calls: bool,
}

impl Default for ExclusionOptions {
    fn default() -> Self {
        Self {
            respect_exclusion_markers: true,
            exclude_functions: Vec::new(),
            exclude_lines_by_pattern: None,
            exclude_branches_by_pattern: None,
            exclude_pattern_prefix: "GCOVR".to_string(),
            exclude_throw_branches: false,
            exclude_unreachable_branches: false,
            exclude_function_lines: false,
            exclude_internal_functions: false,
            exclude_noncode_lines: false,
            exclude_calls: false,
        }
    }
}

/// Apply all enabled exclusion mechanisms. Modifies the `FileCoverage` in
/// place. `lines` is the source code text, indexed by line number.
pub fn apply_all_exclusions(
    filecov: &mut FileCoverage,
    lines: &[String],
    options: &ExclusionOptions,
) {
    if options.exclude_noncode_lines {
        remove_noncode_lines(filecov, lines);
    }

    if options.respect_exclusion_markers {
        apply_exclusion_markers(
            filecov,
            lines,
            options.exclude_lines_by_pattern.as_deref(),
            options.exclude_branches_by_pattern.as_deref(),
            &options.exclude_pattern_prefix,
        );
    }

    if !options.exclude_functions.is_empty() {
        remove_functions(filecov, &options.exclude_functions);
    }

    if options.exclude_throw_branches {
        remove_throw_branches(filecov);
    }

    if options.exclude_unreachable_branches {
        remove_unreachable_branches(filecov, lines);
    }

    if options.exclude_function_lines {
        remove_function_lines(filecov);
    }

    if options.exclude_internal_functions {
        remove_internal_functions(filecov);
    }

    if options.exclude_calls {
        remove_calls(filecov);
    }
}

/// Remove the information about calls.
pub fn remove_calls(filecov: &mut FileCoverage) {
    for linecov in filecov.lines.values_mut() {
        linecov.calls.clear();
    }
}

/// Remove compiler-generated functions, e.g. for static initialization.
pub fn remove_internal_functions(filecov: &mut FileCoverage) {
    let internal_keys: Vec<String> = filecov
        .functions
        .iter()
        .filter(|(_, function)| function_can_be_excluded(function.display_name()))
        .map(|(key, _)| key.clone())
        .collect();

    for key in internal_keys {
        let Some(function) = filecov.functions.remove(&key) else {
            continue;
        };
        debug!(
            "Ignoring symbol {} in line(s) {} in file {}",
            function.display_name(),
            function
                .count
                .keys()
                .map(|lineno| lineno.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            filecov.filename
        );

        // Exclude the lines belonging to the removed function.
        for lineno in function.count.keys() {
            if let Some(linecov) = filecov.lines.get_mut(lineno) {
                linecov.exclude();
            }
        }
    }
}

/// Special names for construction/destruction of static objects.
fn function_can_be_excluded(name: &str) -> bool {
    name.starts_with("__") || name.starts_with("_GLOBAL__sub_I_")
}

/// Remove coverage for lines that contain a function definition.
pub fn remove_function_lines(filecov: &mut FileCoverage) {
    let known_function_lines: std::collections::BTreeSet<u32> = filecov
        .functions
        .values()
        .flat_map(|function| function.count.keys().copied())
        .collect();
    filecov
        .lines
        .retain(|lineno, _| !known_function_lines.contains(lineno));
}

/// Remove branches annotated as "throw".
pub fn remove_throw_branches(filecov: &mut FileCoverage) {
    let filename = filecov.filename.clone();
    for linecov in filecov.lines.values_mut() {
        let lineno = linecov.lineno;
        linecov.branches.retain(|_, branchcov| {
            if branchcov.throw {
                debug!(
                    "Excluding branch on line {lineno} file {filename}: \
                     detected as exception-only code"
                );
                false
            } else {
                true
            }
        });
    }
}

/// Remove functions whose demangled name matches one of the patterns,
/// excluding their full line ranges like a function-scoped marker would.
pub fn remove_functions(filecov: &mut FileCoverage, patterns: &[Regex]) {
    if filecov.functions.is_empty() {
        return;
    }

    let warnings = ExclusionRangeWarnings::new(&filecov.filename);
    let functions_by_line = get_functions_by_line(filecov);

    let mut exclude_ranges = Vec::new();
    for (lineno, functions) in &functions_by_line {
        for function in functions {
            let matched = patterns
                .iter()
                .any(|pattern| full_match(pattern, function.display_name()));
            if !matched {
                continue;
            }
            let start_column = function
                .start
                .as_ref()
                .and_then(|start| start.get(lineno))
                .map(|(_, column)| *column);
            match start_column {
                // Resolve as if the marker sat just after the definition.
                Some(column) => exclude_ranges.extend(get_function_exclude_ranges(
                    &warnings,
                    *lineno,
                    column + 1,
                    &functions_by_line,
                )),
                None => tracing::warn!(
                    "Function exclusion for {} not supported for this compiler, \
                     when processing {}.",
                    function.display_name(),
                    filecov.filename
                ),
            }
        }
    }

    debug!(
        "Exclusion ranges for functions in {}: {exclude_ranges:?}",
        filecov.filename
    );
    let mut line_is_excluded = RangeLookup::new(exclude_ranges.clone());
    let mut branch_is_excluded = RangeLookup::new(exclude_ranges);
    apply_exclusion_ranges(filecov, &mut line_is_excluded, &mut branch_is_excluded);
}

fn full_match(pattern: &Regex, text: &str) -> bool {
    pattern
        .find(text)
        .is_some_and(|found| found.start() == 0 && found.end() == text.len())
}
