//! Explicit exclusion markers in source code, e.g. `GCOVR_EXCL_LINE`.
//!
//! A single forward scan over the source lines turns region markers into
//! inclusive line ranges. Line and branch markers are tracked through
//! independent region stacks; marker mismatches are reported but never
//! fatal, and the best-effort range is still recorded.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::warn;

use crate::model::{FileCoverage, FunctionCoverage};

const EXCLUDE_FLAG: &str = "_EXCL_";
const EXCLUDE_LINE_WORD: &str = "";
const EXCLUDE_BRANCH_WORD: &str = "BR_";
const EXCLUDE_PATTERN_POSTFIX: &str = "(LINE|START|STOP|FUNCTION)";

/// Index from line number to the functions starting on that line.
pub type FunctionListByLine<'a> = BTreeMap<u32, Vec<&'a FunctionCoverage>>;

/// Membership test over a set of inclusive line ranges.
///
/// The ranges are sorted once; queries use a monotonic-hint linear scan
/// which is fast when callers ask in ascending line order (they do: the
/// line map iterates sorted).
#[derive(Debug, Default)]
pub struct RangeLookup {
    ranges: Vec<(u32, u32)>,
    hint_value: u32,
    hint_index: usize,
}

impl RangeLookup {
    pub fn new(mut ranges: Vec<(u32, u32)>) -> Self {
        ranges.sort_unstable();
        Self {
            ranges,
            hint_value: 0,
            hint_index: 0,
        }
    }

    /// Whether `value` falls in any range (inclusive).
    pub fn contains(&mut self, value: u32) -> bool {
        // If the ascending-order heuristic failed, restart from the start.
        if value < self.hint_value {
            self.hint_index = 0;
        }
        self.hint_value = value;

        for index in self.hint_index..self.ranges.len() {
            let (start, end) = self.ranges[index];
            self.hint_index = index;

            // Stop as soon as a too-large range is seen.
            if value < start {
                return false;
            }
            if value <= end {
                return true;
            }
        }

        self.hint_index = self.ranges.len();
        false
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Log warnings related to exclusion marker processing.
pub(crate) struct ExclusionRangeWarnings<'a> {
    filename: &'a str,
}

impl<'a> ExclusionRangeWarnings<'a> {
    pub(crate) fn new(filename: &'a str) -> Self {
        Self { filename }
    }

    fn mismatched_start_stop(&self, start_lineno: u32, start: &str, stop_lineno: u32, stop: &str) {
        warn!(
            "{start} found on line {start_lineno} was terminated by {stop} \
             on line {stop_lineno}, when processing {}.",
            self.filename
        );
    }

    fn stop_without_start(&self, lineno: u32, expected_start: &str, stop: &str) {
        warn!(
            "mismatched coverage exclusion flags.\n\
             \t{stop} found on line {lineno} without corresponding {expected_start}, \
             when processing {}.",
            self.filename
        );
    }

    fn start_without_stop(&self, lineno: u32, start: &str, expected_stop: &str) {
        warn!(
            "The coverage exclusion region start flag {start} on line {lineno} \
             did not have corresponding {expected_stop} flag in file {}.",
            self.filename
        );
    }

    fn line_after_start(&self, lineno: u32, marker: &str, start_lineno: u32) {
        warn!(
            "{marker} found on line {lineno} in excluded region started on \
             line {start_lineno}, when processing {}.",
            self.filename
        );
    }

    fn function_exclude_not_supported(&self, lineno: u32, columnno: u32) {
        warn!(
            "Function exclude marker found on line {lineno}:{columnno} but \
             not supported for this compiler, when processing {}.",
            self.filename
        );
    }

    fn function_exclude_not_at_function_line(&self, lineno: u32, columnno: u32) {
        warn!(
            "Function exclude marker found on line {lineno}:{columnno} but no \
             function definition found, when processing {}.",
            self.filename
        );
    }

    fn source_exclude_not_supported(&self, lineno: u32) {
        warn!(
            "Branch source exclude marker found on line {lineno} but no block \
             information was emitted by the compiler, when processing {}.",
            self.filename
        );
    }
}

/// Get an index from line number to the functions defined on that line.
/// Empty when the compiler did not supply position metadata.
pub fn get_functions_by_line(filecov: &FileCoverage) -> FunctionListByLine<'_> {
    let mut functions_by_line: FunctionListByLine = BTreeMap::new();
    for function in filecov.functions.values() {
        if let Some(start) = &function.start {
            for lineno in start.keys() {
                functions_by_line.entry(*lineno).or_default().push(function);
            }
        }
    }
    functions_by_line
}

/// Resolve the line ranges excluded by a function-scoped marker at
/// `lineno:columnno`: the smallest enclosing function's full range, minus
/// any nested function's own range (inner lambdas/closures stay
/// separately excludable).
pub(crate) fn get_function_exclude_ranges(
    warnings: &ExclusionRangeWarnings<'_>,
    lineno: u32,
    columnno: u32,
    functions_by_line: &FunctionListByLine<'_>,
) -> Vec<(u32, u32)> {
    if functions_by_line.is_empty() {
        warnings.function_exclude_not_supported(lineno, columnno);
        return Vec::new();
    }

    let mut exclude_ranges = Vec::new();
    let same_line_functions: &[&FunctionCoverage] = functions_by_line
        .get(&lineno)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    // Find the closest function definition on this line; check the end
    // column when the function also ends on this line.
    let mut lineno_end = None;
    let mut remaining = same_line_functions.iter();
    for function in remaining.by_ref() {
        let (Some(start), Some(end)) = (&function.start, &function.end) else {
            continue;
        };
        let (Some(&(_, start_col)), Some(&(end_line, end_col))) =
            (start.get(&lineno), end.get(&lineno))
        else {
            continue;
        };
        if columnno > start_col && (lineno < end_line || columnno < end_col) {
            lineno_end = Some(end_line);
            break;
        }
    }

    let Some(lineno_end) = lineno_end else {
        warnings.function_exclude_not_at_function_line(lineno, columnno);
        return Vec::new();
    };

    // Carve out functions nested inside the excluded range.
    let mut included_ranges = Vec::new();
    for function in remaining {
        if let Some(end) = &function.end {
            if let Some(&(end_line, _)) = end.get(&lineno) {
                included_ranges.push((lineno, end_line + 1));
            }
        }
    }
    for function_lineno in (lineno + 1)..lineno_end {
        for function in functions_by_line.get(&function_lineno).into_iter().flatten() {
            let (Some(start), Some(end)) = (&function.start, &function.end) else {
                continue;
            };
            if let (Some(&(start_line, _)), Some(&(end_line, _))) =
                (start.get(&function_lineno), end.get(&function_lineno))
            {
                included_ranges.push((start_line, end_line));
            }
        }
    }

    if included_ranges.is_empty() {
        exclude_ranges.push((lineno, lineno_end));
    } else {
        included_ranges.sort_unstable();
        let mut last_include_end = lineno;
        for (include_start, include_end) in included_ranges {
            // The exclusion must end on the line before the included
            // range, and resume on the line after it.
            if include_start > last_include_end {
                exclude_ranges.push((last_include_end, include_start - 1));
            }
            last_include_end = include_end + 1;
        }
        exclude_ranges.push((last_include_end, lineno_end));
    }

    exclude_ranges
}

/// Process one LINE/START/STOP/FUNCTION marker occurrence.
///
/// START markers push onto the region stack, STOP markers pop it; the
/// closed range includes both the start and the stop line.
#[allow(clippy::too_many_arguments)]
fn process_exclusion_marker(
    lineno: u32,
    columnno: u32,
    flag: &str,
    header: &str,
    exclude_word: &str,
    warnings: &ExclusionRangeWarnings<'_>,
    functions_by_line: &FunctionListByLine<'_>,
    exclude_ranges: &mut Vec<(u32, u32)>,
    exclusion_stack: &mut Vec<(String, u32)>,
) {
    match flag {
        "LINE" => {
            if let Some((_, start_lineno)) = exclusion_stack.last() {
                // The enclosing START/STOP region already covers it.
                warnings.line_after_start(
                    lineno,
                    &format!("{header}{EXCLUDE_FLAG}{exclude_word}LINE"),
                    *start_lineno,
                );
            } else {
                exclude_ranges.push((lineno, lineno));
            }
        }

        "START" => {
            exclusion_stack.push((header.to_string(), lineno));
        }

        "STOP" => match exclusion_stack.pop() {
            None => {
                warnings.stop_without_start(
                    lineno,
                    &format!("{header}{EXCLUDE_FLAG}{exclude_word}START"),
                    &format!("{header}{EXCLUDE_FLAG}{exclude_word}STOP"),
                );
            }
            Some((start_header, start_lineno)) => {
                if header != start_header {
                    warnings.mismatched_start_stop(
                        start_lineno,
                        &format!("{start_header}{EXCLUDE_FLAG}{exclude_word}START"),
                        lineno,
                        &format!("{header}{EXCLUDE_FLAG}{exclude_word}STOP"),
                    );
                }
                // The mismatch is reported, not fatal: the range still
                // closes, stop line included.
                exclude_ranges.push((start_lineno, lineno));
            }
        },

        "FUNCTION" => {
            exclude_ranges.extend(get_function_exclude_ranges(
                warnings,
                lineno,
                columnno,
                functions_by_line,
            ));
        }

        _ => {}
    }
}

/// Scan all source lines for exclusion markers.
///
/// Returns the line-exclusion lookup, the branch-exclusion lookup, and the
/// set of compiler block ids excluded by `_EXCL_BR_SOURCE` markers.
pub(crate) fn find_excluded_ranges(
    lines: &[String],
    warnings: &ExclusionRangeWarnings<'_>,
    filecov: &FileCoverage,
    exclude_lines_by_custom_pattern: Option<&str>,
    exclude_branches_by_custom_pattern: Option<&str>,
    exclude_pattern_prefix: &str,
) -> (RangeLookup, RangeLookup, BTreeSet<u32>) {
    let functions_by_line = get_functions_by_line(filecov);

    let mut find_ranges = |custom_pattern: Option<&str>, exclude_word: &str| {
        let custom_pattern_regex = custom_pattern
            .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
            .transpose()
            .unwrap_or_else(|error| {
                warn!("Invalid exclusion pattern, ignoring it: {error}");
                None
            });

        let excl_pattern = match Regex::new(&format!(
            "({exclude_pattern_prefix}){EXCLUDE_FLAG}{exclude_word}{EXCLUDE_PATTERN_POSTFIX}"
        )) {
            Ok(pattern) => pattern,
            Err(error) => {
                warn!("Invalid exclusion marker prefix, ignoring markers: {error}");
                return RangeLookup::default();
            }
        };

        // Possibly overlapping inclusive ranges describing exclusions.
        let mut exclude_ranges: Vec<(u32, u32)> = Vec::new();
        let mut exclusion_stack: Vec<(String, u32)> = Vec::new();

        for (index, code) in lines.iter().enumerate() {
            let lineno = index as u32 + 1;
            if code.contains(EXCLUDE_FLAG) {
                for captures in excl_pattern.captures_iter(code) {
                    let columnno = captures
                        .get(0)
                        .map(|m| m.start() as u32 + 1)
                        .unwrap_or(1);
                    process_exclusion_marker(
                        lineno,
                        columnno,
                        &captures[2],
                        &captures[1],
                        exclude_word,
                        warnings,
                        &functions_by_line,
                        &mut exclude_ranges,
                        &mut exclusion_stack,
                    );
                }
            }

            if let Some(regex) = &custom_pattern_regex {
                if regex.is_match(code) {
                    exclude_ranges.push((lineno, lineno));
                }
            }
        }

        for (header, lineno) in exclusion_stack {
            warnings.start_without_stop(
                lineno,
                &format!("{header}{EXCLUDE_FLAG}{exclude_word}START"),
                &format!("{header}{EXCLUDE_FLAG}{exclude_word}STOP"),
            );
        }

        RangeLookup::new(exclude_ranges)
    };

    let line_ranges = find_ranges(exclude_lines_by_custom_pattern, EXCLUDE_LINE_WORD);
    let branch_ranges = find_ranges(exclude_branches_by_custom_pattern, EXCLUDE_BRANCH_WORD);

    let excluded_blocks =
        find_source_excluded_blocks(lines, warnings, filecov, exclude_pattern_prefix);

    (line_ranges, branch_ranges, excluded_blocks)
}

/// Collect the block ids excluded by `_EXCL_BR_SOURCE` markers: the marked
/// line's compiler blocks become branch destinations to suppress.
fn find_source_excluded_blocks(
    lines: &[String],
    warnings: &ExclusionRangeWarnings<'_>,
    filecov: &FileCoverage,
    exclude_pattern_prefix: &str,
) -> BTreeSet<u32> {
    let source_pattern = match Regex::new(&format!(
        "({exclude_pattern_prefix}){EXCLUDE_FLAG}BR_SOURCE"
    )) {
        Ok(pattern) => pattern,
        Err(_) => return BTreeSet::new(),
    };

    let mut excluded_blocks = BTreeSet::new();
    for (index, code) in lines.iter().enumerate() {
        let lineno = index as u32 + 1;
        if !code.contains(EXCLUDE_FLAG) || !source_pattern.is_match(code) {
            continue;
        }
        match filecov.lines.get(&lineno) {
            Some(linecov) if !linecov.block_ids.is_empty() => {
                excluded_blocks.extend(linecov.block_ids.iter().copied());
            }
            _ => warnings.source_exclude_not_supported(lineno),
        }
    }
    excluded_blocks
}

/// Remove any coverage information selected by the exclusion predicates.
///
/// Excluded lines stay in the model, flagged and zeroed, so they are still
/// reported as excluded lines — distinct from lines gcov never emitted.
/// Any previously computed decision is unconditionally cleared: decision
/// inference is a derived heuristic over branch shape and is invalidated
/// by exclusion.
pub fn apply_exclusion_ranges(
    filecov: &mut FileCoverage,
    line_is_excluded: &mut RangeLookup,
    branch_is_excluded: &mut RangeLookup,
) {
    for linecov in filecov.lines.values_mut() {
        linecov.decision = None;

        if line_is_excluded.contains(linecov.lineno) {
            linecov.excluded = true;
            linecov.branches.clear();
            linecov.count = 0;
        } else if branch_is_excluded.contains(linecov.lineno) {
            linecov.branches.clear();
        }
    }

    for function in filecov.functions.values_mut() {
        let linenos: Vec<u32> = function.excluded.keys().copied().collect();
        for lineno in linenos {
            if line_is_excluded.contains(lineno) {
                function.count.insert(lineno, 0);
                function.excluded.insert(lineno, true);
            }
        }
    }
}

/// Remove all branches whose destination block was excluded by a
/// `_EXCL_BR_SOURCE` marker.
pub(crate) fn apply_source_branch_exclusions(
    filecov: &mut FileCoverage,
    excluded_blocks: &BTreeSet<u32>,
) {
    if excluded_blocks.is_empty() {
        return;
    }
    for linecov in filecov.lines.values_mut() {
        linecov.branches.retain(|_, branch| {
            branch
                .destination_blockno
                .map_or(true, |blockno| !excluded_blocks.contains(&blockno))
        });
    }
}

/// Remove any coverage information that is excluded by explicit markers
/// such as `GCOVR_EXCL_LINE`. Modifies the `FileCoverage` in place.
///
/// `lines` is the source code text (not raw gcov report lines).
pub fn apply_exclusion_markers(
    filecov: &mut FileCoverage,
    lines: &[String],
    exclude_lines_by_pattern: Option<&str>,
    exclude_branches_by_pattern: Option<&str>,
    exclude_pattern_prefix: &str,
) {
    let warnings = ExclusionRangeWarnings::new(&filecov.filename);
    let (mut line_is_excluded, mut branch_is_excluded, excluded_blocks) = find_excluded_ranges(
        lines,
        &warnings,
        filecov,
        exclude_lines_by_pattern,
        exclude_branches_by_pattern,
        exclude_pattern_prefix,
    );

    apply_exclusion_ranges(filecov, &mut line_is_excluded, &mut branch_is_excluded);
    apply_source_branch_exclusions(filecov, &excluded_blocks);
}
