//! Parser for the textual `.gcov` report format.
//!
//! Reference: the *Invoking Gcov* section in the GCC manual
//! <https://gcc.gnu.org/onlinedocs/gcc/Invoking-Gcov.html> and the
//! `gcov.cc` source in GCC (especially for the exact number format).
//!
//! Key line shapes:
//!   `        -:    0:Source:foo.cpp`          metadata
//!   `        5:   13:foo += 1;`               source line
//!   `    #####:   14:bar();`                  uncovered source line
//!   `    %%%%%:   14-block  0`                block line
//!   `branch  0 taken 5 (fallthrough)`         branch tag
//!   `call  0 returned 50%`                    call tag
//!   `unconditional  1 taken 17`               unconditional branch tag
//!   `function foo called 2 returned 1 blocks executed 85%`
//!   `------------------`                      specialization marker
//!   `Foo<bar>::baz():`                        specialization name
//!
//! Tokenizing and interpretation are separate passes: every raw line is
//! first classified into a [`LineToken`], then a small state machine folds
//! the token stream into a [`FileCoverage`]. Recoverable problems are
//! collected per file and escalated once, in a batch.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::{GcovrsError, ParseError, Result};
use crate::merge::{
    insert_branch_coverage, insert_call_coverage, insert_function_coverage,
    insert_line_coverage, MergeOptions,
};
use crate::model::{BranchCoverage, CallCoverage, FileCoverage, FunctionCoverage, LineCoverage};

/// Counter values at or above this are assumed to come from a gcov
/// wraparound defect.
pub const SUSPICIOUS_COUNTER: u64 = 1 << 32;

/// How to treat a numeric anomaly (negative or suspicious hit count).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HitsTolerance {
    /// Abort parsing of the file (the default).
    #[default]
    Abort,
    /// Clamp to zero and log every occurrence.
    Warn,
    /// Clamp to zero, log the first occurrence, and report an aggregate
    /// count at end of file.
    WarnOncePerFile,
}

/// Options controlling recoverable-error policy while parsing.
#[derive(Debug, Clone, Default)]
pub struct ParserOptions {
    /// Keep going after unrecognized lines instead of escalating the
    /// collected errors at end of file. Also downgrades numeric anomalies
    /// to warnings.
    pub ignore_parse_errors: bool,
    pub negative_hits: HitsTolerance,
    pub suspicious_hits: HitsTolerance,
}

impl ParserOptions {
    fn negative_tolerance(&self) -> HitsTolerance {
        if self.ignore_parse_errors && self.negative_hits == HitsTolerance::Abort {
            HitsTolerance::Warn
        } else {
            self.negative_hits
        }
    }

    fn suspicious_tolerance(&self) -> HitsTolerance {
        if self.ignore_parse_errors && self.suspicious_hits == HitsTolerance::Abort {
            HitsTolerance::Warn
        } else {
            self.suspicious_hits
        }
    }
}

/// Per-file counters for anomalies that were clamped instead of raised.
#[derive(Debug, Default)]
struct HitsStats {
    negative: u64,
    suspicious: u64,
}

impl HitsStats {
    /// Emit the once-per-file aggregate warnings.
    fn report_aggregates(&self, options: &ParserOptions) {
        if options.negative_tolerance() == HitsTolerance::WarnOncePerFile && self.negative > 1 {
            warn!("Ignored {} negative hits overall.", self.negative);
        }
        if options.suspicious_tolerance() == HitsTolerance::WarnOncePerFile && self.suspicious > 1
        {
            warn!("Ignored {} suspicious hits overall.", self.suspicious);
        }
    }
}

/// Additional info about source lines, such as noncode or exception-only
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtraInfo {
    None,
    Noncode,
    ExceptionOnly,
    Partial,
}

/// One classified line of a gcov report.
#[derive(Debug, Clone, PartialEq)]
enum LineToken {
    /// `HITS: LINENO:CODE`
    Source {
        hits: u64,
        lineno: u32,
        source_code: String,
        extra_info: ExtraInfo,
    },
    /// `-: 0:KEY:VALUE`
    Metadata { key: String, value: Option<String> },
    /// `HITS: LINENO-block BLOCKNO`
    ///
    /// The hit count is validated but not stored: only the block id is
    /// consumed, to correlate later branches with compiler blocks.
    Block { lineno: u32, blockno: u32 },
    /// Delimits template specialization sections (a run of hyphens).
    SpecializationMarker,
    /// The demangled name of the specialization section that follows.
    SpecializationName { name: String },
    /// `call CALLNO returned RETURNED`
    Call { callno: u32, returned: u64 },
    /// `branch BRANCHNO taken HITS (ANNOTATION)`
    Branch {
        branchno: u32,
        hits: u64,
        annotation: Option<String>,
    },
    /// `unconditional BRANCHNO taken HITS`
    Unconditional { branchno: u32, hits: u64 },
    /// `function NAME called COUNT returned RETURNED blocks executed BLOCKS`
    ///
    /// Function coverage applies to the *next* source line, so handling is
    /// deferred by the state machine.
    Function {
        name: String,
        count: u64,
        blocks_covered: f64,
    },
}

/// Compile a regex from a line pattern.
///
/// A line pattern is a normal regex, except that the following
/// placeholders are replaced by pattern fragments:
///
/// * `VALUE` matches gcov's `format_gcov()` output (percentage or
///   human-readable count)
/// * `INT` matches an integer
/// * a space matches one or more spaces
/// * the pattern is anchored at start/end
fn line_pattern(pattern: &str) -> Regex {
    let pattern = pattern
        .replace(' ', " +")
        .replace("INT", "[0-9]+")
        .replace("VALUE", r"(?:NAN %|-?[0-9.]+[%kMGTPEZY]?)");
    Regex::new(&format!("^{pattern}$")).unwrap()
}

static RE_FUNCTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    line_pattern(r"function (.*?) called (INT) returned (VALUE) blocks executed (VALUE)")
});
static RE_BRANCH_LINE: LazyLock<Regex> =
    LazyLock::new(|| line_pattern(r"branch (INT) (?:taken (VALUE)|never executed)(?: \((\w+)\))?"));
static RE_CALL_LINE: LazyLock<Regex> =
    LazyLock::new(|| line_pattern(r"call (INT) (?:returned (VALUE)|never executed)"));
static RE_UNCONDITIONAL_LINE: LazyLock<Regex> =
    LazyLock::new(|| line_pattern(r"unconditional (INT) (?:taken (VALUE)|never executed)"));
static RE_SOURCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| line_pattern(r"(?: )?(VALUE[*]?|-|[#]{5}|[=]{5}):(?: )?(INT):(.*)"));
static RE_BLOCK_LINE: LazyLock<Regex> =
    LazyLock::new(|| line_pattern(r"(?: )?(VALUE|[$]{5}|[%]{5}):(?: )?(INT)-block (INT)"));

/// Reverse gcov's number formatting.
///
/// Gcov formats either a percentage (`37.5%`, `NAN %`) or a count, which
/// may use SI units like `1.7k` when human-readable output is enabled.
/// Percentages destroy information: the original count cannot be
/// recovered, so any value above 0% maps to 1 and 0%/NaN maps to 0.
fn int_from_gcov_unit(formatted: &str, line: &str) -> std::result::Result<i64, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        value: formatted.to_string(),
        line: line.to_string(),
    };

    if let Some(percent) = formatted.strip_suffix('%') {
        let value: f64 = percent.trim().parse().map_err(|_| invalid())?;
        return Ok(if value > 0.0 { 1 } else { 0 });
    }

    for (exponent, unit) in "kMGTPEZY".chars().enumerate() {
        if let Some(mantissa) = formatted.strip_suffix(unit) {
            let value: f64 = mantissa.parse().map_err(|_| invalid())?;
            return Ok((value * 1000f64.powi(exponent as i32 + 1)) as i64);
        }
    }

    formatted.parse().map_err(|_| invalid())
}

/// Decode a gcov percentage into a float (used for `blocks executed`).
fn float_from_gcov_percent(formatted: &str, line: &str) -> std::result::Result<f64, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        value: formatted.to_string(),
        line: line.to_string(),
    };
    let percent = formatted.strip_suffix('%').ok_or_else(invalid)?;
    percent.trim().parse().map_err(|_| invalid())
}

/// Apply the negative/suspicious hit policy to a decoded count.
fn check_hits(
    hits: i64,
    line: &str,
    options: &ParserOptions,
    stats: &mut HitsStats,
) -> std::result::Result<u64, ParseError> {
    if hits < 0 {
        match options.negative_tolerance() {
            HitsTolerance::Abort => return Err(ParseError::NegativeHits(line.to_string())),
            HitsTolerance::Warn => warn!("Ignoring negative hits in line {line:?}."),
            HitsTolerance::WarnOncePerFile => {
                if stats.negative == 0 {
                    warn!("Ignoring negative hits in line {line:?}.");
                }
                stats.negative += 1;
            }
        }
        return Ok(0);
    }

    if hits as u64 >= SUSPICIOUS_COUNTER {
        match options.suspicious_tolerance() {
            HitsTolerance::Abort => return Err(ParseError::SuspiciousHits(line.to_string())),
            HitsTolerance::Warn => warn!("Ignoring suspicious hits in line {line:?}."),
            HitsTolerance::WarnOncePerFile => {
                if stats.suspicious == 0 {
                    warn!("Ignoring suspicious hits in line {line:?}.");
                }
                stats.suspicious += 1;
            }
        }
        return Ok(0);
    }

    Ok(hits as u64)
}

/// Categorize one raw line without further processing.
///
/// Recognition order matters: several patterns are prefixes of each other,
/// and specialization names can only be detected by elimination, so they
/// are checked last.
fn parse_line(
    line: &str,
    options: &ParserOptions,
    stats: &mut HitsStats,
) -> std::result::Result<LineToken, ParseError> {
    if let Some(tag) = parse_tag_line(line, options, stats)? {
        return Ok(tag);
    }

    // Handle lines that are like source lines. This could also include
    // metadata lines and block-coverage lines.
    //
    // Structure: "COUNT: LINENO:CODE"
    if let Some(captures) = RE_SOURCE_LINE.captures(line) {
        let hits_str = &captures[1];
        let lineno_str = &captures[2];
        let source_code = &captures[3];

        // METADATA (key, value)
        if hits_str == "-" && lineno_str == "0" {
            return Ok(match source_code.split_once(':') {
                Some((key, value)) => LineToken::Metadata {
                    key: key.to_string(),
                    value: Some(value.trim().to_string()),
                },
                // Synthetic metadata with no value
                None => LineToken::Metadata {
                    key: source_code.to_string(),
                    value: None,
                },
            });
        }

        let lineno = parse_int(lineno_str, line)?;
        let (hits, extra_info) = match hits_str {
            "-" => (0, ExtraInfo::Noncode),
            "#####" => (0, ExtraInfo::None),
            "=====" => (0, ExtraInfo::ExceptionOnly),
            _ => match hits_str.strip_suffix('*') {
                Some(value) => (int_from_gcov_unit(value, line)?, ExtraInfo::Partial),
                None => (int_from_gcov_unit(hits_str, line)?, ExtraInfo::None),
            },
        };
        let hits = check_hits(hits, line, options, stats)?;

        return Ok(LineToken::Source {
            hits,
            lineno,
            source_code: source_code.to_string(),
            extra_info,
        });
    }

    // BLOCK
    //
    // Structure: "COUNT: LINENO-block BLOCKNO"
    if line.contains("-block ") {
        if let Some(captures) = RE_BLOCK_LINE.captures(line) {
            // "%%%%%" is an ordinary zero count, "$$$$$" is zero through
            // exception-only paths; both decode to zero.
            let hits = match &captures[1] {
                "%%%%%" | "$$$$$" => 0,
                value => int_from_gcov_unit(value, line)?,
            };
            check_hits(hits, line, options, stats)?;

            return Ok(LineToken::Block {
                lineno: parse_int(&captures[2], line)?,
                blockno: parse_int(&captures[3], line)?,
            });
        }
    }

    // SPECIALIZATION NAME
    //
    // Structure: a name starting in the first column, ending with a ":".
    // It is not safe to make further assumptions about the layout of the
    // (demangled) identifier, e.g. Rust produces "<X as Y>::foo::h12345",
    // so this line type is checked LAST.
    if line.len() > 2 && !line.starts_with(char::is_whitespace) && line.ends_with(':') {
        return Ok(LineToken::SpecializationName {
            name: line[..line.len() - 1].to_string(),
        });
    }

    Err(ParseError::UnknownLineType(line.to_string()))
}

/// A tag line is any gcov line that starts with a fixed keyword in the
/// first column. Malformed tag-looking lines fall through to be treated
/// as general source/metadata lines rather than erroring immediately.
fn parse_tag_line(
    line: &str,
    options: &ParserOptions,
    stats: &mut HitsStats,
) -> std::result::Result<Option<LineToken>, ParseError> {
    // Tag lines never start with whitespace.
    //
    // In principle, specialization names are also like tag lines. But they
    // don't have a marker, so their detection is done last.
    if line.starts_with(' ') {
        return Ok(None);
    }

    // BRANCH
    //
    // Structure:
    // branch BRANCHNO never executed
    // branch BRANCHNO taken VALUE
    // branch BRANCHNO taken VALUE (ANNOTATION)
    if line.starts_with("branch ") {
        if let Some(captures) = RE_BRANCH_LINE.captures(line) {
            let hits = match captures.get(2) {
                Some(taken) => int_from_gcov_unit(taken.as_str(), line)?,
                None => 0,
            };
            let hits = check_hits(hits, line, options, stats)?;
            return Ok(Some(LineToken::Branch {
                branchno: parse_int(&captures[1], line)?,
                hits,
                annotation: captures.get(3).map(|m| m.as_str().to_string()),
            }));
        }
    }

    // CALL
    //
    // Structure (note whitespace after tag):
    // call  0 never executed
    // call  1 returned VALUE
    if line.starts_with("call ") {
        if let Some(captures) = RE_CALL_LINE.captures(line) {
            let returned = match captures.get(2) {
                Some(value) => int_from_gcov_unit(value.as_str(), line)?.max(0) as u64,
                None => 0,
            };
            return Ok(Some(LineToken::Call {
                callno: parse_int(&captures[1], line)?,
                returned,
            }));
        }
    }

    // UNCONDITIONAL
    //
    // Structure:
    // unconditional NUM taken VALUE
    // unconditional NUM never executed
    if line.starts_with("unconditional ") {
        if let Some(captures) = RE_UNCONDITIONAL_LINE.captures(line) {
            let hits = match captures.get(2) {
                Some(taken) => int_from_gcov_unit(taken.as_str(), line)?,
                None => 0,
            };
            let hits = check_hits(hits, line, options, stats)?;
            return Ok(Some(LineToken::Unconditional {
                branchno: parse_int(&captures[1], line)?,
                hits,
            }));
        }
    }

    // FUNCTION
    //
    // Structure:
    // function NAME called VALUE returned VALUE blocks executed VALUE
    if line.starts_with("function ") {
        if let Some(captures) = RE_FUNCTION_LINE.captures(line) {
            let count = check_hits(
                int_from_gcov_unit(&captures[2], line)?,
                line,
                options,
                stats,
            )?;
            return Ok(Some(LineToken::Function {
                name: captures[1].to_string(),
                count,
                blocks_covered: float_from_gcov_percent(&captures[4], line)?,
            }));
        }
    }

    // SPECIALIZATION MARKER
    //
    // Structure: literally just lots of hyphens
    if line.len() >= 5 && line.bytes().all(|b| b == b'-') {
        return Ok(Some(LineToken::SpecializationMarker));
    }

    Ok(None)
}

fn parse_int(digits: &str, line: &str) -> std::result::Result<u32, ParseError> {
    digits.parse().map_err(|_| ParseError::InvalidNumber {
        value: digits.to_string(),
        line: line.to_string(),
    })
}

/// Collect the header/metadata lines from a gcov report.
///
/// Stops at the first line that is not metadata. The `Source` key is
/// mandatory: it names the source file the report describes.
pub fn parse_metadata(
    data_filename: &str,
    lines: &[&str],
) -> Result<BTreeMap<String, Option<String>>> {
    let options = ParserOptions::default();
    let mut stats = HitsStats::default();
    let mut collected = BTreeMap::new();

    // Empty lines shouldn't occur in reality, but are common in testing.
    for line in lines.iter().filter(|line| !line.is_empty()) {
        let token = parse_line(line, &options, &mut stats).map_err(|source| {
            GcovrsError::Parse {
                filename: data_filename.to_string(),
                source,
            }
        })?;

        match token {
            LineToken::Metadata { key, value } => {
                collected.insert(key, value);
            }
            _ => break, // stop at the first line that is not metadata
        }
    }

    if !collected.contains_key("Source") {
        return Err(GcovrsError::MissingSourceKey(data_filename.to_string()));
    }

    Ok(collected)
}

/// State carried between tokens by the coverage state machine.
#[derive(Debug, Default)]
struct ParserState {
    /// Function announcements not yet attached to a source line. The tool
    /// emits `function ...` tags *before* the line they describe, so
    /// attachment is deferred one token.
    deferred_functions: Vec<DeferredFunction>,
    /// Last seen source line number.
    lineno: u32,
    /// Last seen block id, for associating branches to compiler blocks.
    blockno: Option<u32>,
    /// After any per-line error the parser degrades to "skip until the
    /// next source line" to bound the fallout of one bad line.
    is_recovering: bool,
}

#[derive(Debug)]
struct DeferredFunction {
    name: String,
    count: u64,
    blocks_covered: f64,
}

/// Extract coverage data from a gcov report.
///
/// `lines` are the report lines (excluding newlines); `filename` is the
/// source file the report describes (from the `Source` metadata key).
///
/// Returns the coverage data and the source code text reconstructed from
/// the report's source tokens (consumed by the exclusion and decision
/// passes).
///
/// Parse problems are collected and reported in one batch at end of file,
/// then escalated as the first collected error unless
/// `options.ignore_parse_errors` is set.
pub fn parse_coverage(
    lines: &[&str],
    filename: &str,
    options: &ParserOptions,
) -> Result<(FileCoverage, Vec<String>)> {
    let mut lines_with_errors: Vec<(String, GcovrsError)> = Vec::new();
    let mut tokenized_lines: Vec<(LineToken, &str)> = Vec::new();
    let mut stats = HitsStats::default();

    // Empty lines shouldn't occur in reality, but are common in testing.
    for raw_line in lines.iter().filter(|line| !line.is_empty()) {
        match parse_line(raw_line, options, &mut stats) {
            Ok(token) => tokenized_lines.push((token, raw_line)),
            Err(source) => lines_with_errors.push((
                raw_line.to_string(),
                GcovrsError::Parse {
                    filename: filename.to_string(),
                    source,
                },
            )),
        }
    }

    stats.report_aggregates(options);

    let mut filecov = FileCoverage::new(filename.to_string());
    let mut state = ParserState::default();
    for (token, raw_line) in &tokenized_lines {
        if let Err(error) = gather_coverage_from_line(&mut state, token, raw_line, &mut filecov) {
            lines_with_errors.push((raw_line.to_string(), error));
            state = ParserState {
                is_recovering: true,
                ..ParserState::default()
            };
        }
    }

    // Clean up the final state. This shouldn't happen, but the last line
    // could theoretically contain pending function tags.
    let final_lineno = state.lineno + 1;
    for function in state.deferred_functions.drain(..) {
        insert_function_coverage(
            &mut filecov,
            FunctionCoverage::new(
                Some(function.name),
                None,
                final_lineno,
                function.count,
                function.blocks_covered,
            ),
            &MergeOptions::function_max_line(),
        )?;
    }

    report_lines_with_errors(lines_with_errors, filename, options)?;

    let src_lines = reconstruct_source_code(tokenized_lines.iter().map(|(token, _)| token));

    Ok((filecov, src_lines))
}

/// Interpret one token, updating the coverage and transitioning the state.
fn gather_coverage_from_line(
    state: &mut ParserState,
    token: &LineToken,
    raw_line: &str,
    filecov: &mut FileCoverage,
) -> Result<()> {
    match token {
        LineToken::Source {
            hits,
            lineno,
            source_code,
            extra_info,
        } => {
            let is_noncode = *extra_info == ExtraInfo::Noncode;

            if !is_noncode {
                insert_line_coverage(
                    filecov,
                    LineCoverage::new(
                        *lineno,
                        *hits,
                        Some(format!("{:x}", md5::compute(source_code.as_bytes()))),
                    ),
                )?;
            }

            // Attach deferred function tags to this line, not the line
            // where the tool printed them.
            for function in state.deferred_functions.drain(..) {
                insert_function_coverage(
                    filecov,
                    FunctionCoverage::new(
                        Some(function.name),
                        None,
                        *lineno,
                        function.count,
                        function.blocks_covered,
                    ),
                    &MergeOptions::function_max_line(),
                )?;
            }

            state.lineno = *lineno;
            state.is_recovering = false;
            Ok(())
        }

        // Skip until the next source line resynchronizes the parser.
        _ if state.is_recovering => Ok(()),

        LineToken::Function {
            name,
            count,
            blocks_covered,
        } => {
            // Defer handling of the function tag until the next source
            // line. This is important to get correct line numbers.
            state.deferred_functions.push(DeferredFunction {
                name: name.clone(),
                count: *count,
                blocks_covered: *blocks_covered,
            });
            Ok(())
        }

        LineToken::Branch {
            branchno,
            hits,
            annotation,
        } => {
            // The line won't exist if it was considered noncode; such
            // branches have nothing to attach to and are dropped.
            if let Some(linecov) = filecov.lines.get_mut(&state.lineno) {
                insert_branch_coverage(
                    linecov,
                    *branchno,
                    BranchCoverage {
                        count: *hits,
                        fallthrough: annotation.as_deref() == Some("fallthrough"),
                        throw: annotation.as_deref() == Some("throw"),
                        excluded: false,
                        destination_blockno: state.blockno,
                    },
                )?;
            }
            Ok(())
        }

        LineToken::Call { callno, returned } => {
            // The current line must already exist here; a miss is an
            // invariant violation, not a recoverable user error.
            let filename = filecov.filename.clone();
            let linecov = filecov.lines.get_mut(&state.lineno).ok_or_else(|| {
                GcovrsError::Parse {
                    filename,
                    source: ParseError::MissingLine(raw_line.to_string()),
                }
            })?;
            insert_call_coverage(
                linecov,
                CallCoverage {
                    callno: *callno,
                    covered: *returned > 0,
                },
            )?;
            Ok(())
        }

        LineToken::Block { lineno, blockno } => {
            state.blockno = Some(*blockno);
            if let Some(linecov) = filecov.lines.get_mut(lineno) {
                if !linecov.block_ids.contains(blockno) {
                    linecov.block_ids.push(*blockno);
                }
            }
            Ok(())
        }

        // No model mutation for the remaining token kinds.
        LineToken::Metadata { .. }
        | LineToken::SpecializationMarker
        | LineToken::SpecializationName { .. }
        | LineToken::Unconditional { .. } => Ok(()),
    }
}

/// Log collected problems and decide once whether to escalate.
fn report_lines_with_errors(
    mut lines_with_errors: Vec<(String, GcovrsError)>,
    filename: &str,
    options: &ParserOptions,
) -> Result<()> {
    if lines_with_errors.is_empty() {
        return Ok(());
    }

    let lines_output = lines_with_errors
        .iter()
        .map(|(line, _)| line.as_str())
        .collect::<Vec<_>>()
        .join("\n\t  ");
    warn!(
        "Unrecognized gcov output for {filename}\n\t  {lines_output}\n\
         \tThis is indicative of a gcov output parse error."
    );

    for (_, error) in &lines_with_errors {
        warn!("Exception during parsing:\n\t{error}");
    }

    if options.ignore_parse_errors {
        return Ok(());
    }

    // Escalate the first collected error so the caller can decide whether
    // to abort the whole run.
    let (_, first_error) = lines_with_errors.swap_remove(0);
    Err(first_error)
}

/// Rebuild the source text from the report's source tokens. Gaps stay
/// empty.
fn reconstruct_source_code<'a>(tokens: impl Iterator<Item = &'a LineToken>) -> Vec<String> {
    let source_tokens: Vec<(u32, &str)> = tokens
        .filter_map(|token| match token {
            LineToken::Source {
                lineno,
                source_code,
                ..
            } => Some((*lineno, source_code.as_str())),
            _ => None,
        })
        .collect();

    let max_lineno = source_tokens.iter().map(|(n, _)| *n).max().unwrap_or(0);
    let mut src_lines = vec![String::new(); max_lineno as usize];
    for (lineno, source_code) in source_tokens {
        src_lines[lineno as usize - 1] = source_code.to_string();
    }

    src_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> std::result::Result<LineToken, ParseError> {
        parse_line(line, &ParserOptions::default(), &mut HitsStats::default())
    }

    fn parse_ignoring(line: &str, options: &ParserOptions) -> LineToken {
        parse_line(line, options, &mut HitsStats::default()).unwrap()
    }

    fn source(hits: u64, lineno: u32, code: &str, extra_info: ExtraInfo) -> LineToken {
        LineToken::Source {
            hits,
            lineno,
            source_code: code.to_string(),
            extra_info,
        }
    }

    #[test]
    fn test_int_from_gcov_unit() {
        assert_eq!(int_from_gcov_unit("123", "").unwrap(), 123);
        assert_eq!(int_from_gcov_unit("-1.2k", "").unwrap(), -1200);
        assert_eq!(int_from_gcov_unit("NAN %", "").unwrap(), 0);
        assert_eq!(int_from_gcov_unit("17.2%", "").unwrap(), 1);
        assert_eq!(int_from_gcov_unit("0%", "").unwrap(), 0);
        assert_eq!(int_from_gcov_unit("1.7k", "").unwrap(), 1700);
        assert_eq!(int_from_gcov_unit("0.5G", "").unwrap(), 500_000_000);
    }

    #[test]
    fn test_float_from_gcov_percent() {
        assert_eq!(float_from_gcov_percent("17.2%", "").unwrap(), 17.2);
        assert_eq!(float_from_gcov_percent("0%", "").unwrap(), 0.0);
        assert!(float_from_gcov_percent("NAN %", "").unwrap().is_nan());
        assert!(float_from_gcov_percent("17", "").is_err());
    }

    #[test]
    fn test_parse_source_lines() {
        assert_eq!(
            parse("     -: 13:struct Foo{};").unwrap(),
            source(0, 13, "struct Foo{};", ExtraInfo::Noncode)
        );
        assert_eq!(
            parse("    12: 13:foo += 1;  ").unwrap(),
            source(12, 13, "foo += 1;  ", ExtraInfo::None)
        );
        assert_eq!(
            parse(" #####: 13:foo += 1;").unwrap(),
            source(0, 13, "foo += 1;", ExtraInfo::None)
        );
        // No space between count and a large line number.
        assert_eq!(
            parse(" #####:10000:foo += 1;").unwrap(),
            source(0, 10000, "foo += 1;", ExtraInfo::None)
        );
        assert_eq!(
            parse(" =====: 13:foo += 1;").unwrap(),
            source(0, 13, "foo += 1;", ExtraInfo::ExceptionOnly)
        );
        assert_eq!(
            parse("   12*: 13:cond ? f() : g();").unwrap(),
            source(12, 13, "cond ? f() : g();", ExtraInfo::Partial)
        );
        assert_eq!(
            parse(" 1.7k*: 13:foo();").unwrap(),
            source(1700, 13, "foo();", ExtraInfo::Partial)
        );
    }

    #[test]
    fn test_parse_metadata_lines() {
        assert_eq!(
            parse("  -: 0:Foo:bar baz").unwrap(),
            LineToken::Metadata {
                key: "Foo".to_string(),
                value: Some("bar baz".to_string())
            }
        );
        assert_eq!(
            parse("  -: 0:Key").unwrap(),
            LineToken::Metadata {
                key: "Key".to_string(),
                value: None
            }
        );
    }

    #[test]
    fn test_parse_branch_tags() {
        assert_eq!(
            parse("branch 3 taken 15%").unwrap(),
            LineToken::Branch {
                branchno: 3,
                hits: 1,
                annotation: None
            }
        );
        assert_eq!(
            parse("branch 3 taken 123").unwrap(),
            LineToken::Branch {
                branchno: 3,
                hits: 123,
                annotation: None
            }
        );
        assert_eq!(
            parse("branch 7 taken 3% (fallthrough)").unwrap(),
            LineToken::Branch {
                branchno: 7,
                hits: 1,
                annotation: Some("fallthrough".to_string())
            }
        );
        assert_eq!(
            parse("branch 17 taken 99% (throw)").unwrap(),
            LineToken::Branch {
                branchno: 17,
                hits: 1,
                annotation: Some("throw".to_string())
            }
        );
        assert_eq!(
            parse("branch  0 never executed").unwrap(),
            LineToken::Branch {
                branchno: 0,
                hits: 0,
                annotation: None
            }
        );
        assert!(matches!(
            parse("branch 2 with some unknown format"),
            Err(ParseError::UnknownLineType(_))
        ));
    }

    #[test]
    fn test_parse_negative_and_suspicious_hits() {
        assert!(matches!(
            parse("branch 3 taken -1"),
            Err(ParseError::NegativeHits(_))
        ));
        assert!(matches!(
            parse("branch 3 taken 4294967296"),
            Err(ParseError::SuspiciousHits(_))
        ));

        let negative_ok = ParserOptions {
            negative_hits: HitsTolerance::Warn,
            ..ParserOptions::default()
        };
        assert_eq!(
            parse_ignoring("branch 3 taken -1", &negative_ok),
            LineToken::Branch {
                branchno: 3,
                hits: 0,
                annotation: None
            }
        );

        let suspicious_ok = ParserOptions {
            suspicious_hits: HitsTolerance::Warn,
            ..ParserOptions::default()
        };
        assert_eq!(
            parse_ignoring("branch 3 taken 4294967296", &suspicious_ok),
            LineToken::Branch {
                branchno: 3,
                hits: 0,
                annotation: None
            }
        );
    }

    #[test]
    fn test_parse_call_tags() {
        assert_eq!(
            parse("call  0 never executed").unwrap(),
            LineToken::Call {
                callno: 0,
                returned: 0
            }
        );
        assert_eq!(
            parse("call  17 returned 50%").unwrap(),
            LineToken::Call {
                callno: 17,
                returned: 1
            }
        );
        assert_eq!(
            parse("call  17 returned 9").unwrap(),
            LineToken::Call {
                callno: 17,
                returned: 9
            }
        );
    }

    #[test]
    fn test_parse_unconditional_tags() {
        assert_eq!(
            parse("unconditional 1 taken 17").unwrap(),
            LineToken::Unconditional {
                branchno: 1,
                hits: 17
            }
        );
        assert_eq!(
            parse("unconditional 3 never executed").unwrap(),
            LineToken::Unconditional {
                branchno: 3,
                hits: 0
            }
        );
        assert!(matches!(
            parse("unconditional with some unknown format"),
            Err(ParseError::UnknownLineType(_))
        ));
    }

    #[test]
    fn test_parse_function_tags() {
        let expected = LineToken::Function {
            name: "foo".to_string(),
            count: 2,
            blocks_covered: 85.0,
        };
        assert_eq!(
            parse("function foo called 2 returned 1 blocks executed 85%").unwrap(),
            expected
        );
        assert_eq!(
            parse("function foo called 2 returned 50% blocks executed 85%").unwrap(),
            expected
        );
        assert!(matches!(
            parse("function foo with some unknown format"),
            Err(ParseError::UnknownLineType(_))
        ));
    }

    #[test]
    fn test_parse_specialization_marker_and_name() {
        assert_eq!(
            parse("------------------").unwrap(),
            LineToken::SpecializationMarker
        );
        assert_eq!(
            parse("Foo<bar>::baz():").unwrap(),
            LineToken::SpecializationName {
                name: "Foo<bar>::baz()".to_string()
            }
        );
        assert!(matches!(
            parse(" foo:"),
            Err(ParseError::UnknownLineType(_))
        ));
        assert!(matches!(parse(":"), Err(ParseError::UnknownLineType(_))));
    }

    #[test]
    fn test_parse_block_lines() {
        assert_eq!(
            parse("     1: 32-block  0").unwrap(),
            LineToken::Block {
                lineno: 32,
                blockno: 0
            }
        );
        assert_eq!(
            parse(" %%%%%: 33-block  1").unwrap(),
            LineToken::Block {
                lineno: 33,
                blockno: 1
            }
        );
        assert_eq!(
            parse(" $$$$$: 33-block  1").unwrap(),
            LineToken::Block {
                lineno: 33,
                blockno: 1
            }
        );
        assert!(matches!(
            parse("     -1: 32-block  0"),
            Err(ParseError::NegativeHits(_))
        ));
        assert!(matches!(
            parse("     1: 9-block with some unknown format"),
            Err(ParseError::UnknownLineType(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse("nonexistent_tag foo bar"),
            Err(ParseError::UnknownLineType(_))
        ));
    }

    #[test]
    fn test_parse_metadata() {
        let lines = vec![
            "        -:    0:Source:foo.cpp",
            "        -:    0:Runs:1",
            "        -:    0:Key",
        ];
        let metadata = parse_metadata("foo.gcov", &lines).unwrap();
        assert_eq!(
            metadata.get("Source"),
            Some(&Some("foo.cpp".to_string()))
        );
        assert_eq!(metadata.get("Runs"), Some(&Some("1".to_string())));
        assert_eq!(metadata.get("Key"), Some(&None));
    }

    #[test]
    fn test_parse_metadata_missing_source() {
        let lines = vec!["        -:    0:Foo:bar"];
        assert!(matches!(
            parse_metadata("foo.gcov", &lines),
            Err(GcovrsError::MissingSourceKey(_))
        ));
    }

    #[test]
    fn test_parse_coverage_attaches_deferred_functions() {
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "function main called 1 returned 100% blocks executed 80%",
            "        1:    3:int main() {",
            "        1:    4:  return 0;",
        ];
        let (filecov, _) =
            parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();

        let func = filecov.functions.get("main").unwrap();
        // Attached to the line following the tag, not the tag's position.
        assert_eq!(func.count.get(&3), Some(&1));
    }

    #[test]
    fn test_parse_coverage_branches_and_blocks() {
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "        5:    7:if (x) {",
            "        5:    7-block  2",
            "branch  0 taken 3 (fallthrough)",
            "branch  1 taken 2 (throw)",
            "branch  2 never executed",
        ];
        let (filecov, _) =
            parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();

        let line = filecov.lines.get(&7).unwrap();
        assert_eq!(line.block_ids, vec![2]);
        assert_eq!(line.branches.len(), 3);
        assert!(line.branches[&0].fallthrough);
        assert_eq!(line.branches[&0].count, 3);
        assert_eq!(line.branches[&0].destination_blockno, Some(2));
        assert!(line.branches[&1].throw);
        assert_eq!(line.branches[&2].count, 0);
    }

    #[test]
    fn test_parse_coverage_drops_branches_on_noncode_lines() {
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "        -:    9:}",
            "branch  0 taken 3",
        ];
        let (filecov, _) =
            parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();
        assert!(filecov.lines.is_empty());
    }

    #[test]
    fn test_parse_coverage_reconstructs_source() {
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "        1:    2:foo();",
            "    #####:    4:bar();",
        ];
        let (_, src_lines) =
            parse_coverage(&lines, "tmp.cpp", &ParserOptions::default()).unwrap();
        assert_eq!(src_lines, vec!["", "foo();", "", "bar();"]);
    }

    #[test]
    fn test_parse_coverage_escalates_first_error() {
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "        1:    2:foo();",
            "this is not a gcov line",
        ];
        let result = parse_coverage(&lines, "tmp.cpp", &ParserOptions::default());
        assert!(matches!(
            result,
            Err(GcovrsError::Parse {
                source: ParseError::UnknownLineType(_),
                ..
            })
        ));
    }

    #[test]
    fn test_parse_coverage_tolerates_unknown_lines() {
        let options = ParserOptions {
            ignore_parse_errors: true,
            ..ParserOptions::default()
        };
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "        1:    2:foo();",
            "this is not a gcov line",
            "branch  0 taken 5",
            "        3:    4:baz();",
        ];
        let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &options).unwrap();

        // The bad line is dropped at tokenization; every surrounding valid
        // line is recorded, and the branch still attaches to line 2.
        assert_eq!(filecov.lines[&2].count, 1);
        assert_eq!(filecov.lines[&4].count, 3);
        assert_eq!(filecov.lines[&2].branches[&0].count, 5);
    }

    #[test]
    fn test_parse_coverage_recovers_after_invariant_violation() {
        let options = ParserOptions {
            ignore_parse_errors: true,
            ..ParserOptions::default()
        };
        // A call tag with no current line is an invariant violation; the
        // parser must skip until the next source line resynchronizes it.
        let lines = vec![
            "        -:    0:Source:tmp.cpp",
            "call  0 returned 5",
            "branch  0 taken 5",
            "        3:    4:baz();",
        ];
        let (filecov, _) = parse_coverage(&lines, "tmp.cpp", &options).unwrap();

        assert_eq!(filecov.lines.len(), 1);
        assert_eq!(filecov.lines[&4].count, 3);
        assert!(filecov.lines[&4].branches.is_empty());
    }
}
