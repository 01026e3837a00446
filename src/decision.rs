//! Infer decision (if/else, switch-case) coverage from branch coverage
//! using source-text heuristics, since gcov does not directly report
//! decision outcomes.
//!
//! The analysis is a best-effort pass: anything it cannot attribute
//! reliably becomes `DecisionCoverage::Uncheckable` rather than a wrong
//! number. It runs after exclusion processing, which always clears any
//! previously computed decision.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{GcovrsError, Result};
use crate::model::{DecisionCoverage, FileCoverage};

static CHARACTERS_TO_ADD_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([;:\(\)\{\}])").unwrap());
static C_STYLE_COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*.*?\*/").unwrap());
static CPP_STYLE_COMMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"//.*").unwrap());
static WHITESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ONE_LINE_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^;]+\{(?:[^;]+;)*.*\}$").unwrap());

/// Prepare a source line for analysis: pad punctuation with spaces so
/// keywords can be matched without colliding with identifiers, strip
/// comments, and collapse whitespace.
fn prepare_decision_string(code: &str) -> String {
    let code = CHARACTERS_TO_ADD_SPACES.replace_all(code, " $1 ");
    let code = CPP_STYLE_COMMENT_PATTERN.replace_all(&code, " ");
    let code = C_STYLE_COMMENT_PATTERN.replace_all(&code, " ");
    let code = WHITESPACE_PATTERN.replace_all(&code, " ");
    format!(" {}", code.trim())
}

fn get_delta_braces(code: &str) -> i64 {
    let prepared = prepare_decision_string(code);
    prepared.matches('(').count() as i64 - prepared.matches(')').count() as i64
}

/// Whether the line of code is a branch statement.
fn is_a_branch_statement(code: &str) -> bool {
    let prepared = prepare_decision_string(code);
    [" if (", "; if (", " case ", "; case ", " default :", "; default :"]
        .iter()
        .any(|keyword| prepared.contains(keyword))
}

/// Whether the line is a branch statement whose code block is closed on
/// the same line, e.g. `if(a>5){a = 0;}`.
fn is_a_oneline_branch(code: &str) -> bool {
    ONE_LINE_BRANCH.is_match(&prepare_decision_string(code))
}

/// Whether the line is a branch whose condition is closed on the same
/// line while the body is not, e.g. `while (a>5) {`.
fn is_a_closed_branch(code: &str) -> bool {
    let prepared = prepare_decision_string(code);
    if (is_a_branch_statement(&prepared) || is_a_loop(&prepared))
        && !is_a_oneline_branch(&prepared)
    {
        get_delta_braces(&prepared) == 0
    } else {
        false
    }
}

/// Whether the line of code is a loop statement.
fn is_a_loop(code: &str) -> bool {
    let prepared = prepare_decision_string(code);
    [" while (", "} while (", " for ", " for ("]
        .iter()
        .any(|keyword| prepared.contains(keyword))
}

/// Whether the line relates to a switch-case label.
fn is_a_switch(code: &str) -> bool {
    let prepared = prepare_decision_string(code);
    [" case ", " default :"]
        .iter()
        .any(|keyword| prepared.contains(keyword))
}

/// Parses the decisions of one source file.
pub struct DecisionParser<'a> {
    filecov: &'a mut FileCoverage,
    lines: &'a [String],
    /// True once we're in the process of analyzing a multi-line branch.
    active: bool,
    last_decision_line: u32,
    open_brackets: i64,
}

impl<'a> DecisionParser<'a> {
    pub fn new(filecov: &'a mut FileCoverage, lines: &'a [String]) -> Self {
        Self {
            filecov,
            lines,
            active: false,
            last_decision_line: 0,
            open_brackets: 0,
        }
    }

    /// Parse the decisions of the file.
    pub fn parse_all_lines(mut self) -> Result<()> {
        debug!("Starting the decision analysis");
        let lines = self.lines;
        for (index, code) in lines.iter().enumerate() {
            self.parse_one_line(index as u32 + 1, code)?;
        }
        debug!("Decision analysis finished");
        Ok(())
    }

    fn parse_one_line(&mut self, lineno: u32, code: &str) -> Result<()> {
        let has_linecov = self.filecov.lines.contains_key(&lineno);
        if !has_linecov && !is_a_switch(code) {
            return Ok(());
        }

        // Check if an analysis for a classic if-/else-if-branch is active.
        if self.active {
            self.continue_multiline_decision_analysis(lineno, code)?;
        }
        if self.active {
            return Ok(());
        }

        if !(is_a_branch_statement(code) || is_a_loop(code)) {
            return Ok(());
        }

        let branch_counts: Vec<u64> = self
            .filecov
            .lines
            .get(&lineno)
            .map(|linecov| linecov.branches.values().map(|branch| branch.count).collect())
            .unwrap_or_default();

        if !branch_counts.is_empty() {
            // A branch exists, which prevents misdetection caused by
            // inaccurate parsing of the source text.
            if is_a_loop(code)
                || is_a_oneline_branch(code)
                || (is_a_closed_branch(code) && branch_counts.len() == 2)
            {
                let decision = if branch_counts.len() == 2 {
                    // Compact decision: fall back to the two branch
                    // counts directly.
                    DecisionCoverage::Conditional {
                        count_true: branch_counts[0],
                        count_false: branch_counts[1],
                    }
                } else {
                    // A complex decision with more than 2 branches; no
                    // accurate detection possible.
                    debug!("Uncheckable decision at line {lineno}");
                    DecisionCoverage::Uncheckable
                };
                if let Some(linecov) = self.filecov.lines.get_mut(&lineno) {
                    linecov.decision = Some(decision);
                }
            } else {
                self.start_multiline_decision_analysis(lineno, code);
            }
        } else if is_a_switch(code) {
            // Case statements are measured at every line of the case, so
            // a branch definition isn't given. Attribute the coverage of
            // the next instrumented line before a break.
            let max_lineno = self
                .filecov
                .lines
                .keys()
                .max()
                .copied()
                .unwrap_or(0)
                .max(lineno + 1);

            for next_lineno in lineno..max_lineno {
                if let Some(linecov) = self.filecov.lines.get_mut(&next_lineno) {
                    linecov.decision = Some(DecisionCoverage::Switch {
                        count: linecov.count,
                    });
                    break;
                }
                if prepare_decision_string(code).contains(" break ;") {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handler for the start of a decision written over several lines.
    fn start_multiline_decision_analysis(&mut self, lineno: u32, code: &str) {
        self.active = true;
        self.last_decision_line = lineno;
        // Count brackets to make sure we're outside of the decision
        // expression before attributing body execution.
        self.open_brackets += get_delta_braces(code);
    }

    /// Handler for a decision which is continued on the current line.
    fn continue_multiline_decision_analysis(&mut self, lineno: u32, code: &str) -> Result<()> {
        let exec_count = self
            .filecov
            .lines
            .get(&lineno)
            .map_or(0, |linecov| linecov.count);

        if self.open_brackets == 0 {
            let last = self
                .filecov
                .lines
                .get_mut(&self.last_decision_line)
                .ok_or_else(|| {
                    GcovrsError::Other(
                        "sanity check failed: last decision must be present for \
                         multi-line analysis"
                            .to_string(),
                    )
                })?;

            // The true outcome is the body execution count; the false
            // outcome is the difference between executions of the
            // decision statement and its body.
            if last.count >= exec_count {
                last.decision = Some(DecisionCoverage::Conditional {
                    count_true: exec_count,
                    count_false: last.count - exec_count,
                });
            } else {
                last.decision = Some(DecisionCoverage::Uncheckable);
                debug!(
                    "Uncheckable decision at line {lineno} (delta = {})",
                    last.count as i64 - exec_count as i64
                );
            }

            self.active = false;
            self.open_brackets = 0;
        } else {
            // Track open/closed brackets until the condition is complete.
            self.open_brackets += get_delta_braces(code);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchCoverage, LineCoverage};

    fn branch(count: u64) -> BranchCoverage {
        BranchCoverage {
            count,
            ..BranchCoverage::default()
        }
    }

    #[test]
    fn test_prepare_decision_string() {
        assert_eq!(
            prepare_decision_string("   a++;if  (a > 5)  { // check for something "),
            " a++ ; if ( a > 5 ) {"
        );
        assert_eq!(prepare_decision_string("case x: // check"), " case x :");
        assert_eq!(prepare_decision_string("    default     : // check"), " default :");
        assert_eq!(prepare_decision_string("{/* Comment */"), " {");
        assert_eq!(prepare_decision_string("}/* Comment */"), " }");
    }

    #[test]
    fn test_is_a_oneline_branch() {
        assert!(is_a_oneline_branch("if(a>5){a = 0;}"));
        assert!(!is_a_oneline_branch("if(a>5){"));
    }

    #[test]
    fn test_is_a_closed_branch() {
        assert!(!is_a_closed_branch("if(a>5){a = 0;}"));
        assert!(is_a_closed_branch("if(a>5){ // A comment"));
        assert!(is_a_closed_branch("   while (a>5){ // A comment"));
        assert!(is_a_closed_branch("   while (a>5)"));
        assert!(!is_a_closed_branch("   while (a>5"));
    }

    #[test]
    fn test_is_a_loop() {
        assert!(is_a_loop("while(5 < a) {"));
        assert!(!is_a_loop("foo();"));
    }

    #[test]
    fn test_is_a_switch() {
        assert!(is_a_switch("case /* Comment */ 5 /* Comment */:"));
        assert!(is_a_switch("default /* Comment */ :"));
        assert!(!is_a_switch("foo();"));
    }

    #[test]
    fn test_compact_two_branch_decision() {
        let mut filecov = FileCoverage::new("a.cpp".to_string());
        let mut line = LineCoverage::new(1, 5, None);
        line.branches.insert(0, branch(3));
        line.branches.insert(1, branch(2));
        filecov.lines.insert(1, line);

        let lines = vec!["if (x) { y(); }".to_string()];
        DecisionParser::new(&mut filecov, &lines)
            .parse_all_lines()
            .unwrap();

        assert_eq!(
            filecov.lines[&1].decision,
            Some(DecisionCoverage::Conditional {
                count_true: 3,
                count_false: 2
            })
        );
    }

    #[test]
    fn test_complex_decision_is_uncheckable() {
        let mut filecov = FileCoverage::new("a.cpp".to_string());
        let mut line = LineCoverage::new(1, 5, None);
        for branchno in 0..4 {
            line.branches.insert(branchno, branch(1));
        }
        filecov.lines.insert(1, line);

        let lines = vec!["while (a && b) { f(); }".to_string()];
        DecisionParser::new(&mut filecov, &lines)
            .parse_all_lines()
            .unwrap();

        assert_eq!(
            filecov.lines[&1].decision,
            Some(DecisionCoverage::Uncheckable)
        );
    }

    #[test]
    fn test_multiline_decision_uses_body_count() {
        let mut filecov = FileCoverage::new("a.cpp".to_string());
        let mut decision_line = LineCoverage::new(1, 10, None);
        decision_line.branches.insert(0, branch(7));
        decision_line.branches.insert(1, branch(3));
        filecov.lines.insert(1, decision_line);
        filecov.lines.insert(2, LineCoverage::new(2, 10, None));
        filecov.lines.insert(3, LineCoverage::new(3, 7, None));

        // The condition spans two lines; the body count on line 3 gives
        // the true outcome, the delta to the decision line the false one.
        let lines = vec![
            "if (x &&".to_string(),
            "    y) {".to_string(),
            "  z();".to_string(),
        ];
        DecisionParser::new(&mut filecov, &lines)
            .parse_all_lines()
            .unwrap();

        assert_eq!(
            filecov.lines[&1].decision,
            Some(DecisionCoverage::Conditional {
                count_true: 7,
                count_false: 3
            })
        );
    }

    #[test]
    fn test_switch_case_attributes_next_line() {
        let mut filecov = FileCoverage::new("a.cpp".to_string());
        filecov.lines.insert(3, LineCoverage::new(3, 4, None));
        filecov.lines.insert(5, LineCoverage::new(5, 9, None));

        let lines = vec![
            "switch (x) {".to_string(),
            "case 1:".to_string(),
            "  handle();".to_string(),
        ];
        DecisionParser::new(&mut filecov, &lines)
            .parse_all_lines()
            .unwrap();

        assert_eq!(
            filecov.lines[&3].decision,
            Some(DecisionCoverage::Switch { count: 4 })
        );
    }
}
