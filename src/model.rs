//! Uniform in-memory representation of gcov coverage data. The parser
//! populates a `FileCoverage` per source file; the merge algebra combines
//! instances from repeated runs; the exclusion passes mutate them in place.

use std::collections::{BTreeMap, BTreeSet};

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A single branch arm on a line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchCoverage {
    pub count: u64,
    pub fallthrough: bool,
    /// Branch belongs to exception-unwinding code.
    pub throw: bool,
    pub excluded: bool,
    /// Compiler block the branch flows into, when block output was enabled.
    pub destination_blockno: Option<u32>,
}

impl BranchCoverage {
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !self.excluded
    }

    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.is_reportable() && self.count > 0
    }
}

/// A function call site on a line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallCoverage {
    pub callno: u32,
    pub covered: bool,
}

/// Condition (MC/DC) coverage for a line.
///
/// `not_covered_true`/`not_covered_false` hold the indices of
/// sub-conditions that were never observed true/false respectively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionCoverage {
    /// Total number of sub-conditions. Structural, must agree across runs.
    pub count: u64,
    pub covered: u64,
    pub not_covered_true: BTreeSet<u32>,
    pub not_covered_false: BTreeSet<u32>,
}

/// Inferred outcome coverage of a control-flow decision.
///
/// Together with `Option::None` ("no known decision") these form the merge
/// lattice: `None` is the identity, `Uncheckable` is absorbing, and
/// mismatched concrete variants degrade to `Uncheckable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionCoverage {
    /// There was a decision, but it cannot be analyzed reliably.
    Uncheckable,
    Conditional { count_true: u64, count_false: u64 },
    Switch { count: u64 },
}

/// A function/method, possibly merged from multiple instantiation sites.
///
/// `count`, `blocks` and `excluded` are keyed by line number so a function
/// observed at several source positions keeps one entry per distinct line
/// unless a collapsing merge mode is active.
#[derive(Debug, Clone, Default)]
pub struct FunctionCoverage {
    /// Mangled name, if the compiler emitted one.
    pub name: Option<String>,
    pub demangled_name: Option<String>,
    pub count: BTreeMap<u32, u64>,
    /// Percentage of the function's blocks that were executed.
    pub blocks: BTreeMap<u32, f64>,
    pub excluded: BTreeMap<u32, bool>,
    /// Start position `(line, column)` per instantiation site, when the
    /// compiler supplied position metadata.
    pub start: Option<BTreeMap<u32, (u32, u32)>>,
    pub end: Option<BTreeMap<u32, (u32, u32)>>,
}

impl FunctionCoverage {
    pub fn new(
        name: Option<String>,
        demangled_name: Option<String>,
        lineno: u32,
        count: u64,
        blocks: f64,
    ) -> Self {
        Self {
            name,
            demangled_name,
            count: BTreeMap::from([(lineno, count)]),
            blocks: BTreeMap::from([(lineno, blocks)]),
            excluded: BTreeMap::from([(lineno, false)]),
            start: None,
            end: None,
        }
    }

    /// The key under which this function is stored: mangled name when
    /// available, demangled name otherwise.
    #[must_use]
    pub fn key(&self) -> &str {
        self.name
            .as_deref()
            .or(self.demangled_name.as_deref())
            .unwrap_or("")
    }

    /// Best human-readable name for diagnostics.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.demangled_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }
}

/// A single line that was instrumentable.
#[derive(Debug, Clone, Default)]
pub struct LineCoverage {
    pub lineno: u32,
    /// Accumulated execution count.
    pub count: u64,
    pub excluded: bool,
    /// Line carries no executable semantics and must not contribute to
    /// totals, but is still listed.
    pub noncode: bool,
    /// Checksum of the source text, used to detect drift across merges.
    pub md5: Option<String>,
    /// Compiler block ids observed for this line.
    pub block_ids: Vec<u32>,
    pub branches: BTreeMap<u32, BranchCoverage>,
    pub conditions: BTreeMap<u32, ConditionCoverage>,
    pub calls: BTreeMap<u32, CallCoverage>,
    pub decision: Option<DecisionCoverage>,
}

impl LineCoverage {
    pub fn new(lineno: u32, count: u64, md5: Option<String>) -> Self {
        Self {
            lineno,
            count,
            md5,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !self.noncode
    }

    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.is_reportable() && !self.excluded && self.count > 0
    }

    #[must_use]
    pub fn is_uncovered(&self) -> bool {
        self.is_reportable() && !self.excluded && self.count == 0
    }

    #[must_use]
    pub fn has_reportable_branches(&self) -> bool {
        self.branches.values().any(BranchCoverage::is_reportable)
    }

    /// Zero out this line and everything hanging off it, keeping the line
    /// listed as excluded.
    pub fn exclude(&mut self) {
        self.excluded = true;
        self.count = 0;
        self.branches.clear();
        self.conditions.clear();
        self.calls.clear();
        self.decision = None;
    }
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, Default)]
pub struct FileCoverage {
    pub filename: String,
    pub lines: BTreeMap<u32, LineCoverage>,
    pub functions: BTreeMap<String, FunctionCoverage>,
}

impl FileCoverage {
    pub fn new(filename: String) -> Self {
        Self {
            filename,
            ..Default::default()
        }
    }
}

/// The complete result of one run: all parsed files, keyed by filename.
#[derive(Debug, Clone, Default)]
pub struct CovData {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CovData {
    pub fn new() -> Self {
        Self::default()
    }
}
