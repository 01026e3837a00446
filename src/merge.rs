//! Merge coverage data.
//!
//! Every merge function has the signature `merge(left, right)`: it folds
//! `right` into `left`'s storage, consuming `right`. In a mathematical
//! sense the merges behave like an addition operator:
//!
//! * commutative: the order of the two arguments must not matter;
//! * associative: the order of merging must not matter;
//! * identity element: an absent entry acts as the empty element.
//!
//! The `insert_*` functions insert a single coverage item into a larger
//! structure, merging with any existing item under the same key.
//!
//! Structural mismatches (different filename, line number, checksum,
//! function identity, condition arity) are [`GcovrsError::MergeAssertion`]
//! errors: the inputs do not describe the same program, and silently
//! proceeding would corrupt the coverage model.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{GcovrsError, Result};
use crate::model::{
    BranchCoverage, CallCoverage, ConditionCoverage, CovData, DecisionCoverage, FileCoverage,
    FunctionCoverage, LineCoverage,
};

/// How to resolve function observations at differing line numbers, e.g.
/// template instantiations or inconsistent compiler output across builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FunctionMergeMode {
    /// Line numbers must match (the default).
    #[default]
    Strict,
    /// Collapse all observations onto line 0.
    UseLineZero,
    /// Collapse all observations onto the minimum observed line.
    UseLineMin,
    /// Collapse all observations onto the maximum observed line.
    UseLineMax,
    /// Keep one entry per distinct line number.
    Separate,
}

impl std::str::FromStr for FunctionMergeMode {
    type Err = GcovrsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "merge-use-line-0" => Ok(Self::UseLineZero),
            "merge-use-line-min" => Ok(Self::UseLineMin),
            "merge-use-line-max" => Ok(Self::UseLineMax),
            "separate" => Ok(Self::Separate),
            _ => Err(GcovrsError::Other(format!(
                "Unknown function merge mode: '{s}'. Supported: strict, \
                 merge-use-line-0, merge-use-line-min, merge-use-line-max, separate"
            ))),
        }
    }
}

/// Options consumed by the merge functions.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub func_mode: FunctionMergeMode,
}

impl MergeOptions {
    /// Options used when the parser itself re-inserts a function it has
    /// already seen (e.g. specialization sections reporting the same
    /// function at drifting line numbers).
    pub fn function_max_line() -> Self {
        Self {
            func_mode: FunctionMergeMode::UseLineMax,
        }
    }
}

/// Merge the entries of `right` into `left`, key by key.
fn merge_map<K: Ord, V>(
    left: &mut BTreeMap<K, V>,
    right: BTreeMap<K, V>,
    mut merge_item: impl FnMut(&mut V, V) -> Result<()>,
) -> Result<()> {
    for (key, right_item) in right {
        match left.entry(key) {
            Entry::Occupied(mut entry) => merge_item(entry.get_mut(), right_item)?,
            Entry::Vacant(entry) => {
                entry.insert(right_item);
            }
        }
    }
    Ok(())
}

/// Merge whole-run coverage maps.
pub fn merge_covdata(left: &mut CovData, right: CovData, options: &MergeOptions) -> Result<()> {
    merge_map(&mut left.files, right.files, |l, r| {
        merge_file(l, r, options)
    })
}

/// Insert a `FileCoverage` into a whole-run map, merging with any
/// existing entry for the same filename.
pub fn insert_file_coverage(
    target: &mut CovData,
    filecov: FileCoverage,
    options: &MergeOptions,
) -> Result<()> {
    match target.files.entry(filecov.filename.clone()) {
        Entry::Occupied(mut entry) => merge_file(entry.get_mut(), filecov, options),
        Entry::Vacant(entry) => {
            entry.insert(filecov);
            Ok(())
        }
    }
}

/// Merge coverage for the same source file.
///
/// Precondition: both sides have the same filename.
pub fn merge_file(
    left: &mut FileCoverage,
    right: FileCoverage,
    options: &MergeOptions,
) -> Result<()> {
    if left.filename != right.filename {
        return Err(GcovrsError::MergeAssertion(format!(
            "Filename must be equal, got {:?} and {:?}.",
            left.filename, right.filename
        )));
    }

    let context = left.filename.clone();
    merge_map(&mut left.lines, right.lines, |l, r| {
        merge_line(l, r, &context)
    })?;
    merge_map(&mut left.functions, right.functions, |l, r| {
        merge_function(l, r, options, &context)
    })
}

/// Insert a `LineCoverage` into a `FileCoverage`, merging with any
/// existing entry for the same line number.
pub fn insert_line_coverage(target: &mut FileCoverage, linecov: LineCoverage) -> Result<()> {
    let context = target.filename.clone();
    match target.lines.entry(linecov.lineno) {
        Entry::Occupied(mut entry) => merge_line(entry.get_mut(), linecov, &context),
        Entry::Vacant(entry) => {
            entry.insert(linecov);
            Ok(())
        }
    }
}

/// Merge coverage for the same line.
///
/// Precondition: both sides have the same line number. Differing source
/// checksums mean the two reports describe different source revisions;
/// merging them would silently produce nonsense coverage.
pub fn merge_line(left: &mut LineCoverage, right: LineCoverage, context: &str) -> Result<()> {
    let context = format!("{context}:{}", left.lineno);
    if left.lineno != right.lineno {
        return Err(GcovrsError::MergeAssertion(format!(
            "Line number must be equal, got {} and {} while merging {context}.",
            left.lineno, right.lineno
        )));
    }
    // If both checksums exist compare them; if only one exists, use it.
    match (&left.md5, &right.md5) {
        (Some(l), Some(r)) if l != r => {
            return Err(GcovrsError::MergeAssertion(format!(
                "MD5 checksum of {context} must be equal."
            )));
        }
        (None, Some(r)) => left.md5 = Some(r.clone()),
        _ => {}
    }

    left.count += right.count;
    left.excluded |= right.excluded;
    left.noncode |= right.noncode;
    for blockno in right.block_ids {
        if !left.block_ids.contains(&blockno) {
            left.block_ids.push(blockno);
        }
    }

    merge_map(&mut left.branches, right.branches, |l, r| {
        merge_branch(l, r)
    })?;
    merge_map(&mut left.conditions, right.conditions, |l, r| {
        merge_condition(l, r, &context)
    })?;
    merge_map(&mut left.calls, right.calls, |l, r| merge_call(l, r, &context))?;
    left.decision = merge_decision(left.decision.take(), right.decision);

    Ok(())
}

/// Insert a `BranchCoverage` into a `LineCoverage`.
pub fn insert_branch_coverage(
    target: &mut LineCoverage,
    branchno: u32,
    branchcov: BranchCoverage,
) -> Result<()> {
    match target.branches.entry(branchno) {
        Entry::Occupied(mut entry) => merge_branch(entry.get_mut(), branchcov),
        Entry::Vacant(entry) => {
            entry.insert(branchcov);
            Ok(())
        }
    }
}

/// Merge coverage for the same branch: counts sum, flags stick once true.
pub fn merge_branch(left: &mut BranchCoverage, right: BranchCoverage) -> Result<()> {
    left.count += right.count;
    left.fallthrough |= right.fallthrough;
    left.throw |= right.throw;
    left.excluded |= right.excluded;
    if left.destination_blockno.is_none() {
        left.destination_blockno = right.destination_blockno;
    }
    Ok(())
}

/// Merge coverage for the same condition.
///
/// The not-covered sets use INTERSECTION: a sub-condition stays
/// "not covered" only if neither side ever observed it. This is the one
/// place where merging is not a union, because "not yet proven covered"
/// must become "proven covered" as soon as any one report demonstrates it.
pub fn merge_condition(
    left: &mut ConditionCoverage,
    right: ConditionCoverage,
    context: &str,
) -> Result<()> {
    if left.count != right.count {
        return Err(GcovrsError::MergeAssertion(format!(
            "The number of conditions must be equal, got {} and expected {} \
             while merging {context}.",
            right.count, left.count
        )));
    }

    left.not_covered_true = left
        .not_covered_true
        .intersection(&right.not_covered_true)
        .copied()
        .collect();
    left.not_covered_false = left
        .not_covered_false
        .intersection(&right.not_covered_false)
        .copied()
        .collect();
    left.covered =
        left.count - left.not_covered_true.len() as u64 - left.not_covered_false.len() as u64;

    Ok(())
}

/// Merge decision coverage through the 4-state lattice:
///
/// * `None` (no known decision) is the identity;
/// * `Uncheckable` is absorbing — ambiguity cannot be retracted;
/// * matching concrete variants sum their counts;
/// * mismatched concrete variants degrade to `Uncheckable`.
pub fn merge_decision(
    left: Option<DecisionCoverage>,
    right: Option<DecisionCoverage>,
) -> Option<DecisionCoverage> {
    use DecisionCoverage::*;

    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(Uncheckable), _) | (_, Some(Uncheckable)) => Some(Uncheckable),
        (
            Some(Conditional {
                count_true: lt,
                count_false: lf,
            }),
            Some(Conditional {
                count_true: rt,
                count_false: rf,
            }),
        ) => Some(Conditional {
            count_true: lt + rt,
            count_false: lf + rf,
        }),
        (Some(Switch { count: l }), Some(Switch { count: r })) => Some(Switch { count: l + r }),
        _ => Some(Uncheckable),
    }
}

/// Insert a `CallCoverage` into a `LineCoverage`.
pub fn insert_call_coverage(target: &mut LineCoverage, call: CallCoverage) -> Result<()> {
    match target.calls.entry(call.callno) {
        Entry::Occupied(mut entry) => merge_call(entry.get_mut(), call, "call"),
        Entry::Vacant(entry) => {
            entry.insert(call);
            Ok(())
        }
    }
}

/// Merge coverage for the same call site.
pub fn merge_call(left: &mut CallCoverage, right: CallCoverage, context: &str) -> Result<()> {
    if left.callno != right.callno {
        return Err(GcovrsError::MergeAssertion(format!(
            "Call number must be equal, got {} and {} while merging {context}.",
            left.callno, right.callno
        )));
    }
    left.covered |= right.covered;
    Ok(())
}

/// Insert a `FunctionCoverage` into a `FileCoverage`, merging with any
/// existing entry under the same key (mangled name when available).
pub fn insert_function_coverage(
    filecov: &mut FileCoverage,
    function: FunctionCoverage,
    options: &MergeOptions,
) -> Result<()> {
    let context = filecov.filename.clone();
    match filecov.functions.entry(function.key().to_string()) {
        Entry::Occupied(mut entry) => merge_function(entry.get_mut(), function, options, &context),
        Entry::Vacant(entry) => {
            entry.insert(function);
            Ok(())
        }
    }
}

/// Merge coverage for the same function.
///
/// Precondition: both sides have the same identity. Line numbers must
/// match in `Strict` mode; the other modes resolve conflicts by keeping
/// separate per-line entries or collapsing everything onto a single line.
pub fn merge_function(
    left: &mut FunctionCoverage,
    right: FunctionCoverage,
    options: &MergeOptions,
    context: &str,
) -> Result<()> {
    if left.demangled_name != right.demangled_name {
        return Err(GcovrsError::MergeAssertion(
            "Function demangled name must be equal.".to_string(),
        ));
    }
    if left.name != right.name {
        return Err(GcovrsError::MergeAssertion(
            "Function name must be equal.".to_string(),
        ));
    }

    if options.func_mode == FunctionMergeMode::Strict
        && !left.count.keys().eq(right.count.keys())
    {
        let linenos = left
            .count
            .keys()
            .chain(right.count.keys())
            .collect::<std::collections::BTreeSet<_>>()
            .iter()
            .map(|lineno| lineno.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(GcovrsError::MergeAssertion(format!(
            "Got function {} in {context} on multiple lines: {linenos}.\n\
             \tYou can run with --merge-mode-functions=MERGE_MODE to fix this.",
            right.display_name(),
        )));
    }

    // Strict (equal line sets) and separate mode both keep distinct
    // counts for each line number.
    if matches!(
        options.func_mode,
        FunctionMergeMode::Strict | FunctionMergeMode::Separate
    ) {
        for (lineno, count) in right.count {
            *left.count.entry(lineno).or_insert(0) += count;
        }
        for (lineno, blocks) in right.blocks {
            let entry = left.blocks.entry(lineno).or_insert(blocks);
            // Take the maximum value for this line.
            if *entry < blocks {
                *entry = blocks;
            }
        }
        for (lineno, excluded) in right.excluded {
            *left.excluded.entry(lineno).or_insert(false) |= excluded;
        }
        if let Some(right_start) = right.start {
            let start = left.start.get_or_insert_with(BTreeMap::new);
            for (lineno, position) in right_start {
                start.insert(lineno, position);
            }
        }
        if let Some(right_end) = right.end {
            let end = left.end.get_or_insert_with(BTreeMap::new);
            for (lineno, position) in right_end {
                end.insert(lineno, position);
            }
        }
        return Ok(());
    }

    // Merge all observations into an entry for a single line number.
    let right_lineno = right.count.keys().next().copied().unwrap_or(0);
    let lineno = if left.count.contains_key(&right_lineno) {
        right_lineno
    } else {
        match options.func_mode {
            FunctionMergeMode::UseLineZero => 0,
            FunctionMergeMode::UseLineMin => left
                .count
                .keys()
                .chain(right.count.keys())
                .min()
                .copied()
                .unwrap_or(0),
            FunctionMergeMode::UseLineMax => left
                .count
                .keys()
                .chain(right.count.keys())
                .max()
                .copied()
                .unwrap_or(0),
            _ => unreachable!("strict and separate modes handled above"),
        }
    };

    // Overwrite with the sum at the desired line,
    let count = left.count.values().sum::<u64>() + right.count.values().sum::<u64>();
    left.count = BTreeMap::from([(lineno, count)]);
    // or the max value at the desired line,
    let blocks = left
        .blocks
        .values()
        .chain(right.blocks.values())
        .copied()
        .fold(0.0, f64::max);
    left.blocks = BTreeMap::from([(lineno, blocks)]);
    // or the logical OR of all values.
    let excluded = left.excluded.values().chain(right.excluded.values()).any(|e| *e);
    left.excluded = BTreeMap::from([(lineno, excluded)]);

    if let (Some(left_start), Some(right_start)) = (&left.start, &right.start) {
        let start = left_start.values().chain(right_start.values()).min().copied();
        left.start = start.map(|position| BTreeMap::from([(lineno, position)]));
    }
    if let (Some(left_end), Some(right_end)) = (&left.end, &right.end) {
        let end = left_end.values().chain(right_end.values()).max().copied();
        left.end = end.map(|position| BTreeMap::from([(lineno, position)]));
    }

    Ok(())
}
