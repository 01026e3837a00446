//! Per-file ingest pipeline: read a gcov text report, parse it, apply
//! exclusion processing and decision analysis, and fold the result into a
//! whole-run accumulator.

use std::path::Path;

use tracing::debug;

use crate::decision::DecisionParser;
use crate::error::{GcovrsError, Result};
use crate::exclusions::{apply_all_exclusions, ExclusionOptions};
use crate::merge::{insert_file_coverage, MergeOptions};
use crate::model::CovData;
use crate::parsers::gcov::{parse_coverage, parse_metadata, ParserOptions};

/// The combined option bundle for one ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub parser: ParserOptions,
    pub exclusions: ExclusionOptions,
    pub merge: MergeOptions,
    /// Run the decision-coverage analyzer after exclusion processing.
    pub decision_analysis: bool,
}

/// Read a `.gcov` report file and fold it into `covdata`.
/// Returns the name of the source file the report describes.
pub fn ingest_file(covdata: &mut CovData, path: &Path, options: &IngestOptions) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    ingest_report(covdata, &lines, &path.display().to_string(), options)
}

/// Process one gcov report given as text lines. `data_filename` names the
/// report itself and is only used in diagnostics; the covered source file
/// is recovered from the report's `Source` metadata key.
pub fn ingest_report(
    covdata: &mut CovData,
    lines: &[&str],
    data_filename: &str,
    options: &IngestOptions,
) -> Result<String> {
    let metadata = parse_metadata(data_filename, lines)?;
    let source = metadata
        .get("Source")
        .cloned()
        .flatten()
        .ok_or_else(|| GcovrsError::MissingSourceKey(data_filename.to_string()))?;
    debug!("Processing gcov report {data_filename} for source {source}");

    let (mut filecov, src_lines) = parse_coverage(lines, &source, &options.parser)?;

    apply_all_exclusions(&mut filecov, &src_lines, &options.exclusions);

    if options.decision_analysis {
        DecisionParser::new(&mut filecov, &src_lines).parse_all_lines()?;
    }

    insert_file_coverage(covdata, filecov, &options.merge)?;
    Ok(source)
}
