//! Command handler for the gcovrs CLI.
//!
//! The `cmd_*` functions return their output as a `String`, making them
//! easy to test without capturing stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::error::GcovrsError;
use crate::ingest::{ingest_file, IngestOptions};
use crate::merge::merge_covdata;
use crate::model::CovData;
use crate::parsers::gcov::{HitsTolerance, ParserOptions};
use crate::report;
use crate::workers::parallel_process;

/// Build parser options from `--gcov-ignore-parse-errors` values.
pub fn parser_options_from_args(ignore_parse_errors: &[String]) -> Result<ParserOptions> {
    let mut options = ParserOptions::default();
    for value in ignore_parse_errors {
        match value.as_str() {
            "all" => options.ignore_parse_errors = true,
            "negative_hits.warn" => options.negative_hits = HitsTolerance::Warn,
            "negative_hits.warn_once_per_file" => {
                options.negative_hits = HitsTolerance::WarnOncePerFile;
            }
            "suspicious_hits.warn" => options.suspicious_hits = HitsTolerance::Warn,
            "suspicious_hits.warn_once_per_file" => {
                options.suspicious_hits = HitsTolerance::WarnOncePerFile;
            }
            _ => anyhow::bail!(
                "Unknown value for --gcov-ignore-parse-errors: '{value}'. Supported: \
                 all, negative_hits.warn, negative_hits.warn_once_per_file, \
                 suspicious_hits.warn, suspicious_hits.warn_once_per_file"
            ),
        }
    }
    Ok(options)
}

/// Ingest all report files, merge the per-worker results, and render the
/// summary.
pub fn cmd_report(
    files: &[PathBuf],
    options: &IngestOptions,
    jobs: usize,
    json: bool,
) -> Result<String> {
    let accumulators = parallel_process(files, jobs, |path, accumulator| {
        ingest_file(accumulator, path, options).map(|_| ()).map_err(
            |error| match error {
                GcovrsError::Io(source) => GcovrsError::Other(format!(
                    "Cannot read {}: {source}",
                    path.display()
                )),
                other => other,
            },
        )
    })
    .context("Failed to process coverage reports")?;

    let mut covdata = CovData::new();
    for accumulator in accumulators {
        merge_covdata(&mut covdata, accumulator, &options.merge)
            .context("Failed to merge worker results")?;
    }

    let summary = report::summarize(&covdata);
    if json {
        Ok(report::render_json(&summary)?)
    } else {
        Ok(report::render_text(&summary))
    }
}
