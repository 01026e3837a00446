use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use regex::Regex;
use tracing_subscriber::EnvFilter;

use gcovrs::exclusions::ExclusionOptions;
use gcovrs::ingest::IngestOptions;
use gcovrs::merge::{FunctionMergeMode, MergeOptions};

/// gcovrs — parse, merge, and filter textual gcov coverage reports.
#[derive(Parser)]
#[command(name = "gcovrs", version, about)]
struct Cli {
    /// The .gcov report files to process.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Parse errors to tolerate: all, negative_hits.warn,
    /// negative_hits.warn_once_per_file, suspicious_hits.warn,
    /// suspicious_hits.warn_once_per_file.
    #[arg(long, value_delimiter = ',')]
    gcov_ignore_parse_errors: Vec<String>,

    /// How to merge functions observed at differing line numbers: strict,
    /// merge-use-line-0, merge-use-line-min, merge-use-line-max, separate.
    #[arg(long, default_value = "strict")]
    merge_mode_functions: String,

    /// Ignore in-source exclusion markers.
    #[arg(long)]
    no_markers: bool,

    /// Prefix (regex) for exclusion markers, e.g. "GCOVR|LCOV".
    #[arg(long, default_value = "GCOVR")]
    exclude_pattern_prefix: String,

    /// Exclude source lines that fully match this regex.
    #[arg(long)]
    exclude_lines_by_pattern: Option<String>,

    /// Exclude branches on source lines that fully match this regex.
    #[arg(long)]
    exclude_branches_by_pattern: Option<String>,

    /// Exclude functions whose demangled name fully matches this regex.
    /// Can be given multiple times.
    #[arg(long = "exclude-function")]
    exclude_functions: Vec<String>,

    /// Exclude branches that belong to exception-unwinding code.
    #[arg(long)]
    exclude_throw_branches: bool,

    /// Exclude branches on lines that cannot contain useful code.
    #[arg(long)]
    exclude_unreachable_branches: bool,

    /// Exclude lines containing a function definition.
    #[arg(long)]
    exclude_function_lines: bool,

    /// Exclude compiler-generated (internal) functions.
    #[arg(long)]
    exclude_internal_functions: bool,

    /// Exclude zero-count lines that look like non-code.
    #[arg(long)]
    exclude_noncode_lines: bool,

    /// Drop call coverage information.
    #[arg(long)]
    exclude_calls: bool,

    /// Run the decision-coverage analyzer.
    #[arg(long)]
    decision: bool,

    /// Number of worker threads.
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,

    /// Emit the summary as JSON instead of a text table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut exclude_functions = Vec::with_capacity(cli.exclude_functions.len());
    for pattern in &cli.exclude_functions {
        exclude_functions
            .push(Regex::new(pattern).map_err(|e| anyhow::anyhow!("--exclude-function: {e}"))?);
    }

    let options = IngestOptions {
        parser: gcovrs::cli::parser_options_from_args(&cli.gcov_ignore_parse_errors)?,
        exclusions: ExclusionOptions {
            respect_exclusion_markers: !cli.no_markers,
            exclude_functions,
            exclude_lines_by_pattern: cli.exclude_lines_by_pattern,
            exclude_branches_by_pattern: cli.exclude_branches_by_pattern,
            exclude_pattern_prefix: cli.exclude_pattern_prefix,
            exclude_throw_branches: cli.exclude_throw_branches,
            exclude_unreachable_branches: cli.exclude_unreachable_branches,
            exclude_function_lines: cli.exclude_function_lines,
            exclude_internal_functions: cli.exclude_internal_functions,
            exclude_noncode_lines: cli.exclude_noncode_lines,
            exclude_calls: cli.exclude_calls,
        },
        merge: MergeOptions {
            func_mode: cli.merge_mode_functions.parse::<FunctionMergeMode>()?,
        },
        decision_analysis: cli.decision,
    };

    let output = gcovrs::cli::cmd_report(&cli.files, &options, cli.jobs, cli.json)?;
    print!("{output}");
    Ok(())
}
