use thiserror::Error;

#[derive(Error, Debug)]
pub enum GcovrsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {filename}: {source}")]
    Parse {
        filename: String,
        source: ParseError,
    },

    #[error("Missing key 'Source' in metadata of {0}")]
    MissingSourceKey(String),

    /// The inputs being merged do not describe the same program. Callers can
    /// attribute this to a bad input combination rather than a parser bug.
    #[error("Merge assertion: {0}")]
    MergeAssertion(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GcovrsError>;

/// A recoverable error while tokenizing or interpreting one line of a gcov
/// report. These are collected per file and escalated in one batch.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("unrecognized gcov line: {0:?}")]
    UnknownLineType(String),

    #[error("invalid number {value:?} in gcov line {line:?}")]
    InvalidNumber { value: String, line: String },

    /// Negative hit counts are produced by a gcov defect, see
    /// https://gcc.gnu.org/bugzilla/show_bug.cgi?id=68080.
    /// Use --gcov-ignore-parse-errors with negative_hits.warn or
    /// negative_hits.warn_once_per_file to continue anyway.
    #[error("got negative hit value in gcov line {0:?}")]
    NegativeHits(String),

    /// Counter values at or above 2^32 indicate wraparound in the gcov
    /// tool. Use --gcov-ignore-parse-errors with suspicious_hits.warn or
    /// suspicious_hits.warn_once_per_file to continue anyway.
    #[error("got suspicious hit value in gcov line {0:?}")]
    SuspiciousHits(String),

    /// A tag referenced a line that must already exist in the model.
    #[error("gcov line {0:?} refers to a source line that was never seen")]
    MissingLine(String),
}
