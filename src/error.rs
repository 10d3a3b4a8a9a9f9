use std::path::PathBuf;

/// Error taxonomy for a pipeline run.
///
/// `Format`, `Configuration` and `DataUnavailable` are all fatal to the run
/// but mean different things to the caller: a format error points at the
/// upstream payload, a configuration error at the caller's input, and
/// data-unavailable at an upstream that had nothing usable. Per-station
/// rainfall problems never surface here; they are handled as recoverable
/// outcomes inside the collection loop.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed upstream payload: {0}")]
    Format(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("no usable upstream data: {0}")]
    DataUnavailable(String),

    #[error("output artifact already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("coordinate transform failed: {0}")]
    Projection(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
