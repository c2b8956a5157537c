use thiserror::Error;

/// Errors produced by the synchronous pipeline driver and its sinks.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("TS/PSI parsing error: {0}")]
    Ts(#[from] ts::TsError),

    #[error("filter/collector error: {0}")]
    Filter(#[from] arib_filters::FilterError),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no sink connected")]
    NoSink,
}
