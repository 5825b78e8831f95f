use thiserror::Error;

/// Problems with user supplied input.  These are fatal and are always
/// reported before any request goes out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid market run: {0}. Valid options are: DA, 2DA, 7DA")]
    MarketRun(String),

    #[error("Invalid date format: {0}. Expected format: YYYY-MM-DD or YYYY-MM-DD HH:MM")]
    Date(String),

    #[error("Start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },

    #[error("Max days per chunk must be between 1 and 36500, got {0}")]
    ChunkSpan(i64),

    #[error("Invalid value {value:?} for config key {key}")]
    Config { key: String, value: String },
}

/// Why a whole download session failed.  Failures of individual chunks are
/// logged and tolerated, they only end up here if no chunk made it.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Failed to create directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },

    #[error("No chunks were downloaded successfully (0/{0})")]
    NothingDownloaded(usize),
}
