use thiserror::Error;

/// One failed candidate endpoint: the path that was tried and why it failed.
#[derive(Debug)]
pub struct AttemptFailure {
    pub path: String,
    pub error: ProbeError,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Timed out after {secs}s waiting for {operation}")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("All {} candidate endpoints failed", .attempts.len())]
    AllCandidatesFailed { attempts: Vec<AttemptFailure> },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
