use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server responded with status {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("Request timed out after {timeout_ms} ms")]
    TimeoutError { timeout_ms: u64 },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },
}

impl FetchError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::StatusError { status, .. } => *status >= 500 || *status == 429,
            FetchError::TimeoutError { .. } | FetchError::TransportError { .. } => true,
            _ => false,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            FetchError::HttpError(_) | FetchError::TransportError { .. } => {
                "Could not reach the server, check the URL and your network connection".to_string()
            }
            FetchError::StatusError { status, .. } => {
                format!("The server rejected the request (HTTP {})", status)
            }
            FetchError::TimeoutError { timeout_ms } => {
                format!("The server did not answer within {} ms", timeout_ms)
            }
            FetchError::SerializationError(_) => {
                "The response body was not the expected JSON".to_string()
            }
            FetchError::IoError(e) => format!("File access failed: {}", e),
            FetchError::ConfigError { .. }
            | FetchError::ConfigValidationError { .. }
            | FetchError::InvalidConfigValueError { .. }
            | FetchError::MissingConfigError { .. } => {
                format!("Configuration problem: {}", self)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
