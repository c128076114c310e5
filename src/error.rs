//! Error types for the grafana-fetch gateway

use http::StatusCode;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// Error types that can occur while serving a panel request
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("dashboard not found: {0}")]
    DashboardNotFound(String),

    #[error("invalid config for dashboard {name}: {message}")]
    DashboardConfigInvalid { name: String, message: String },

    #[error("could not build upstream request: {0}")]
    UpstreamRequestBuild(String),

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("cache write error: {0}")]
    CacheWrite(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::IoError(err.to_string())
    }
}

impl FetchError {
    /// Convert error to the HTTP status returned to the client
    ///
    /// Only option syntax errors are the client's fault, and only an unknown
    /// dashboard is reported as missing. Everything else is a 500.
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            FetchError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
            FetchError::DashboardNotFound(_) => StatusCode::NOT_FOUND,
            FetchError::DashboardConfigInvalid { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::UpstreamRequestBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::UpstreamFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::CacheWrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FetchError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Create a DashboardConfigInvalid error
    pub fn dashboard_config_invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::DashboardConfigInvalid {
            name: name.into(),
            message: message.into(),
        }
    }
}
