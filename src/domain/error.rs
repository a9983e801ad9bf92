use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    /// Required user input is missing or malformed.
    ValidationError(String),
    /// Transport failure or a non-2xx HTTP status.
    NetworkError(String),
    /// The server answered 2xx with `success: false`.
    ApplicationError(String),
    /// The polling attempt budget ran out.
    TimeoutError(String),
    NotFound(String),
    ParseError(String),
    ConfigError(String),
    IoError(String),
    Internal(String),
}

impl AppError {
    /// Short category label used in notifications and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation",
            AppError::NetworkError(_) => "network",
            AppError::ApplicationError(_) => "application",
            AppError::TimeoutError(_) => "timeout",
            AppError::NotFound(_) => "not_found",
            AppError::ParseError(_) => "parse",
            AppError::ConfigError(_) => "config",
            AppError::IoError(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AppError::ApplicationError(msg) => write!(f, "Server error: {}", msg),
            AppError::TimeoutError(msg) => write!(f, "Timeout: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::ParseError(err.to_string())
        } else {
            AppError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = AppError::TimeoutError("gave up after 3 attempts".to_string());
        assert_eq!(err.to_string(), "Timeout: gave up after 3 attempts");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.xlsx");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::IoError(msg) if msg.contains("missing.xlsx")));
    }
}
