//! Error types and handling for vigil
//!
//! This module defines the error types used throughout the application,
//! classified into the kinds the orchestrator needs to make retry/shutdown
//! decisions without inspecting error messages.

use thiserror::Error;

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Classification used by the orchestrator for routing, backoff and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient, worth retrying with backoff (connection drop, HTTP timeout).
    Retryable,
    /// Bad or missing configuration; not recoverable without operator action.
    Configuration,
    /// Malformed or unexpected data (bad PID response, corrupt row).
    Data,
    /// Credential or permission failure (VIN API key, upload auth).
    Authentication,
    /// Local system failure (disk full, permission denied, panic recovery).
    System,
}

/// Main error type for vigil
#[derive(Debug, Error)]
pub enum VigilError {
    /// Configuration-related errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// OBD-II / ELM327 link errors
    #[error("obd link error: {message}")]
    Obd { message: String },

    /// Persistence / database errors
    #[error("store error: {message}")]
    Store { message: String },

    /// Serialization/deserialization errors
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("i/o error: {message}")]
    Io { message: String },

    /// Network-related errors (VIN decode, analysis client, backup upload)
    #[error("network error: {message}")]
    Network { message: String },

    /// Authentication/authorization errors
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// Timeout errors
    #[error("timeout error: {message}")]
    Timeout { message: String },

    /// Hardware subsystem errors (UPS, GPIO, display)
    #[error("hardware error: {message}")]
    Hardware { message: String },

    /// Data-shape errors (malformed reading, corrupt row)
    #[error("data error: {message}")]
    Data { message: String },

    /// Generic errors with context
    #[error("error: {message}")]
    Generic { message: String },
}

impl VigilError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        VigilError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        VigilError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new OBD link error
    pub fn obd<S: Into<String>>(message: S) -> Self {
        VigilError::Obd {
            message: message.into(),
        }
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        VigilError::Store {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        VigilError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        VigilError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        VigilError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new hardware error
    pub fn hardware<S: Into<String>>(message: S) -> Self {
        VigilError::Hardware {
            message: message.into(),
        }
    }

    /// Create a new data error
    pub fn data<S: Into<String>>(message: S) -> Self {
        VigilError::Data {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        VigilError::Auth {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        VigilError::Generic {
            message: message.into(),
        }
    }

    /// Classify this error for orchestrator-level routing and exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VigilError::Config { .. } | VigilError::Validation { .. } => ErrorKind::Configuration,
            VigilError::Obd { .. } | VigilError::Network { .. } | VigilError::Timeout { .. } => {
                ErrorKind::Retryable
            }
            VigilError::Auth { .. } => ErrorKind::Authentication,
            VigilError::Data { .. } | VigilError::Serialization { .. } => ErrorKind::Data,
            VigilError::Store { .. }
            | VigilError::Io { .. }
            | VigilError::Hardware { .. }
            | VigilError::Generic { .. } => ErrorKind::System,
        }
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for VigilError {
    fn from(err: serde_yaml::Error) -> Self {
        VigilError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for VigilError {
    fn from(err: reqwest::Error) -> Self {
        VigilError::network(err.to_string())
    }
}

impl From<rusqlite::Error> for VigilError {
    fn from(err: rusqlite::Error) -> Self {
        VigilError::store(err.to_string())
    }
}

impl From<r2d2::Error> for VigilError {
    fn from(err: r2d2::Error) -> Self {
        VigilError::store(err.to_string())
    }
}

impl From<chrono::ParseError> for VigilError {
    fn from(err: chrono::ParseError) -> Self {
        VigilError::validation("datetime".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = VigilError::config("test config error");
        assert!(matches!(err, VigilError::Config { .. }));

        let err = VigilError::obd("test obd error");
        assert!(matches!(err, VigilError::Obd { .. }));

        let err = VigilError::validation("field", "test validation error");
        assert!(matches!(err, VigilError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = VigilError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "configuration error: test error");

        let err = VigilError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "validation error: test_field - invalid value");
    }

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(VigilError::config("x").kind(), ErrorKind::Configuration);
        assert_eq!(VigilError::obd("x").kind(), ErrorKind::Retryable);
        assert_eq!(VigilError::auth("x").kind(), ErrorKind::Authentication);
        assert_eq!(VigilError::data("x").kind(), ErrorKind::Data);
        assert_eq!(VigilError::hardware("x").kind(), ErrorKind::System);
    }
}
