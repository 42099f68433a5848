//! Error types for the tracing core
//!
//! Only the initialization entry points and the logging bootstrap return
//! errors. Everything on the hot path (scopes, signals, interceptor hooks)
//! degrades to a logged no-op instead.

use thiserror::Error;

/// Errors surfaced by pipeline initialization and logging setup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TracingError {
    /// Caller supplied an invalid value (empty API key, empty endpoint)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required environment variable is not set
    #[error("Missing environment variable: {0}")]
    MissingEnvironment(&'static str),

    /// The exporter or provider could not be constructed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The log subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl TracingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    /// True for errors caused by caller input rather than the environment
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, TracingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TracingError::configuration("API key cannot be empty");
        assert_eq!(err.to_string(), "Configuration error: API key cannot be empty");

        let err = TracingError::MissingEnvironment("PAID_API_KEY");
        assert_eq!(err.to_string(), "Missing environment variable: PAID_API_KEY");
    }

    #[test]
    fn test_is_configuration() {
        assert!(TracingError::configuration("x").is_configuration());
        assert!(!TracingError::initialization("x").is_configuration());
        assert!(!TracingError::MissingEnvironment("PAID_API_KEY").is_configuration());
    }
}
