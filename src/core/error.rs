//! Core error types.

use std::fmt;

use crate::config::ConfigError;

/// Errors raised by instrumentation, exporters and the metrics surface.
#[derive(Debug)]
pub enum Error {
    /// Invalid HTTP response.
    InvalidResponse(String),

    /// Metric registration or encoding error.
    Metrics(prometheus::Error),

    /// Exporter construction or export pipeline error.
    Exporter(String),

    /// Invalid configuration.
    Config(ConfigError),

    /// SDK initialization failure.
    Init(String),

    /// I/O error.
    Io(std::io::Error),

    /// HTTP error.
    Http(http::Error),

    /// Custom error with message.
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
            Error::Metrics(e) => write!(f, "metrics error: {}", e),
            Error::Exporter(msg) => write!(f, "exporter error: {}", msg),
            Error::Config(e) => write!(f, "config error: {}", e),
            Error::Init(msg) => write!(f, "init error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Metrics(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::Metrics(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Custom(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Custom(msg.to_string())
    }
}

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidResponse("missing status".to_string());
        assert_eq!(err.to_string(), "invalid response: missing status");

        let err = Error::Exporter("otlp channel closed".to_string());
        assert_eq!(err.to_string(), "exporter error: otlp channel closed");

        let err = Error::Custom("something went wrong".to_string());
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket closed");
        let err: Error = io_err.into();

        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "custom error".into();
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "custom error");

        let err: Error = String::from("another error").into();
        assert_eq!(err.to_string(), "another error");
    }

    #[test]
    fn test_error_from_prometheus() {
        let perr = prometheus::Error::Msg("duplicate collector".to_string());
        let err: Error = perr.into();

        assert!(matches!(err, Error::Metrics(_)));
        assert!(err.to_string().contains("metrics error"));
    }
}
