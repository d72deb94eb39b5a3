// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failures raised by a backend's write half.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend already closed")]
    Closed,

    #[error("Failed to close backend: {0}")]
    Close(String),
}

/// Errors surfaced by a [`crate::Logger`].
///
/// Only `Closed` is a caller error; the other variants mean the pipeline has
/// stopped and records after the failing one were not written.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Log pipeline is closed")]
    Closed,

    #[error("Backend write failed: {0}")]
    Write(#[source] BackendError),

    #[error("Formatting task ended without producing a record")]
    FormatterLost,

    #[error("Write task panicked")]
    WriterPanicked,

    #[error("Backend close failed: {0}")]
    Close(#[source] BackendError),
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidConfig("capacity must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: capacity must be positive"
        );

        let error = PipelineError::Write(BackendError::Closed);
        assert_eq!(
            error.to_string(),
            "Backend write failed: Backend already closed"
        );
    }

    #[test]
    fn test_io_error_converts_to_backend_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let error: BackendError = io.into();
        assert!(matches!(error, BackendError::Io(_)));
        assert_eq!(error.to_string(), "I/O error: pipe");
    }

    #[test]
    fn test_error_debug() {
        let debug_str = format!("{:?}", PipelineError::FormatterLost);
        assert!(debug_str.contains("FormatterLost"));
    }
}
