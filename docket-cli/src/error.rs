//! Error types for the docket CLI.

use docket_queue::QueueError;
use docket_redis::RedisError;
use std::fmt;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types.
#[derive(Debug)]
pub enum CliError {
    /// IO error (signals, terminal output)
    Io(std::io::Error),

    /// Invalid or incomplete configuration
    Config(String),

    /// Invalid argument
    InvalidArgument(String),

    /// Queue operation failed
    Queue(QueueError),

    /// Output could not be rendered
    Output(String),

    /// Command execution error
    Command(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(e) => write!(f, "IO error: {}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Queue(QueueError::JobNotFound(id)) => write!(f, "No job with id {}", id),
            CliError::Queue(e) => write!(f, "{}", e),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
            CliError::Command(msg) => write!(f, "Command error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<QueueError> for CliError {
    fn from(e: QueueError) -> Self {
        CliError::Queue(e)
    }
}

impl From<RedisError> for CliError {
    fn from(e: RedisError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = CliError::from(QueueError::JobNotFound("abc".into()));
        assert_eq!(err.to_string(), "No job with id abc");
    }

    #[test]
    fn test_redis_errors_are_configuration_errors() {
        let err = CliError::from(RedisError::Config("bad url".into()));
        assert!(matches!(err, CliError::Config(_)));
    }
}
