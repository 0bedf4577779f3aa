//! Error handling module for botdeploy
//!
//! Typed errors for the library layers. Application glue (config loading,
//! the CLI) wraps these in `anyhow` with context.

use thiserror::Error;

/// Main error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    /// IO errors (local files, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed secret values
    #[error("Secret error: {0}")]
    Secret(String),

    /// Remote step errors (non-zero exit, timeout)
    #[error("Step failed: {0}")]
    Step(String),

    /// Transport errors (ssh/sftp could not run)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Pipeline graph errors
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for botdeploy operations
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a secret error
    pub fn secret(msg: impl Into<String>) -> Self {
        Self::Secret(msg.into())
    }

    /// Create a step error
    pub fn step(msg: impl Into<String>) -> Self {
        Self::Step(msg.into())
    }
}

/// Failures talking to the remote host.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{program} binary not found: {detail}")]
    ProgramNotFound { program: String, detail: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("failed to walk {path}: {message}")]
    Walk { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid pipeline graphs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("job '{job}' needs unknown job '{need}'")]
    UnknownNeed { job: String, need: String },

    #[error("dependency cycle involving: {0}")]
    Cycle(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeployError::config("remote root must be absolute");
        assert_eq!(
            err.to_string(),
            "Configuration error: remote root must be absolute"
        );

        let err = DeployError::secret("BOT_TOKEN is not set");
        assert_eq!(err.to_string(), "Secret error: BOT_TOKEN is not set");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DeployError = io_err.into();
        assert!(matches!(err, DeployError::Io(_)));
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: DeployError = TransportError::Timeout {
            program: "ssh".to_string(),
            seconds: 600,
        }
        .into();
        assert_eq!(err.to_string(), "ssh timed out after 600s");
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::UnknownNeed {
            job: "services".to_string(),
            need: "deps".to_string(),
        };
        assert_eq!(err.to_string(), "job 'services' needs unknown job 'deps'");
    }
}
