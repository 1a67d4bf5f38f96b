/*!
Error types for the tagpersist core engine.
*/

use thiserror::Error;

/// Result type used throughout the tagpersist core.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while encoding or persisting a value.
#[derive(Error, Debug)]
pub enum PersistError {
    /// A required argument (value or destination path) was absent
    #[error("Missing required argument: {0}")]
    ArgumentMissing(&'static str),

    /// The destination path does not carry the reserved `.bin` suffix
    #[error("Invalid destination {path}: file path must end with {required_suffix}")]
    InvalidDestination {
        path: String,
        required_suffix: &'static str,
    },

    /// The structured encoder could not represent the value
    #[error("Encoding error: {0}")]
    Encoding(#[from] prost::EncodeError),

    /// I/O errors during compression or file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pooled buffer was released into a pool that did not issue it
    #[error("Buffer lease {lease} was issued by another pool")]
    ForeignBuffer { lease: u64 },

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracing or metrics setup failures
    #[error("Observability error: {0}")]
    Observability(String),
}

impl PersistError {
    /// Create a new invalid destination error
    pub fn invalid_destination<S: Into<String>>(path: S) -> Self {
        Self::InvalidDestination {
            path: path.into(),
            required_suffix: crate::gateway::REQUIRED_SUFFIX,
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
