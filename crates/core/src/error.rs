//! Error types for framesync applications.

use thiserror::Error;

/// Main error type for applications built on framesync.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the framesync Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Config("FRAMESYNC_FRAMES must be an integer".to_string());
        assert_eq!(err.to_string(), "Config error: FRAMESYNC_FRAMES must be an integer");

        let err = Error::Internal("manager still shared".to_string());
        assert_eq!(err.to_string(), "Internal error: manager still shared");
    }
}
