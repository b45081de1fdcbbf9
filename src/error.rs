//! Error types for the pipeline engine.
//!
//! Contract violations (bad downcast, bad index, invalid configuration) are
//! typed errors; transient backpressure is *not* an error and is reported via
//! [`crate::port::Status`] or an empty batch instead.

use thiserror::Error;

/// Errors that can occur within the pipeline engine.
#[derive(Error, Debug)]
pub enum Error {
    /// A `Blob::get` downcast did not match the stored buffer type.
    #[error("Buffer at index {index} is not a {expected}")]
    TypeMismatch { index: usize, expected: &'static str },

    /// A buffer index past the end of a blob.
    #[error("Buffer index {index} out of bounds (blob holds {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Deep copy requested for a buffer that owns an external resource.
    #[error("Cannot clone a buffer with a release action")]
    Uncloneable,

    /// Invalid stage, batching, or wiring configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wiring or configuration attempted while the pipeline is running.
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// Stop requested on a pipeline that was never started.
    #[error("Pipeline is not running")]
    NotRunning,

    /// A worker's `init` hook failed; the worker never entered its run loop.
    #[error("Worker {worker} of stage '{stage}' failed to initialize: {message}")]
    InitFailed {
        stage: String,
        worker: usize,
        message: String,
    },

    /// Failure inside a stage's `process` callback.
    #[error("Processing error: {0}")]
    Process(String),

    /// IO error (thread spawning).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TypeMismatch {
            index: 2,
            expected: "Buffer<u8>",
        };
        assert_eq!(err.to_string(), "Buffer at index 2 is not a Buffer<u8>");

        let err = Error::IndexOutOfBounds { index: 5, len: 3 };
        assert!(err.to_string().contains("index 5"));
        assert!(err.to_string().contains("holds 3"));
    }

    #[test]
    fn test_init_failed_display() {
        let err = Error::InitFailed {
            stage: "decode".to_string(),
            worker: 1,
            message: "no device".to_string(),
        };
        assert!(err.to_string().contains("decode"));
        assert!(err.to_string().contains("no device"));
    }
}
