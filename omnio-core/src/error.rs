//! Error types shared by every backend

use thiserror::Error;

/// Result type alias
pub type OmnioResult<T> = Result<T, OmnioError>;

/// Main error type
#[derive(Error, Debug)]
pub enum OmnioError {
    #[error("No handler registered for scheme: {0}")]
    NoHandler(String),

    #[error("Operation not implemented for this backend")]
    NotImplemented,

    #[error("Buffered write of {attempted} bytes exceeds the {cap} byte cap")]
    OversizeWrite { attempted: usize, cap: usize },

    #[error("End of stream")]
    EndOfStream,

    #[error("Commit conflict: {path} changed since revision {expected}")]
    CommitConflict { path: String, expected: u64 },

    #[error("Transient backend failure: {0}")]
    Transient(String),

    #[error("Watch subscription permanently invalid: {0}")]
    FatalSubscription(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Seek position out of bounds: {0}")]
    InvalidSeek(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl OmnioError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OmnioError::Transient(_))
    }

    /// Whether the backend exists but lacks the requested capability.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, OmnioError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(OmnioError::Transient("connection reset".into()).is_retryable());

        assert!(!OmnioError::NotImplemented.is_retryable());
        assert!(!OmnioError::EndOfStream.is_retryable());
        assert!(!OmnioError::CommitConflict { path: "/a".into(), expected: 3 }.is_retryable());
        assert!(!OmnioError::FatalSubscription("gone".into()).is_retryable());
    }

    #[test]
    fn test_is_not_implemented() {
        assert!(OmnioError::NotImplemented.is_not_implemented());
        assert!(!OmnioError::NoHandler("mem".into()).is_not_implemented());
    }

    #[test]
    fn test_error_display() {
        let err = OmnioError::NoHandler("gopher".into());
        assert_eq!(format!("{}", err), "No handler registered for scheme: gopher");

        let err = OmnioError::OversizeWrite { attempted: 2048, cap: 1024 };
        assert!(format!("{}", err).contains("2048"));
        assert!(format!("{}", err).contains("1024"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OmnioError = io_err.into();
        assert!(matches!(err, OmnioError::Io(_)));
    }
}
