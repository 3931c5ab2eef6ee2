//! Error types for object store operations.

use crate::types::{KeySpace, ObjectKey};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in object store operations.
///
/// `NotFound` is an expected outcome that drives fetch-on-miss logic in the
/// caller. `BackendUnavailable` and `Cancelled` are reported upward; the store
/// never retries on its own.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is not present in the key space.
    #[error("object not found: {key} in key space {space}")]
    NotFound {
        /// Key space that was searched.
        space: KeySpace,
        /// The missing key.
        key: ObjectKey,
    },

    /// I/O or resource failure in the backend (disk full, corrupt file,
    /// locked file, closed backend).
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        /// Description of the failure.
        reason: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<io::Error>,
    },

    /// The call was deliberately aborted, either by an injected fault or by a
    /// deferred termination request.
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// Why the operation was cancelled.
        reason: String,
    },

    /// A key could not be constructed from the given bytes.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },
}

impl StoreError {
    /// Creates a `NotFound` error.
    pub fn not_found(space: KeySpace, key: ObjectKey) -> Self {
        Self::NotFound { space, key }
    }

    /// Creates a `BackendUnavailable` error without an I/O source.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates a `BackendUnavailable` error that wraps an I/O error.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::BackendUnavailable {
            reason: context.into(),
            source: Some(source),
        }
    }

    /// Creates a `BackendUnavailable` error describing file corruption.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::unavailable(format!("corrupted backing file: {}", message.into()))
    }

    /// Creates a `Cancelled` error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidKey` error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
        }
    }

    /// Returns `true` for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O error", err)
    }
}

/// Coarse classification of [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`StoreError::NotFound`].
    NotFound,
    /// See [`StoreError::BackendUnavailable`].
    BackendUnavailable,
    /// See [`StoreError::Cancelled`].
    Cancelled,
    /// See [`StoreError::InvalidKey`].
    InvalidKey,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not-found",
            Self::BackendUnavailable => "backend-unavailable",
            Self::Cancelled => "cancelled",
            Self::InvalidKey => "invalid-key",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let key = ObjectKey::from_bytes(b"abc").unwrap();
        assert_eq!(
            StoreError::not_found(KeySpace::Blob, key).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::unavailable("disk full").kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(StoreError::cancelled("x").kind(), ErrorKind::Cancelled);
        assert_eq!(StoreError::invalid_key("x").kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn io_error_becomes_unavailable() {
        let err: StoreError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn io_context_and_source_are_reported_once() {
        use std::error::Error as _;

        let err = StoreError::io("append failed", io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.to_string(), "backend unavailable: append failed");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "disk full");

        let mut chain = err.to_string();
        let mut next = err.source();
        while let Some(cause) = next {
            chain.push_str(&format!(": {cause}"));
            next = cause.source();
        }
        assert_eq!(chain.matches("disk full").count(), 1);
    }

    #[test]
    fn not_found_message_names_space() {
        let key = ObjectKey::from_bytes(&[0xab, 0xcd]).unwrap();
        let err = StoreError::not_found(KeySpace::Tree, key);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "object not found: abcd in key space tree");
    }
}
