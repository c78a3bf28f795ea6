//! Error types for lamina
//!
//! One unified error type, `LaminaError`, is returned by every overlay
//! operation. We use `thiserror` for `Display` and `Error` derivation.
//!
//! ## Error Model
//!
//! Each variant maps to exactly one frozen [`ErrorKind`] code:
//!
//! | Kind | Meaning |
//! |------|---------|
//! | InvalidArgument | missing required column, unknown format or type, bad batch shape |
//! | ParseFailed | input bytes are not valid in the declared format |
//! | NotFound | update-mode write addressed a missing key |
//! | Conflict | insert-mode write hit a present key, or a transaction conflict |
//! | OutOfMemory | arena or scratch allocation failed |
//! | Substrate | the underlying store reported a failure (pass-through) |
//! | Unsupported | the operation cannot be expressed on this substrate |
//!
//! A status-level error means the whole batch result is invalid. Per-row
//! degradations that the batch can survive (an update-mode miss, a failed
//! gather coercion) are reported through presence/validity bitmaps instead
//! and never surface here.

use thiserror::Error;

/// Result type alias for overlay operations
pub type Result<T> = std::result::Result<T, LaminaError>;

// =============================================================================
// ErrorKind - frozen status codes
// =============================================================================

/// Canonical status codes, one per `LaminaError` variant
///
/// These are the stable representation carried across the language-binding
/// boundary; they will not change without a major version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing required input, unknown format, unknown scalar type
    InvalidArgument,
    /// Malformed input in the declared wire format
    ParseFailed,
    /// Update-mode write on a missing key
    NotFound,
    /// Insert-mode write on a present key, or transaction conflict
    Conflict,
    /// Arena or scratch allocation failed
    OutOfMemory,
    /// Substrate failure, passed through
    Substrate,
    /// Operation not implementable by this substrate
    Unsupported,
}

impl ErrorKind {
    /// Canonical string form of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::Substrate => "substrate_error",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// LaminaError
// =============================================================================

/// Unified error type for all overlay operations
///
/// Constructors keep call sites short (`LaminaError::parse_failed(..)`),
/// and classification predicates (`is_conflict`, `is_not_found`) support
/// retry decisions without matching on variants.
#[derive(Debug, Error)]
pub enum LaminaError {
    /// A required input column is missing or malformed, or a selector
    /// (format, scalar type, role) is out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What is wrong with the input
        message: String,
    },

    /// Input bytes could not be parsed in the declared format.
    ///
    /// The whole batch aborts before any substrate write.
    #[error("parse failed for task {task}: {message}")]
    ParseFailed {
        /// Index of the offending task within the batch
        task: usize,
        /// Parser diagnostic
        message: String,
    },

    /// An update-mode write addressed a key that does not exist.
    #[error("not found: key {key} in collection {collection}")]
    NotFound {
        /// Collection handle
        collection: u64,
        /// The missing key
        key: i64,
    },

    /// An insert-mode write addressed a key that already exists, or an
    /// optimistic transaction failed validation. Retryable.
    #[error("conflict: {message}")]
    Conflict {
        /// Reason for the conflict
        message: String,
    },

    /// Arena or scratch allocation failed.
    #[error("out of memory: {message}")]
    OutOfMemory {
        /// What allocation failed
        message: String,
    },

    /// The substrate reported a failure; the message is passed through.
    #[error("substrate error: {message}")]
    Substrate {
        /// Backend diagnostic
        message: String,
    },

    /// The requested operation cannot be served by this substrate.
    #[error("unsupported: {message}")]
    Unsupported {
        /// What is missing
        message: String,
    },
}

impl LaminaError {
    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        LaminaError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a ParseFailed error for the given task index
    pub fn parse_failed(task: usize, message: impl Into<String>) -> Self {
        LaminaError::ParseFailed {
            task,
            message: message.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(collection: u64, key: i64) -> Self {
        LaminaError::NotFound { collection, key }
    }

    /// Create a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        LaminaError::Conflict {
            message: message.into(),
        }
    }

    /// Create an OutOfMemory error
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        LaminaError::OutOfMemory {
            message: message.into(),
        }
    }

    /// Create a Substrate error
    pub fn substrate(message: impl Into<String>) -> Self {
        LaminaError::Substrate {
            message: message.into(),
        }
    }

    /// Create an Unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        LaminaError::Unsupported {
            message: message.into(),
        }
    }

    /// The frozen status code for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaminaError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            LaminaError::ParseFailed { .. } => ErrorKind::ParseFailed,
            LaminaError::NotFound { .. } => ErrorKind::NotFound,
            LaminaError::Conflict { .. } => ErrorKind::Conflict,
            LaminaError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            LaminaError::Substrate { .. } => ErrorKind::Substrate,
            LaminaError::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// True for conflicts, which may succeed on retry with fresh data.
    ///
    /// The overlay itself never retries; that is the caller's decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LaminaError::Conflict { .. })
    }

    /// True when the error is a missing-key report
    pub fn is_not_found(&self) -> bool {
        matches!(self, LaminaError::NotFound { .. })
    }

    /// True when the error originated below the overlay
    pub fn is_substrate(&self) -> bool {
        matches!(self, LaminaError::Substrate { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = LaminaError::parse_failed(3, "unexpected end of input");
        let msg = err.to_string();
        assert!(msg.contains("task 3"));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn test_kind_mapping_is_total() {
        let cases = [
            (LaminaError::invalid_argument("x"), ErrorKind::InvalidArgument),
            (LaminaError::parse_failed(0, "x"), ErrorKind::ParseFailed),
            (LaminaError::not_found(1, 2), ErrorKind::NotFound),
            (LaminaError::conflict("x"), ErrorKind::Conflict),
            (LaminaError::out_of_memory("x"), ErrorKind::OutOfMemory),
            (LaminaError::substrate("x"), ErrorKind::Substrate),
            (LaminaError::unsupported("x"), ErrorKind::Unsupported),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(LaminaError::conflict("write-write").is_retryable());
        assert!(!LaminaError::not_found(0, 7).is_retryable());
        assert!(!LaminaError::substrate("io").is_retryable());
    }

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(ErrorKind::ParseFailed.as_str(), "parse_failed");
        assert_eq!(ErrorKind::Substrate.as_str(), "substrate_error");
        assert_eq!(ErrorKind::OutOfMemory.to_string(), "out_of_memory");
    }
}
