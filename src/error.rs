//! Error types for the Eople runtime.
//!
//! Runtime faults are surfaced through a single [`RuntimeError`] enum. Subscript
//! faults abort the message being processed but leave the owning process alive;
//! allocation failures and type-graph conflicts are fatal to the run.

use thiserror::Error;

/// Errors surfaced by the virtual machine at runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Array subscript past the end of the array.
    #[error("index {index} out of bounds for array of length {len} (line {line})")]
    IndexOutOfBounds { index: i64, len: usize, line: u32 },

    /// Dictionary subscript miss.
    #[error("key '{key}' not found (line {line})")]
    KeyNotFound { key: String, line: u32 },

    /// A value or type did not have the expected shape. The front-end is
    /// supposed to prevent these; the runtime still detects them.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Growing a process stack failed. Fatal to the process.
    #[error("stack allocation failed: requested {requested} slots")]
    StackAllocationFailed { requested: usize },

    /// Shutdown completed with messages still queued. Reported, never retried.
    #[error("{count} messages left undelivered at shutdown")]
    UndeliverableMessage { count: usize },
}

impl RuntimeError {
    /// Create an index-out-of-bounds error.
    pub fn index_out_of_bounds(index: i64, len: usize, line: u32) -> Self {
        Self::IndexOutOfBounds { index, len, line }
    }

    /// Create a key-not-found error.
    pub fn key_not_found<S: Into<String>>(key: S, line: u32) -> Self {
        Self::KeyNotFound {
            key: key.into(),
            line,
        }
    }

    /// Create a type-mismatch error.
    pub fn type_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a stack-allocation error.
    pub fn stack_allocation_failed(requested: usize) -> Self {
        Self::StackAllocationFailed { requested }
    }

    /// Create an undeliverable-message report.
    pub fn undeliverable(count: usize) -> Self {
        Self::UndeliverableMessage { count }
    }

    /// The source line associated with the fault, when one was recorded.
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::IndexOutOfBounds { line, .. } | Self::KeyNotFound { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
