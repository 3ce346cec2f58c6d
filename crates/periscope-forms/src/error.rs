//! Form error types.

use thiserror::Error;

/// Errors raised by form edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    /// No field with this name exists in the session.
    #[error("Unknown form field: {0}")]
    UnknownField(String),

    /// The value does not fit the field's kind.
    #[error("Field {field} expects a {expected} value")]
    KindMismatch {
        /// Field name.
        field: String,
        /// Kind the field expects.
        expected: &'static str,
    },

    /// An element-level edit was applied to a non-array field.
    #[error("Field {0} is not an array field")]
    NotAnArray(String),

    /// An array element index is out of range.
    #[error("Index {index} out of range for field {field} ({len} elements)")]
    IndexOutOfRange {
        /// Field name.
        field: String,
        /// Requested index.
        index: usize,
        /// Current element count.
        len: usize,
    },
}

/// Result type for form operations.
pub type FormResult<T> = Result<T, FormError>;
