//! Error types for key parsing.

use thiserror::Error;

/// Errors that can occur when parsing keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key string is empty.
    #[error("{what} cannot be empty")]
    Empty { what: &'static str },

    /// The key contains whitespace or control characters.
    #[error("invalid {what} '{value}': must not contain whitespace")]
    InvalidCharacters { what: &'static str, value: String },
}

impl KeyError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, KeyError::Empty { .. })
    }
}
