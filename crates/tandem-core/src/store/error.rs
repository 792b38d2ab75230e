//! Store error handling

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Automerge rejected an operation
    #[error("Automerge error: {0}")]
    Automerge(String),

    /// Document structure is missing a required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has an unexpected type
    #[error("Invalid field type for {0}")]
    InvalidType(String),

    /// Record could not be encoded or decoded
    #[error("Invalid record '{id}': {details}")]
    InvalidRecord { id: String, details: String },

    /// Store identity is malformed
    #[error("Invalid store id '{0}'")]
    InvalidId(String),

    /// Another session currently holds write ownership
    #[error("Store is owned by session {owner}; close it before opening another")]
    Busy { owner: u64 },
}

impl From<automerge::AutomergeError> for StoreError {
    fn from(error: automerge::AutomergeError) -> Self {
        StoreError::Automerge(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message() {
        let err = StoreError::Busy { owner: 7 };
        assert!(err.to_string().contains("session 7"));
    }
}
