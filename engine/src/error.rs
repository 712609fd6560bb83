//! Error types for the rowcloud engine.

use thiserror::Error;

/// All possible errors from the rowcloud engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Descriptor errors
    #[error("primary key field '{field}' is not declared by {type_name}")]
    MissingPrimaryKeyField { type_name: String, field: String },

    #[error("primary key field '{field}' must be integer or text, got {got}")]
    InvalidPrimaryKeyType { field: String, got: String },

    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    // Record errors
    #[error("record has no primary key value")]
    UnsetPrimaryKey,

    #[error("invalid primary key '{value}' for field '{field}'")]
    InvalidPrimaryKey { field: String, value: String },

    // Remote metadata errors
    #[error("invalid cloud metadata: {0}")]
    InvalidCloudMeta(String),

    #[error("record type mismatch: expected {expected}, got {got}")]
    RecordTypeMismatch { expected: String, got: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnsetPrimaryKey;
        assert_eq!(err.to_string(), "record has no primary key value");

        let err = Error::InvalidPrimaryKey {
            field: "id".into(),
            value: "abc".into(),
        };
        assert_eq!(err.to_string(), "invalid primary key 'abc' for field 'id'");

        let err = Error::RecordTypeMismatch {
            expected: "Category".into(),
            got: "Task".into(),
        };
        assert_eq!(
            err.to_string(),
            "record type mismatch: expected Category, got Task"
        );
    }
}
