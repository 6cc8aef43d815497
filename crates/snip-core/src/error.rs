use std::fmt::Display;
use thiserror::Error;

/// Which uniqueness constraint a failed write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// The short code is already taken.
    ShortCode,
    /// A live entity already exists for the same (owner id, original URL) pair.
    DedupKey,
}

impl Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::ShortCode => f.write_str("short code"),
            ConstraintKind::DedupKey => f.write_str("dedup key"),
        }
    }
}

/// A uniqueness violation reported by a repository backend.
///
/// Backends classify violations from structured driver data (the violated
/// constraint's name), never from the human-readable error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// Name of the violated constraint as reported by the backend.
    pub constraint: String,
}

impl ConstraintViolation {
    pub fn short_code(constraint: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::ShortCode,
            constraint: constraint.into(),
        }
    }

    pub fn dedup_key(constraint: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::DedupKey,
            constraint: constraint.into(),
        }
    }
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.constraint)
    }
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("uniqueness violation on {0}")]
    UniqueViolation(ConstraintViolation),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    /// Returns the violation if this error is a uniqueness violation.
    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            StorageError::UniqueViolation(violation) => Some(violation),
            _ => None,
        }
    }

    pub fn is_short_code_collision(&self) -> bool {
        self.violation()
            .is_some_and(|v| v.kind == ConstraintKind::ShortCode)
    }

    pub fn is_dedup_key_collision(&self) -> bool {
        self.violation()
            .is_some_and(|v| v.kind == ConstraintKind::DedupKey)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out: {0}")]
    Timeout(String),
    #[error("cache serialization failed: {0}")]
    Serialization(String),
    #[error("cache value is invalid: {0}")]
    InvalidData(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Error)]
pub enum EventError {
    #[error("event serialization failed: {0}")]
    Serialization(String),
    #[error("event transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("generator state lock is poisoned")]
    StatePoisoned,
    #[error("sequence space exhausted")]
    SequenceExhausted,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}
