use snip_core::{CoreError, GenerationError, ShortCode, StorageError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

/// Why a URL was refused before anything was stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("url is empty")]
    Empty,
    #[error("url is malformed: {0}")]
    Malformed(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    MissingHost,
    #[error("host is blacklisted: {0}")]
    Blacklisted(String),
    #[error("owner id must be positive, got {0}")]
    InvalidOwner(i64),
    #[error("expiry of {0} seconds is out of range")]
    InvalidExpiry(i64),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    Validation(#[from] ValidationError),
    #[error("url rejected by safety check")]
    UnsafeUrl,
    #[error("dedup lookup failed: {0}")]
    DedupCheck(StorageError),
    #[error("failed to persist url: {0}")]
    Persist(StorageError),
    #[error("repository error: {0}")]
    Repository(StorageError),
    #[error("short code generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("every candidate code was taken after {probes} probes")]
    GenerationExhausted { probes: usize },
    #[error("could not create a short url after {attempts} attempts")]
    CreationExhausted { attempts: usize },
    #[error("short url not found: {0}")]
    NotFound(ShortCode),
}

impl ShortenerError {
    /// Client-caused errors that are safe to surface verbatim.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ShortenerError::Validation(_) | ShortenerError::UnsafeUrl | ShortenerError::NotFound(_)
        )
    }
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => {
                Self::Validation(ValidationError::InvalidShortCode(message))
            }
        }
    }
}
