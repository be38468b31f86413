use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no persisted index for document {doc_id}")]
    NotFound { doc_id: String },

    #[error("index artifact {} is unusable: {details}", .artifact.display())]
    CorruptIndex { artifact: PathBuf, details: String },

    #[error("no active document; prepare or activate a document first")]
    NoActiveDocument,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("rerank failed: {0}")]
    Rerank(String),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("indexing was cancelled")]
    Cancelled,

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IndexError {
    pub fn corrupt(artifact: impl Into<PathBuf>, details: impl ToString) -> Self {
        Self::CorruptIndex {
            artifact: artifact.into(),
            details: details.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptIndex { .. })
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by completion backend")]
    RateLimited,

    #[error("invalid response from completion backend ({status}): {details}")]
    BackendResponse { status: u16, details: String },

    #[error("no API key configured for the completion backend")]
    MissingApiKey,

    #[error("completion backend returned no choices")]
    EmptyResponse,

    #[error("generation was cancelled")]
    Cancelled,

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::BackendResponse { status, details } => {
                let lowered = details.to_lowercase();
                *status == 429
                    || lowered.contains("rate limit")
                    || lowered.contains("too many requests")
            }
            Self::Http(error) => error
                .status()
                .is_some_and(|status| status.as_u16() == 429),
            _ => false,
        }
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
