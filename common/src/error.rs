use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Core internal errors shared by every crate in the workspace.
///
/// Variants follow the service error taxonomy: validation/auth/quota errors
/// originate at the HTTP boundary, `StorageUnavailable`/`EmbedUnavailable`/
/// `IndexUnavailable` are transient provider failures the job runner may
/// retry, and `ParseFailed`/`Config` are terminal.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("LLM provider error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Parse failed: {0}")]
    ParseFailed(String),
    #[error("Embedding provider unavailable: {0}")]
    EmbedUnavailable(String),
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),
    #[error("LLM timed out: {0}")]
    LlmTimeout(String),
    #[error("Event bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a failed job carrying this error should be requeued with
    /// backoff rather than finalized as failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::EmbedUnavailable(_)
                | Self::IndexUnavailable(_)
                | Self::BusUnavailable(_)
                | Self::Database(_)
                | Self::Io(_)
        )
    }
}

impl From<object_store::Error> for AppError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(AppError::StorageUnavailable("s3 down".into()).is_retryable());
        assert!(AppError::EmbedUnavailable("timeout".into()).is_retryable());
        assert!(AppError::IndexUnavailable("index".into()).is_retryable());
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        assert!(!AppError::ParseFailed("bad pdf".into()).is_retryable());
        assert!(!AppError::Validation("empty query".into()).is_retryable());
        assert!(!AppError::PayloadTooLarge("34MB".into()).is_retryable());
        assert!(!AppError::Config("dim mismatch".into()).is_retryable());
    }

    #[test]
    fn object_store_not_found_maps_to_not_found() {
        let err = object_store::Error::NotFound {
            path: "t1/1/abc.pdf".into(),
            source: "gone".into(),
        };
        assert!(matches!(AppError::from(err), AppError::NotFound(_)));
    }
}
