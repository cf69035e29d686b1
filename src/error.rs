//! Error types for the page cache pipeline
//!
//! Failures are page-scoped: a `ReaderError` never aborts the orchestrator,
//! it lands in the affected page's view state or in the log.

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum ReaderError {
    /// The persistent store could not be opened; caching is disabled
    #[error("Page store unavailable: {0}")]
    StorageUnavailable(String),

    /// A single read or write against the store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Rendering a specific page failed
    #[error("Failed to render page {page_number}: {message}")]
    RenderFailure { page_number: u32, message: String },

    /// No document handle is bound to the orchestrator yet
    #[error("No document bound")]
    EngineUnavailable,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ReaderError {
    /// Wrap an engine error as a render failure for `page_number`
    pub fn render_failure(page_number: u32, err: impl std::fmt::Display) -> Self {
        ReaderError::RenderFailure {
            page_number,
            message: err.to_string(),
        }
    }
}

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// PDF engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Task join error: {0}")]
    Join(String),
}

#[cfg(feature = "mupdf-engine")]
impl From<mupdf::Error> for EngineError {
    fn from(err: mupdf::Error) -> Self {
        EngineError::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_failure_carries_page_number() {
        let err = ReaderError::render_failure(5, EngineError::Engine("boom".into()));
        match &err {
            ReaderError::RenderFailure { page_number, message } => {
                assert_eq!(*page_number, 5);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "Failed to render page 5: Engine error: boom");
    }

    #[test]
    fn test_storage_error_converts() {
        let err: ReaderError = StorageError::Backend("disk full".into()).into();
        assert!(matches!(err, ReaderError::Storage(StorageError::Backend(_))));
    }
}
