//! Key-value interface the page store runs on

use async_trait::async_trait;

use super::types::{CachedPage, IndexQuery, PageKey};
use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Async key-value backend for cached pages
///
/// Implementations: `SqliteBackend` (durable) and `MemoryBackend`.
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Open or create the storage and its indexes. Must be idempotent.
    async fn init(&self) -> StorageResult<()>;

    async fn get(&self, key: &PageKey) -> StorageResult<Option<CachedPage>>;

    /// Upsert by `(document_id, page_number)`
    async fn put(&self, page: CachedPage) -> StorageResult<()>;

    /// Remove one page; missing keys are not an error
    async fn delete(&self, key: &PageKey) -> StorageResult<()>;

    /// Keys matching a secondary index lookup
    async fn list_by_index(&self, query: IndexQuery<'_>) -> StorageResult<Vec<PageKey>>;

    async fn count(&self) -> StorageResult<usize>;

    async fn clear(&self) -> StorageResult<()>;
}
