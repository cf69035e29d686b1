//! Persistent page store
//!
//! Durable, capacity- and freshness-bounded cache for rendered pages. It is
//! independent of any open document handle, so pages survive across reader
//! sessions.
//!
//! # Policies
//!
//! - **Freshness**: a page older than the TTL is treated as absent and is
//!   deleted by the lookup that found it.
//! - **Capacity**: after every write a background task trims the store back
//!   to `max_cache_size`, oldest timestamp first, across all documents.
//!
//! ```text
//! save_page ──► backend.put ──► spawn(enforce_capacity)
//!                                   │
//!                                   ▼
//!                 count > max ? delete oldest (count - max)
//! ```

mod backend;
mod memory;
mod schema;
mod sqlite;
mod types;

pub use backend::{PageBackend, StorageResult};
pub use memory::MemoryBackend;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteBackend;
pub use types::{CachedPage, IndexQuery, PageKey, StoreStats, StoreStatus};

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{ReaderError, Result};

/// Shared handle to the page store
///
/// One instance per running application, created at startup and shared by
/// every orchestrator; `document_id` isolates documents from each other.
#[derive(Clone)]
pub struct PageStore {
    inner: Arc<PageStoreInner>,
}

struct PageStoreInner {
    backend: Box<dyn PageBackend>,
    clock: Arc<dyn Clock>,
    max_cache_size: usize,
    ttl: Duration,
    status: RwLock<StoreStatus>,
    /// Serializes `init()` calls
    init_lock: Mutex<()>,
    /// Serializes capacity enforcement so concurrent runs never over-evict
    eviction_lock: Mutex<()>,
    /// Capacity enforcement tasks spawned by writes
    pending: Mutex<JoinSet<()>>,
}

impl PageStore {
    /// Create a store over `backend` using the wall clock
    pub fn new(backend: impl PageBackend + 'static, config: &StoreConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: impl PageBackend + 'static,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(PageStoreInner {
                backend: Box::new(backend),
                clock,
                max_cache_size: config.max_cache_size.max(1),
                ttl: config.cache_ttl,
                status: RwLock::new(StoreStatus::Pending),
                init_lock: Mutex::new(()),
                eviction_lock: Mutex::new(()),
                pending: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// SQLite-backed store at `config.database_url`
    pub fn sqlite(config: &StoreConfig) -> Self {
        Self::new(SqliteBackend::new(config.database_url.clone()), config)
    }

    /// Non-durable store
    pub fn in_memory(config: &StoreConfig) -> Self {
        Self::new(MemoryBackend::new(), config)
    }

    /// Open the underlying storage. Idempotent.
    ///
    /// On failure the store is marked unavailable and callers should treat
    /// every lookup as a miss; a later call retries.
    pub async fn init(&self) -> Result<()> {
        let _guard = self.inner.init_lock.lock().await;

        if self.status() == StoreStatus::Ready {
            return Ok(());
        }

        match self.inner.backend.init().await {
            Ok(()) => {
                *self.inner.status.write() = StoreStatus::Ready;
                tracing::debug!(
                    max_pages = self.inner.max_cache_size,
                    ttl_secs = self.inner.ttl.as_secs(),
                    "Page store ready"
                );
                Ok(())
            }
            Err(e) => {
                *self.inner.status.write() = StoreStatus::Unavailable;
                tracing::warn!(error = %e, "Page store unavailable, caching disabled");
                Err(ReaderError::StorageUnavailable(e.to_string()))
            }
        }
    }

    pub fn status(&self) -> StoreStatus {
        *self.inner.status.read()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == StoreStatus::Ready
    }

    pub fn max_cache_size(&self) -> usize {
        self.inner.max_cache_size
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.status() {
            StoreStatus::Ready => Ok(()),
            StoreStatus::Pending => Err(ReaderError::StorageUnavailable(
                "page store not initialized".into(),
            )),
            StoreStatus::Unavailable => Err(ReaderError::StorageUnavailable(
                "page store could not be opened".into(),
            )),
        }
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.inner.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Upsert a rendered page stamped with the current time
    ///
    /// Capacity enforcement runs in the background afterwards and may delete
    /// other pages.
    pub async fn save_page(
        &self,
        document_id: &str,
        page_number: u32,
        image_data: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.ensure_ready()?;

        let page = CachedPage {
            document_id: document_id.to_string(),
            page_number,
            image_data,
            width,
            height,
            timestamp: self.inner.clock.now_ms(),
        };
        let bytes = page.image_data.len();
        self.inner.backend.put(page).await?;

        tracing::debug!(
            document_id = %document_id,
            page = page_number,
            bytes,
            "Cached page"
        );

        let store = self.clone();
        let mut pending = self.inner.pending.lock().await;
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = store.enforce_capacity().await {
                tracing::warn!(error = %e, "Capacity enforcement failed");
            }
        });

        Ok(())
    }

    /// Fetch a fresh page; expired entries are deleted and reported as absent
    pub async fn get_page(&self, document_id: &str, page_number: u32) -> Result<Option<CachedPage>> {
        self.ensure_ready()?;

        let key = PageKey::new(document_id, page_number);
        let Some(page) = self.inner.backend.get(&key).await? else {
            return Ok(None);
        };

        let age_ms = page.age_ms(self.inner.clock.now_ms());
        if age_ms < self.ttl_ms() {
            return Ok(Some(page));
        }

        tracing::debug!(
            document_id = %document_id,
            page = page_number,
            age_ms,
            "Cached page expired"
        );
        self.inner.backend.delete(&key).await?;
        Ok(None)
    }

    /// Remove one page. Idempotent.
    pub async fn delete_page(&self, document_id: &str, page_number: u32) -> Result<()> {
        self.ensure_ready()?;
        self.inner
            .backend
            .delete(&PageKey::new(document_id, page_number))
            .await?;
        Ok(())
    }

    /// Remove every page of a document, returning how many were deleted
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.ensure_ready()?;

        let keys = self
            .inner
            .backend
            .list_by_index(IndexQuery::Document(document_id))
            .await?;
        let count = keys.len();
        self.delete_keys(&keys).await?;

        tracing::debug!(document_id = %document_id, count, "Removed cached document");
        Ok(count)
    }

    async fn delete_keys(&self, keys: &[PageKey]) -> Result<()> {
        let backend = &self.inner.backend;
        try_join_all(keys.iter().map(|key| backend.delete(key))).await?;
        Ok(())
    }

    /// Total persisted page count
    pub async fn size(&self) -> Result<usize> {
        self.ensure_ready()?;
        Ok(self.inner.backend.count().await?)
    }

    /// Remove all entries
    pub async fn clear(&self) -> Result<()> {
        self.ensure_ready()?;
        self.inner.backend.clear().await?;
        tracing::info!("Page store cleared");
        Ok(())
    }

    /// Trim the store to `max_cache_size`, deleting oldest pages first
    ///
    /// Returns the number of evicted pages. Eviction is global across
    /// documents.
    pub async fn enforce_capacity(&self) -> Result<usize> {
        self.ensure_ready()?;
        let _guard = self.inner.eviction_lock.lock().await;

        let count = self.inner.backend.count().await?;
        if count <= self.inner.max_cache_size {
            return Ok(0);
        }

        let excess = count - self.inner.max_cache_size;
        let victims = self
            .inner
            .backend
            .list_by_index(IndexQuery::OldestFirst { limit: excess })
            .await?;
        self.delete_keys(&victims).await?;

        tracing::debug!(
            evicted = victims.len(),
            max_pages = self.inner.max_cache_size,
            "Evicted oldest cached pages"
        );
        Ok(victims.len())
    }

    /// Delete every expired entry in one pass
    pub async fn purge_expired(&self) -> Result<usize> {
        self.ensure_ready()?;

        let cutoff_ms = self.inner.clock.now_ms().saturating_sub(self.ttl_ms());
        // Entries at exactly the cutoff are already expired (age == ttl)
        let keys = self
            .inner
            .backend
            .list_by_index(IndexQuery::StampedBefore {
                cutoff_ms: cutoff_ms.saturating_add(1),
            })
            .await?;
        self.delete_keys(&keys).await?;

        if !keys.is_empty() {
            tracing::info!(purged = keys.len(), "Purged expired pages");
        }
        Ok(keys.len())
    }

    /// Wait for background capacity enforcement spawned by earlier writes
    pub async fn settle(&self) {
        let mut pending = self.inner.pending.lock().await;
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Capacity enforcement task failed");
            }
        }
    }

    pub async fn stats(&self) -> StoreStats {
        let status = self.status();
        let pages = match status {
            StoreStatus::Ready => self.inner.backend.count().await.unwrap_or(0),
            _ => 0,
        };

        StoreStats {
            status,
            pages,
            max_pages: self.inner.max_cache_size,
            ttl_secs: self.inner.ttl.as_secs(),
        }
    }
}
