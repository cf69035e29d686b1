//! In-memory page backend

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{PageBackend, StorageResult};
use super::types::{CachedPage, IndexQuery, PageKey};

/// Non-durable backend for tests and hosts without disk access
#[derive(Default)]
pub struct MemoryBackend {
    pages: RwLock<BTreeMap<PageKey, CachedPage>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageBackend for MemoryBackend {
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, key: &PageKey) -> StorageResult<Option<CachedPage>> {
        let pages = self.pages.read().await;
        Ok(pages.get(key).cloned())
    }

    async fn put(&self, page: CachedPage) -> StorageResult<()> {
        let mut pages = self.pages.write().await;
        pages.insert(page.key(), page);
        Ok(())
    }

    async fn delete(&self, key: &PageKey) -> StorageResult<()> {
        let mut pages = self.pages.write().await;
        pages.remove(key);
        Ok(())
    }

    async fn list_by_index(&self, query: IndexQuery<'_>) -> StorageResult<Vec<PageKey>> {
        let pages = self.pages.read().await;
        let keys = match query {
            IndexQuery::Document(document_id) => pages
                .keys()
                .filter(|key| key.document_id == document_id)
                .cloned()
                .collect(),
            IndexQuery::OldestFirst { limit } => {
                let mut by_age: Vec<&CachedPage> = pages.values().collect();
                by_age.sort_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then_with(|| a.document_id.cmp(&b.document_id))
                        .then_with(|| a.page_number.cmp(&b.page_number))
                });
                by_age.into_iter().take(limit).map(CachedPage::key).collect()
            }
            IndexQuery::StampedBefore { cutoff_ms } => pages
                .values()
                .filter(|page| page.timestamp < cutoff_ms)
                .map(CachedPage::key)
                .collect(),
        };
        Ok(keys)
    }

    async fn count(&self) -> StorageResult<usize> {
        let pages = self.pages.read().await;
        Ok(pages.len())
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut pages = self.pages.write().await;
        pages.clear();
        Ok(())
    }
}
