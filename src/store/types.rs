//! Persisted page records

use std::time::Duration;

use serde::Serialize;

/// Composite key of a cached page
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub document_id: String,
    /// 1-based page number
    pub page_number: u32,
}

impl PageKey {
    pub fn new(document_id: impl Into<String>, page_number: u32) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
        }
    }
}

/// One rendered page as persisted in the store
///
/// At most one record exists per `(document_id, page_number)`; writes overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub document_id: String,
    pub page_number: u32,
    /// Compressed raster (JPEG)
    pub image_data: Vec<u8>,
    /// Pixel width at the render scale used
    pub width: u32,
    /// Pixel height at the render scale used
    pub height: u32,
    /// Creation instant, epoch milliseconds
    pub timestamp: i64,
}

impl CachedPage {
    pub fn key(&self) -> PageKey {
        PageKey::new(self.document_id.clone(), self.page_number)
    }

    /// Age relative to `now_ms`, clamped at zero for clock skew
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp).max(0)
    }
}

/// Secondary index lookups supported by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQuery<'a> {
    /// All pages of one document (by `document_id`)
    Document(&'a str),
    /// The `limit` oldest pages across all documents (by `timestamp`, ascending)
    OldestFirst { limit: usize },
    /// Every page stamped strictly before `cutoff_ms` (by `timestamp`)
    StampedBefore { cutoff_ms: i64 },
}

/// Lifecycle of the underlying storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    /// `init()` has not completed yet
    Pending,
    Ready,
    /// Storage could not be opened; every lookup is a miss
    Unavailable,
}

/// Store diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub status: StoreStatus,
    pub pages: usize,
    pub max_pages: usize,
    pub ttl_secs: u64,
}

impl StoreStats {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
