//! Page orchestrator
//!
//! Decides what to load, in what order, and what to forget for one open
//! document. Loads go to the page store first and fall back to the
//! renderer; results land in an owned page table that the UI observes
//! through `subscribe()` and reads through `get_page()`.
//!
//! ```text
//! set_current_page(n)
//!   ├─► preload_pages(n)   [n, n+1..n+r, n-1..n-r] ─► request_page ─► spawn(load)
//!   └─► schedule_cleanup   sleep(delay) ─► cleanup_distant_pages(n)
//!
//! load:  store.get_page ── hit ──► Loaded
//!              │ miss / error
//!              ▼
//!        renderer.render_page ──► Loaded | Failed
//! ```

mod plan;
mod state;

pub use plan::{is_distant, preload_order};
pub use state::{PageState, PageViewState};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::PreloadConfig;
use crate::engine::PdfDocument;
use crate::error::{ReaderError, Result};
use crate::metrics::{self, PerformanceMonitor};
use crate::render::{PageImage, PageRenderer};
use crate::store::{PageStore, StoreStatus};

use state::{Claim, PageTable, Ticket};

enum Begin {
    /// This caller runs the load
    Run(Arc<dyn PdfDocument>, Ticket),
    /// An earlier load for the same document now fills the page
    Joined,
}

/// Cheap, cloneable handle; clones share one page table
#[derive(Clone)]
pub struct PageOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    store: PageStore,
    renderer: PageRenderer,
    config: PreloadConfig,
    monitor: PerformanceMonitor,
    document: RwLock<Option<Arc<dyn PdfDocument>>>,
    table: Mutex<PageTable>,
    current_page: AtomicU32,
    disposed: AtomicBool,
    /// Bumped after every table mutation
    version: watch::Sender<u64>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl PageOrchestrator {
    pub fn new(
        store: PageStore,
        renderer: PageRenderer,
        config: PreloadConfig,
        monitor: PerformanceMonitor,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                renderer: renderer.with_monitor(monitor.clone()),
                config,
                monitor,
                document: RwLock::new(None),
                table: Mutex::new(PageTable::default()),
                current_page: AtomicU32::new(0),
                disposed: AtomicBool::new(false),
                version,
                cleanup_task: Mutex::new(None),
            }),
        }
    }

    /// Attach a document. Any state from a previous document is dropped and
    /// its outstanding loads are discarded. Loads still running for the same
    /// document are joined by the next request instead of repeated.
    pub fn bind_document(&self, document: Arc<dyn PdfDocument>) {
        tracing::info!(
            document_id = %document.id(),
            pages = document.page_count(),
            "Document bound"
        );
        self.cancel_cleanup();
        self.inner.table.lock().rebind(Some(document.id()));
        *self.inner.document.write() = Some(document);
        self.inner.current_page.store(0, Ordering::SeqCst);
        self.publish();
    }

    pub fn unbind_document(&self) -> Option<Arc<dyn PdfDocument>> {
        let previous = self.inner.document.write().take();
        self.cancel_cleanup();
        self.inner.table.lock().rebind(None);
        self.publish();
        previous
    }

    pub fn document(&self) -> Option<Arc<dyn PdfDocument>> {
        self.inner.document.read().clone()
    }

    fn bound_document(&self) -> Result<Arc<dyn PdfDocument>> {
        self.document().ok_or(ReaderError::EngineUnavailable)
    }

    pub fn store(&self) -> &PageStore {
        &self.inner.store
    }

    pub fn renderer(&self) -> &PageRenderer {
        &self.inner.renderer
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.inner.config
    }

    pub fn current_page(&self) -> u32 {
        self.inner.current_page.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Current state version; bumps on every page state change
    pub fn version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    fn publish(&self) {
        self.inner.version.send_modify(|version| *version += 1);
    }

    /// View state for a page; never-requested pages read as absent
    pub fn get_page(&self, page_number: u32) -> PageViewState {
        let state = self.inner.table.lock().state(page_number);
        PageViewState::from_state(page_number, &state)
    }

    pub fn page_state(&self, page_number: u32) -> PageState {
        self.inner.table.lock().state(page_number)
    }

    /// Every tracked page in page order
    pub fn snapshot(&self) -> Vec<PageViewState> {
        self.inner.table.lock().views()
    }

    pub fn loaded_pages(&self) -> Vec<u32> {
        self.inner.table.lock().loaded_pages()
    }

    pub fn is_in_flight(&self, page_number: u32) -> bool {
        self.inner.table.lock().is_in_flight(page_number)
    }

    /// Claim `page_number` for loading if every precondition holds
    fn try_begin(&self, page_number: u32) -> Option<Begin> {
        if self.is_disposed() {
            return None;
        }

        let document = match self.bound_document() {
            Ok(document) => document,
            Err(e) => {
                tracing::debug!(page = page_number, error = %e, "Load skipped");
                return None;
            }
        };

        if page_number == 0 || page_number > document.page_count() {
            tracing::debug!(
                page = page_number,
                pages = document.page_count(),
                "Load skipped, page out of range"
            );
            return None;
        }

        if self.inner.store.status() == StoreStatus::Pending {
            tracing::debug!(page = page_number, "Load skipped, page store not initialized");
            return None;
        }

        let claim = self
            .inner
            .table
            .lock()
            .begin_load(document.id(), page_number);
        let begin = match claim {
            Claim::Started(ticket) => Begin::Run(document, ticket),
            Claim::Joined => {
                tracing::debug!(page = page_number, "Joined load started before rebind");
                Begin::Joined
            }
            Claim::Busy => {
                tracing::trace!(page = page_number, "Load already in flight");
                return None;
            }
        };
        self.publish();
        Some(begin)
    }

    /// Load one page and wait for it to settle
    ///
    /// No-op when the page is already in flight, the store is not yet
    /// initialized, or no document is bound.
    pub async fn load_page(&self, page_number: u32) {
        if let Some(Begin::Run(document, ticket)) = self.try_begin(page_number) {
            self.run_load(document, page_number, ticket).await;
        }
    }

    /// Start loading a page in the background. Returns false if the
    /// request was dropped; joining a load already running for the same
    /// document counts as accepted.
    pub fn request_page(&self, page_number: u32) -> bool {
        let (document, ticket) = match self.try_begin(page_number) {
            Some(Begin::Run(document, ticket)) => (document, ticket),
            Some(Begin::Joined) => return true,
            None => return false,
        };

        let this = self.clone();
        tokio::spawn(async move {
            this.run_load(document, page_number, ticket).await;
        });
        true
    }

    async fn run_load(&self, document: Arc<dyn PdfDocument>, page_number: u32, ticket: Ticket) {
        let timer = self.inner.monitor.time(metrics::LOAD);
        let outcome = self.fetch(document.clone(), page_number).await;

        let outcome = match outcome {
            Ok(image) => Ok(image),
            Err(e) => {
                timer.cancel();
                Err(e.to_string())
            }
        };

        let applied = self
            .inner
            .table
            .lock()
            .complete(document.id(), page_number, ticket, outcome);
        if !applied {
            tracing::debug!(page = page_number, "Discarded stale load result");
        }
        // Also wakes wait_idle when a stale entry is released
        self.publish();
    }

    async fn fetch(&self, document: Arc<dyn PdfDocument>, page_number: u32) -> Result<PageImage> {
        let store = &self.inner.store;

        if store.is_ready() {
            let timer = self.inner.monitor.time(metrics::CACHE_HIT);
            match store.get_page(document.id(), page_number).await {
                Ok(Some(page)) => {
                    drop(timer);
                    tracing::debug!(
                        document_id = %document.id(),
                        page = page_number,
                        "Cache hit"
                    );
                    return Ok(PageImage::from_cached(page));
                }
                Ok(None) => timer.cancel(),
                Err(e) => {
                    timer.cancel();
                    tracing::warn!(
                        document_id = %document.id(),
                        page = page_number,
                        error = %e,
                        "Cache lookup failed, rendering"
                    );
                }
            }
        }

        let cache = store.is_ready().then_some(store);
        self.inner
            .renderer
            .render_page(document, page_number, cache)
            .await
    }

    /// Issue loads around `current_page` in priority order
    ///
    /// Returns the pages actually issued. Loads complete in any order.
    pub fn preload_pages(&self, current_page: u32) -> Vec<u32> {
        if self.is_disposed() || self.inner.store.status() == StoreStatus::Pending {
            return Vec::new();
        }
        let Some(document) = self.document() else {
            return Vec::new();
        };

        let order = preload_order(
            current_page,
            self.inner.config.preload_range,
            document.page_count(),
        );

        let candidates: Vec<u32> = {
            let table = self.inner.table.lock();
            order
                .into_iter()
                .filter(|&page| !table.is_loaded(page) && !table.is_in_flight(page))
                .collect()
        };

        let issued: Vec<u32> = candidates
            .into_iter()
            .filter(|&page| self.request_page(page))
            .collect();

        if !issued.is_empty() {
            tracing::debug!(current_page, ?issued, "Preloading pages");
        }
        issued
    }

    /// Forget in-memory pages beyond `preload_range + cleanup_slack` of
    /// `current_page`. Persisted pages are untouched.
    pub fn cleanup_distant_pages(&self, current_page: u32) -> Vec<u32> {
        let retain = self.inner.config.retain_distance();
        let removed = self
            .inner
            .table
            .lock()
            .prune(|page| is_distant(page, current_page, retain));

        if !removed.is_empty() {
            tracing::debug!(current_page, ?removed, "Pruned distant pages");
            self.publish();
        }
        removed
    }

    /// Record the reading position, preload around it, and debounce cleanup
    ///
    /// Returns the pages issued for loading.
    pub fn set_current_page(&self, page_number: u32) -> Vec<u32> {
        if self.is_disposed() {
            return Vec::new();
        }

        let page_number = match self.document() {
            Some(document) => page_number.clamp(1, document.page_count().max(1)),
            None => page_number,
        };
        self.inner.current_page.store(page_number, Ordering::SeqCst);

        let issued = self.preload_pages(page_number);
        self.schedule_cleanup(page_number);
        issued
    }

    fn schedule_cleanup(&self, current_page: u32) {
        let this = self.clone();
        let delay = self.inner.config.cleanup_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_disposed() {
                this.cleanup_distant_pages(current_page);
            }
        });

        if let Some(previous) = self.inner.cleanup_task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_cleanup(&self) {
        if let Some(task) = self.inner.cleanup_task.lock().take() {
            task.abort();
        }
    }

    /// Evict a page from memory and the store, then load it again
    ///
    /// Skipped while a load for the page is still in flight. The page is
    /// claimed before the store entry is dropped, so requests arriving in
    /// between cannot serve the stale copy.
    pub async fn reload_page(&self, page_number: u32) {
        let Some(Begin::Run(document, ticket)) = self.try_begin(page_number) else {
            tracing::debug!(page = page_number, "Reload skipped");
            return;
        };

        if self.inner.store.is_ready() {
            if let Err(e) = self.inner.store.delete_page(document.id(), page_number).await {
                tracing::warn!(
                    document_id = %document.id(),
                    page = page_number,
                    error = %e,
                    "Failed to evict page before reload"
                );
            }
        }

        tracing::debug!(document_id = %document.id(), page = page_number, "Reloading page");
        self.run_load(document, page_number, ticket).await;
    }

    /// Wait until no load is in flight
    pub async fn wait_idle(&self) {
        let mut changes = self.subscribe();
        loop {
            if self.inner.table.lock().in_flight_count() == 0 {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Unmount: later loads are no-ops and outstanding results are discarded
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_cleanup();
        self.inner.table.lock().reset();
        self.publish();
        tracing::debug!("Orchestrator disposed");
    }

    /// Dispose and drop the document's persisted pages
    pub async fn close_document(&self) -> Result<usize> {
        self.dispose();
        let Some(document) = self.inner.document.write().take() else {
            return Ok(0);
        };
        if !self.inner.store.is_ready() {
            return Ok(0);
        }

        let removed = self.inner.store.delete_document(document.id()).await?;
        tracing::info!(document_id = %document.id(), removed, "Document closed");
        Ok(removed)
    }
}
