//! PDF Reader Page Cache
//!
//! Caching and prefetch pipeline for a paginated PDF book reader: pages are
//! rendered once through a PDF engine, persisted in a bounded store, and
//! preloaded around the reader's position.
//!
//! # Modules
//!
//! - `store`: Persistent page store (capacity and TTL bounded)
//! - `engine`: PDF engine contract, MuPDF backend behind `mupdf-engine`
//! - `render`: Page renderer (rasterize, encode, write through)
//! - `orchestrator`: Per-document load/preload/cleanup state machine
//! - `visibility`: Intersection-driven loads and text layers
//! - `metrics`: Rolling latency samples

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod render;
pub mod store;
pub mod visibility;

pub use config::ReaderConfig;
pub use engine::{document_id_for_bytes, PdfDocument, PdfEngine};
pub use error::{ReaderError, Result};
pub use metrics::PerformanceMonitor;
pub use orchestrator::{PageOrchestrator, PageState, PageViewState};
pub use render::{PageImage, PageRenderer};
pub use store::{CachedPage, PageStore, StoreStatus};
pub use visibility::{PageSurface, Rect, VisibilityTracker};
