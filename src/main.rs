//! PDF Reader Cache
//!
//! Opens a PDF, warms the persistent page cache around a starting page and
//! prints the resulting page states, store stats and latency summary.
//!
//! Usage: `pdf-reader-cache <file.pdf> [page]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdf_reader_cache::engine::{document_id_for_bytes, MupdfEngine, PdfEngine};
use pdf_reader_cache::metrics::MetricSummary;
use pdf_reader_cache::store::StoreStats;
use pdf_reader_cache::{
    PageOrchestrator, PageRenderer, PageStore, PageViewState, PerformanceMonitor, ReaderConfig,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageSummary {
    page_number: u32,
    loaded: bool,
    width: Option<u32>,
    height: Option<u32>,
    bytes: Option<usize>,
    error: Option<String>,
}

impl From<&PageViewState> for PageSummary {
    fn from(view: &PageViewState) -> Self {
        Self {
            page_number: view.page_number,
            loaded: view.image_url.is_some(),
            width: view.image_url.as_ref().map(|image| image.width()),
            height: view.image_url.as_ref().map(|image| image.height()),
            bytes: view.image_url.as_ref().map(|image| image.data().len()),
            error: view.error.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    document_id: String,
    page_count: u32,
    current_page: u32,
    pages: Vec<PageSummary>,
    store: StoreStats,
    metrics: std::collections::BTreeMap<String, MetricSummary>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_reader_cache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let config = ReaderConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        ReaderConfig::default()
    });

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: pdf-reader-cache <file.pdf> [page]");
    };
    let start_page: u32 = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid page number {raw:?}"))?,
        None => 1,
    };

    tracing::info!("Starting PDF reader cache v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Page store: {}", config.store.database_url);

    let store = PageStore::sqlite(&config.store);
    match store.init().await {
        Ok(()) => match store.purge_expired().await {
            Ok(purged) if purged > 0 => tracing::info!("Purged {} expired pages", purged),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to purge expired pages: {}", e),
        },
        Err(e) => tracing::warn!("Continuing without page cache: {}", e),
    }

    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document_id = document_id_for_bytes(&bytes);

    let document = tokio::task::spawn_blocking({
        let document_id = document_id.clone();
        move || MupdfEngine.open_document(&document_id, bytes)
    })
    .await
    .context("engine task failed")?
    .with_context(|| format!("failed to open {}", path.display()))?;

    let monitor = PerformanceMonitor::new();
    let orchestrator = PageOrchestrator::new(
        store.clone(),
        PageRenderer::new(config.render),
        config.preload.clone(),
        monitor.clone(),
    );
    orchestrator.bind_document(Arc::clone(&document));

    orchestrator.set_current_page(start_page);
    orchestrator.wait_idle().await;
    store.settle().await;

    let report = Report {
        document_id,
        page_count: document.page_count(),
        current_page: orchestrator.current_page(),
        pages: orchestrator.snapshot().iter().map(PageSummary::from).collect(),
        store: store.stats().await,
        metrics: monitor.summaries(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    orchestrator.dispose();
    Ok(())
}
