//! Page renderer
//!
//! Rasterizes one page through the engine, encodes it as JPEG, writes it
//! through to the page store and hands back a display-ready `PageImage`.
//! Engine work runs on the blocking pool.

mod resource;

pub use resource::{PageImage, JPEG_MIME};

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::config::RenderOptions;
use crate::engine::{
    check_page_range, EngineResult, PdfDocument, PdfPage, RasterSurface, TextItem, Viewport,
};
use crate::error::{EngineError, ReaderError, Result};
use crate::metrics::{self, PerformanceMonitor};
use crate::store::PageStore;

/// Encoded page ready for the store
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub page_number: u32,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone)]
pub struct PageRenderer {
    options: RenderOptions,
    monitor: Option<PerformanceMonitor>,
}

impl PageRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: PerformanceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Render `page_number` and write it through to `store`
    ///
    /// Engine and encoding errors become `RenderFailure`. A failed store
    /// write is logged and the image is still returned.
    pub async fn render_page(
        &self,
        document: Arc<dyn PdfDocument>,
        page_number: u32,
        store: Option<&PageStore>,
    ) -> Result<PageImage> {
        let timer = self.monitor.as_ref().map(|m| m.time(metrics::RENDER));
        let options = self.options;
        let doc = Arc::clone(&document);

        let rendered = tokio::task::spawn_blocking(move || {
            rasterize_page(doc.as_ref(), page_number, options)
        })
        .await
        .map_err(|e| EngineError::Join(e.to_string()))
        .and_then(|result| result);

        let encoded = match rendered {
            Ok(encoded) => encoded,
            Err(e) => {
                if let Some(timer) = timer {
                    timer.cancel();
                }
                tracing::warn!(
                    document_id = %document.id(),
                    page = page_number,
                    error = %e,
                    "Page render failed"
                );
                return Err(ReaderError::render_failure(page_number, e));
            }
        };
        drop(timer);

        let image = PageImage::from_jpeg(
            page_number,
            encoded.data,
            encoded.width,
            encoded.height,
        );

        if let Some(store) = store {
            if let Err(e) = store
                .save_page(
                    document.id(),
                    page_number,
                    image.data().to_vec(),
                    image.width(),
                    image.height(),
                )
                .await
            {
                tracing::warn!(
                    document_id = %document.id(),
                    page = page_number,
                    error = %e,
                    "Failed to cache rendered page"
                );
            }
        }

        tracing::debug!(
            document_id = %document.id(),
            page = page_number,
            width = image.width(),
            height = image.height(),
            bytes = image.data().len(),
            "Rendered page"
        );
        Ok(image)
    }

    /// Positioned text for `page_number` and the viewport it should be laid
    /// out against
    pub async fn page_text(
        &self,
        document: Arc<dyn PdfDocument>,
        page_number: u32,
    ) -> Result<(Viewport, Vec<TextItem>)> {
        let scale = self.options.scale;

        tokio::task::spawn_blocking(move || extract_text(document.as_ref(), page_number, scale))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))
            .and_then(|result| result)
            .map_err(|e| ReaderError::render_failure(page_number, e))
    }
}

/// Blocking render of one page. The engine page is released before
/// returning, whether or not rendering succeeded.
pub fn rasterize_page(
    document: &dyn PdfDocument,
    page_number: u32,
    options: RenderOptions,
) -> EngineResult<EncodedPage> {
    check_page_range(document, page_number)?;

    let mut page = document.page(page_number)?;
    let result = draw_and_encode(page.as_mut(), options);
    page.cleanup();
    result
}

fn draw_and_encode(page: &mut dyn PdfPage, options: RenderOptions) -> EngineResult<EncodedPage> {
    let viewport = page.viewport(options.scale);
    let mut surface = RasterSurface::for_viewport(&viewport);
    page.render(&mut surface, &viewport)?;

    let data = encode_jpeg(&surface, options.image_quality)?;
    Ok(EncodedPage {
        page_number: page.page_number(),
        data,
        width: surface.width(),
        height: surface.height(),
    })
}

/// Encode an opaque surface as baseline JPEG; `quality` is in (0, 1]
pub fn encode_jpeg(surface: &RasterSurface, quality: f32) -> EngineResult<Vec<u8>> {
    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).write_image(
        surface.pixels().as_raw(),
        surface.width(),
        surface.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Blocking text extraction for one page
pub fn extract_text(
    document: &dyn PdfDocument,
    page_number: u32,
    scale: f32,
) -> EngineResult<(Viewport, Vec<TextItem>)> {
    check_page_range(document, page_number)?;

    let mut page = document.page(page_number)?;
    let viewport = page.viewport(scale);
    let items = page.text_content();
    page.cleanup();
    Ok((viewport, items?))
}
