//! MuPDF-backed engine
//!
//! MuPDF documents are not thread-safe. Each page operation opens a fresh
//! document from the shared bytes while holding a per-document mutex, and
//! the page plus document are dropped on `cleanup()`.

use std::sync::Arc;

use mupdf::{Colorspace, Document, Matrix, Page, TextPageOptions};
use parking_lot::{Mutex, MutexGuard};

use super::{
    check_page_range, EngineResult, PdfDocument, PdfEngine, PdfPage, RasterSurface, TextItem,
    Viewport,
};
use crate::error::EngineError;

const PDF_MIME: &str = "application/pdf";

/// Opens PDFs through MuPDF
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfEngine;

impl PdfEngine for MupdfEngine {
    fn open_document(&self, document_id: &str, bytes: Vec<u8>) -> EngineResult<Arc<dyn PdfDocument>> {
        Ok(Arc::new(MupdfDocument::from_bytes(bytes, document_id.to_string())?))
    }
}

/// Document handle that reopens MuPDF state per page
pub struct MupdfDocument {
    id: String,
    data: Arc<Vec<u8>>,
    page_count: u32,
    /// Held by every live `MupdfPage`; MuPDF objects exist only under it
    lock: Mutex<()>,
}

impl MupdfDocument {
    pub fn from_bytes(data: Vec<u8>, id: String) -> EngineResult<Self> {
        let doc = Document::from_bytes(&data, PDF_MIME)?;
        let page_count = u32::try_from(doc.page_count()?)
            .map_err(|_| EngineError::Engine("negative page count".into()))?;

        Ok(Self {
            id,
            data: Arc::new(data),
            page_count,
            lock: Mutex::new(()),
        })
    }
}

impl PdfDocument for MupdfDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page(&self, page_number: u32) -> EngineResult<Box<dyn PdfPage + '_>> {
        check_page_range(self, page_number)?;

        let guard = self.lock.lock();
        let doc = Document::from_bytes(&self.data, PDF_MIME)?;
        let page = doc.load_page(page_number as i32 - 1)?;
        let bounds = page.bounds()?;

        Ok(Box::new(MupdfPage {
            page_number,
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
            page: Some(page),
            doc: Some(doc),
            _guard: guard,
        }))
    }
}

struct MupdfPage<'a> {
    page_number: u32,
    /// Page size in points
    width: f32,
    height: f32,
    // Field order matters: the page drops before its document
    page: Option<Page>,
    doc: Option<Document>,
    _guard: MutexGuard<'a, ()>,
}

impl MupdfPage<'_> {
    fn loaded(&self) -> EngineResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| EngineError::Engine(format!("page {} already released", self.page_number)))
    }
}

impl PdfPage for MupdfPage<'_> {
    fn page_number(&self) -> u32 {
        self.page_number
    }

    fn viewport(&self, scale: f32) -> Viewport {
        Viewport::new(self.width, self.height, scale)
    }

    fn render(&mut self, target: &mut RasterSurface, viewport: &Viewport) -> EngineResult<()> {
        let page = self.loaded()?;

        let matrix = Matrix::new_scale(viewport.scale, viewport.scale);
        let colorspace = Colorspace::device_rgb();
        let pixmap = page.to_pixmap(&matrix, &colorspace, false, true)?;

        target.blit_samples(
            pixmap.samples(),
            pixmap.width() as u32,
            pixmap.height() as u32,
            pixmap.n() as usize,
        );
        Ok(())
    }

    fn text_content(&mut self) -> EngineResult<Vec<TextItem>> {
        let page_height = self.height;
        let page = self.loaded()?;
        let text_page = page.to_text_page(TextPageOptions::empty())?;

        let mut items = Vec::new();
        for block in text_page.blocks() {
            for line in block.lines() {
                let mut text = String::new();
                let mut origin = None;
                let mut font_size = 0.0f32;

                for ch in line.chars() {
                    if let Some(c) = ch.char() {
                        if origin.is_none() {
                            let quad = ch.quad();
                            // Baseline-left in PDF user space (y up)
                            origin = Some((quad.ll.x, page_height - quad.ll.y));
                            font_size = ch.size();
                        }
                        text.push(c);
                    }
                }

                let Some((x, y)) = origin else { continue };
                let bounds = line.bounds();
                items.push(TextItem {
                    text,
                    transform: [font_size, 0.0, 0.0, font_size, x, y],
                    width: bounds.x1 - bounds.x0,
                    height: bounds.y1 - bounds.y0,
                });
            }
        }

        Ok(items)
    }

    fn cleanup(&mut self) {
        self.page.take();
        self.doc.take();
    }
}
