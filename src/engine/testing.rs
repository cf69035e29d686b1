//! Scripted engine for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::Rgb;
use parking_lot::{Condvar, Mutex};

use super::{check_page_range, EngineResult, PdfDocument, PdfPage, RasterSurface, TextItem, Viewport};
use crate::error::EngineError;

/// Letter-size page in points
pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

/// Blocks renders until opened
#[derive(Default)]
pub struct RenderGate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl RenderGate {
    pub fn close(&self) {
        *self.closed.lock() = true;
    }

    pub fn open(&self) {
        *self.closed.lock() = false;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.changed.wait(&mut closed);
        }
    }
}

pub struct MockDocument {
    id: String,
    page_count: u32,
    renders: AtomicUsize,
    text_fetches: AtomicUsize,
    cleanups: AtomicUsize,
    failing: Mutex<HashSet<u32>>,
    rendered_pages: Mutex<Vec<u32>>,
    pub gate: RenderGate,
}

impl MockDocument {
    pub fn new(id: &str, page_count: u32) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            page_count,
            renders: AtomicUsize::new(0),
            text_fetches: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            rendered_pages: Mutex::new(Vec::new()),
            gate: RenderGate::default(),
        })
    }

    pub fn fail_page(&self, page_number: u32) {
        self.failing.lock().insert(page_number);
    }

    pub fn heal_page(&self, page_number: u32) {
        self.failing.lock().remove(&page_number);
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn text_fetch_count(&self) -> usize {
        self.text_fetches.load(Ordering::SeqCst)
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn rendered_pages(&self) -> Vec<u32> {
        self.rendered_pages.lock().clone()
    }
}

impl PdfDocument for MockDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page(&self, page_number: u32) -> EngineResult<Box<dyn PdfPage + '_>> {
        check_page_range(self, page_number)?;
        Ok(Box::new(MockPage {
            doc: self,
            page_number,
            released: false,
        }))
    }
}

struct MockPage<'a> {
    doc: &'a MockDocument,
    page_number: u32,
    released: bool,
}

impl PdfPage for MockPage<'_> {
    fn page_number(&self) -> u32 {
        self.page_number
    }

    fn viewport(&self, scale: f32) -> Viewport {
        Viewport::new(PAGE_WIDTH, PAGE_HEIGHT, scale)
    }

    fn render(&mut self, target: &mut RasterSurface, _viewport: &Viewport) -> EngineResult<()> {
        self.doc.gate.wait();
        self.doc.renders.fetch_add(1, Ordering::SeqCst);
        self.doc.rendered_pages.lock().push(self.page_number);

        if self.doc.failing.lock().contains(&self.page_number) {
            return Err(EngineError::Engine(format!(
                "corrupt content stream on page {}",
                self.page_number
            )));
        }

        // A dark band whose height depends on the page number
        let shade = (self.page_number % 200) as u8;
        let band = (self.page_number * 4).min(target.height());
        for y in 0..band {
            for x in 0..target.width() {
                target.pixels_mut().put_pixel(x, y, Rgb([shade, shade, shade]));
            }
        }
        Ok(())
    }

    fn text_content(&mut self) -> EngineResult<Vec<TextItem>> {
        self.doc.text_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            TextItem {
                text: format!("Chapter {}", self.page_number),
                transform: [18.0, 0.0, 0.0, 18.0, 72.0, 720.0],
                width: 120.0,
                height: 18.0,
            },
            TextItem {
                text: " ".to_string(),
                transform: [12.0, 0.0, 0.0, 12.0, 72.0, 700.0],
                width: 3.0,
                height: 12.0,
            },
            TextItem {
                text: "It was a bright cold day in April.".to_string(),
                transform: [12.0, 0.0, 0.0, 12.0, 72.0, 680.0],
                width: 220.0,
                height: 12.0,
            },
        ])
    }

    fn cleanup(&mut self) {
        if !self.released {
            self.released = true;
            self.doc.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }
}
