//! PDF engine contract
//!
//! The cache pipeline never parses PDF bytes itself. It drives an engine
//! through these traits: open a document, fetch a page, rasterize it into a
//! `RasterSurface`, extract positioned text, then release the page.
//!
//! Engine calls are synchronous and CPU-bound; callers run them on the
//! blocking pool (`tokio::task::spawn_blocking`).

#[cfg(feature = "mupdf-engine")]
mod mupdf_backend;
#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "mupdf-engine")]
pub use mupdf_backend::{MupdfDocument, MupdfEngine};

use std::sync::Arc;

use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opens documents from raw bytes
pub trait PdfEngine: Send + Sync {
    fn open_document(&self, document_id: &str, bytes: Vec<u8>) -> EngineResult<Arc<dyn PdfDocument>>;
}

/// An open document handle
pub trait PdfDocument: Send + Sync {
    /// Cache namespace for this document
    fn id(&self) -> &str;

    fn page_count(&self) -> u32;

    /// Load a 1-based page. The returned page borrows the document and must
    /// be released with `PdfPage::cleanup` once rendered.
    fn page(&self, page_number: u32) -> EngineResult<Box<dyn PdfPage + '_>>;
}

/// One loaded page holding engine-native resources
pub trait PdfPage {
    fn page_number(&self) -> u32;

    /// Pixel viewport at `scale`
    fn viewport(&self, scale: f32) -> Viewport;

    /// Rasterize into `target`, sized from `viewport`
    fn render(&mut self, target: &mut RasterSurface, viewport: &Viewport) -> EngineResult<()>;

    /// Positioned text runs in PDF user space
    fn text_content(&mut self) -> EngineResult<Vec<TextItem>>;

    /// Release native resources. Safe to call more than once.
    fn cleanup(&mut self);
}

/// Check that `page_number` addresses a page of `document`
pub fn check_page_range(document: &dyn PdfDocument, page_number: u32) -> EngineResult<()> {
    let page_count = document.page_count();
    if page_number == 0 || page_number > page_count {
        return Err(EngineError::PageOutOfRange {
            page: page_number,
            page_count,
        });
    }
    Ok(())
}

/// Stable document id from the PDF bytes (hex SHA-256)
pub fn document_id_for_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Page viewport in device pixels
///
/// `transform` maps PDF user space (origin bottom-left, y up) to device
/// space (origin top-left, y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
    pub transform: [f32; 6],
}

impl Viewport {
    /// Viewport for an unrotated page of `page_width` x `page_height` points
    pub fn new(page_width: f32, page_height: f32, scale: f32) -> Self {
        Self {
            width: page_width * scale,
            height: page_height * scale,
            scale,
            transform: [scale, 0.0, 0.0, -scale, 0.0, page_height * scale],
        }
    }

    /// Integer surface size; each side is at least one pixel
    pub fn pixel_size(&self) -> (u32, u32) {
        let width = self.width.floor().max(1.0) as u32;
        let height = self.height.floor().max(1.0) as u32;
        (width, height)
    }

    /// Compose `matrix` (user space) with the viewport transform
    pub fn apply(&self, matrix: [f32; 6]) -> [f32; 6] {
        multiply(self.transform, matrix)
    }
}

/// Affine matrix product `m1 x m2` in `[a, b, c, d, e, f]` form
pub fn multiply(m1: [f32; 6], m2: [f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[2] * m2[1],
        m1[1] * m2[0] + m1[3] * m2[1],
        m1[0] * m2[2] + m1[2] * m2[3],
        m1[1] * m2[2] + m1[3] * m2[3],
        m1[0] * m2[4] + m1[2] * m2[5] + m1[4],
        m1[1] * m2[4] + m1[3] * m2[5] + m1[5],
    ]
}

/// Positioned text run as reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    /// Text space to user space matrix
    pub transform: [f32; 6],
    /// Run width in user space units
    pub width: f32,
    /// Run height in user space units
    pub height: f32,
}

/// Off-screen render target without an alpha channel
///
/// Pages are paper-white, so the surface starts opaque white and encodes
/// straight to JPEG.
pub struct RasterSurface {
    pixels: RgbImage,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbImage::from_pixel(width, height, Rgb([255, 255, 255])),
        }
    }

    pub fn for_viewport(viewport: &Viewport) -> Self {
        let (width, height) = viewport.pixel_size();
        Self::new(width, height)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }

    /// Copy packed samples with `components` bytes per pixel; alpha or extra
    /// channels are dropped. Rows beyond the surface are ignored.
    pub fn blit_samples(&mut self, samples: &[u8], width: u32, height: u32, components: usize) {
        if components < 3 {
            return;
        }
        let copy_width = width.min(self.width());
        let copy_height = height.min(self.height());

        for y in 0..copy_height {
            for x in 0..copy_width {
                let offset = (y as usize * width as usize + x as usize) * components;
                if let Some(rgb) = samples.get(offset..offset + 3) {
                    self.pixels.put_pixel(x, y, Rgb([rgb[0], rgb[1], rgb[2]]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_dimensions() {
        let viewport = Viewport::new(612.0, 792.0, 1.5);
        assert_eq!(viewport.width, 918.0);
        assert_eq!(viewport.height, 1188.0);
        assert_eq!(viewport.pixel_size(), (918, 1188));
    }

    #[test]
    fn test_viewport_flips_y_axis() {
        let viewport = Viewport::new(100.0, 200.0, 2.0);
        // Text at user-space (10, 150), 12pt
        let tx = viewport.apply([12.0, 0.0, 0.0, 12.0, 10.0, 150.0]);
        assert_eq!(tx[4], 20.0);
        assert_eq!(tx[5], 100.0);
        assert_eq!(tx[3], -24.0);
    }

    #[test]
    fn test_document_id_is_stable() {
        let a = document_id_for_bytes(b"%PDF-1.4 sample");
        let b = document_id_for_bytes(b"%PDF-1.4 sample");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, document_id_for_bytes(b"%PDF-1.4 other"));
    }

    #[test]
    fn test_surface_starts_white_and_blits_rgba() {
        let mut surface = RasterSurface::new(2, 1);
        assert_eq!(surface.pixels().get_pixel(1, 0), &Rgb([255, 255, 255]));

        let rgba = [10, 20, 30, 0, 40, 50, 60, 255];
        surface.blit_samples(&rgba, 2, 1, 4);
        assert_eq!(surface.pixels().get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(surface.pixels().get_pixel(1, 0), &Rgb([40, 50, 60]));
    }
}
