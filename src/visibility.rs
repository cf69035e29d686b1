//! Visibility-driven fetch trigger
//!
//! One `PageSurface` per rendered page slot. It turns intersection events
//! into orchestrator loads and, once the page image is shown, builds an
//! invisible text layer positioned over the glyphs for selection.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::VisibilityConfig;
use crate::engine::{TextItem, Viewport};
use crate::error::Result;
use crate::metrics;
use crate::orchestrator::PageOrchestrator;
use crate::render::PageImage;

/// Axis-aligned rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow by `margin` on every side
    pub fn expand(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        (right > x && bottom > y).then(|| Rect::new(x, y, right - x, bottom - y))
    }
}

/// Result of testing a page's bounds against the scroll viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Visible fraction of the target, 0..=1
    pub ratio: f64,
    pub is_intersecting: bool,
}

impl Intersection {
    pub fn is_visible(&self, threshold: f64) -> bool {
        self.is_intersecting && self.ratio >= threshold
    }
}

/// Intersect `target` with `root` grown by `margin_px`
pub fn intersection(target: Rect, root: Rect, margin_px: f64) -> Intersection {
    let Some(overlap) = target.intersect(&root.expand(margin_px)) else {
        return Intersection {
            ratio: 0.0,
            is_intersecting: false,
        };
    };

    let area = target.area();
    let ratio = if area > 0.0 {
        (overlap.area() / area).min(1.0)
    } else {
        1.0
    };
    Intersection {
        ratio,
        is_intersecting: true,
    }
}

/// One positioned, invisible text node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSpan {
    pub text: String,
    /// Device px from the page's left edge
    pub left: f32,
    /// Device px from the page's top edge to the glyph top
    pub top: f32,
    pub font_size: f32,
    /// Rotation in radians
    pub angle: f32,
    /// Run width in device px
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLayer {
    pub page_number: u32,
    /// Layer size in device px, equal to the image size
    pub width: f32,
    pub height: f32,
    pub spans: Vec<TextSpan>,
}

/// Lay out `items` against `viewport`, skipping whitespace-only runs
pub fn build_text_layer(page_number: u32, viewport: &Viewport, items: &[TextItem]) -> TextLayer {
    let spans = items
        .iter()
        .filter(|item| !item.text.trim().is_empty())
        .map(|item| {
            let tx = viewport.apply(item.transform);
            let font_size = tx[2].hypot(tx[3]);
            TextSpan {
                text: item.text.clone(),
                left: tx[4],
                top: tx[5] - font_size,
                font_size,
                angle: tx[1].atan2(tx[0]),
                width: item.width * viewport.scale,
            }
        })
        .collect();

    TextLayer {
        page_number,
        width: viewport.width,
        height: viewport.height,
        spans,
    }
}

/// Per-slot visibility and text layer state
#[derive(Debug)]
pub struct PageSurface {
    page_number: u32,
    config: VisibilityConfig,
    visible: bool,
    text_layer: Option<TextLayer>,
    /// Image the text layer was built for
    text_image: Option<PageImage>,
}

impl PageSurface {
    pub fn new(page_number: u32, config: VisibilityConfig) -> Self {
        Self {
            page_number,
            config,
            visible: false,
            text_layer: None,
            text_image: None,
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn text_layer(&self) -> Option<&TextLayer> {
        self.text_layer.as_ref()
    }

    /// Point the slot at another page; visibility and text are reset
    pub fn set_page(&mut self, page_number: u32) {
        if page_number == self.page_number {
            return;
        }
        self.page_number = page_number;
        self.visible = false;
        self.clear_text_layer();
    }

    fn clear_text_layer(&mut self) {
        self.text_layer = None;
        self.text_image = None;
    }

    /// Handle an intersection event for this slot
    ///
    /// The first event that makes the page visible asks the orchestrator to
    /// load it unless it is already loading or loaded. Later events are
    /// ignored. Returns true if a load was issued.
    pub fn on_intersection(
        &mut self,
        bounds: Rect,
        root: Rect,
        orchestrator: &PageOrchestrator,
    ) -> bool {
        if self.visible {
            return false;
        }

        let hit = intersection(bounds, root, self.config.margin_px);
        if !hit.is_visible(self.config.threshold) {
            return false;
        }
        self.visible = true;
        tracing::trace!(page = self.page_number, ratio = hit.ratio, "Page visible");

        let state = orchestrator.page_state(self.page_number);
        if state.is_loading() || state.is_loaded() {
            return false;
        }
        orchestrator.request_page(self.page_number)
    }

    /// Build the text layer once `image` is on screen
    ///
    /// Runs at most once per image. Returns true if a layer was built. A
    /// different image for the same page clears and rebuilds the layer.
    pub async fn on_image_loaded(
        &mut self,
        image: &PageImage,
        orchestrator: &PageOrchestrator,
    ) -> Result<bool> {
        if image.page_number() != self.page_number {
            return Ok(false);
        }
        let built = self
            .text_image
            .as_ref()
            .is_some_and(|shown| shown.same_image(image));
        if built {
            return Ok(false);
        }
        self.clear_text_layer();

        let Some(document) = orchestrator.document() else {
            return Ok(false);
        };

        let timer = orchestrator.monitor().time(metrics::TEXT_LAYER);
        let (viewport, items) = match orchestrator
            .renderer()
            .page_text(document, self.page_number)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                timer.cancel();
                tracing::warn!(page = self.page_number, error = %e, "Text layer unavailable");
                return Err(e);
            }
        };

        let layer = build_text_layer(self.page_number, &viewport, &items);
        tracing::debug!(page = self.page_number, spans = layer.spans.len(), "Built text layer");
        self.text_layer = Some(layer);
        self.text_image = Some(image.clone());
        Ok(true)
    }
}

/// All mounted page slots of one reader view
#[derive(Debug)]
pub struct VisibilityTracker {
    config: VisibilityConfig,
    surfaces: BTreeMap<u32, PageSurface>,
}

impl VisibilityTracker {
    pub fn new(config: VisibilityConfig) -> Self {
        Self {
            config,
            surfaces: BTreeMap::new(),
        }
    }

    /// Mount a slot for `page_number`; an existing slot is kept as is
    pub fn mount(&mut self, page_number: u32) -> &mut PageSurface {
        let config = self.config;
        self.surfaces
            .entry(page_number)
            .or_insert_with(|| PageSurface::new(page_number, config))
    }

    pub fn unmount(&mut self, page_number: u32) -> Option<PageSurface> {
        self.surfaces.remove(&page_number)
    }

    pub fn surface(&self, page_number: u32) -> Option<&PageSurface> {
        self.surfaces.get(&page_number)
    }

    pub fn surface_mut(&mut self, page_number: u32) -> Option<&mut PageSurface> {
        self.surfaces.get_mut(&page_number)
    }

    pub fn visible_pages(&self) -> Vec<u32> {
        self.surfaces
            .values()
            .filter(|surface| surface.is_visible())
            .map(PageSurface::page_number)
            .collect()
    }

    /// Feed one scroll frame: `root` is the scroll viewport and `layout`
    /// the current bounds of each mounted page. Returns the pages whose
    /// loads were issued.
    pub fn on_scroll(
        &mut self,
        root: Rect,
        layout: &[(u32, Rect)],
        orchestrator: &PageOrchestrator,
    ) -> Vec<u32> {
        layout
            .iter()
            .filter_map(|&(page_number, bounds)| {
                let surface = self.surfaces.get_mut(&page_number)?;
                surface
                    .on_intersection(bounds, root, orchestrator)
                    .then_some(page_number)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{PreloadConfig, RenderOptions, StoreConfig};
    use crate::engine::testing::{MockDocument, PAGE_HEIGHT, PAGE_WIDTH};
    use crate::metrics::PerformanceMonitor;
    use crate::orchestrator::PageState;
    use crate::render::PageRenderer;
    use crate::store::PageStore;

    const ROOT: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 800.0,
        height: 600.0,
    };

    async fn orchestrator(pages: u32) -> (PageOrchestrator, std::sync::Arc<MockDocument>) {
        let store = PageStore::in_memory(&StoreConfig::default());
        store.init().await.unwrap();
        let orchestrator = PageOrchestrator::new(
            store,
            PageRenderer::new(RenderOptions::default()),
            PreloadConfig {
                cleanup_delay: Duration::from_secs(60),
                ..PreloadConfig::default()
            },
            PerformanceMonitor::new(),
        );
        let doc = MockDocument::new("book-1", pages);
        orchestrator.bind_document(doc.clone());
        (orchestrator, doc)
    }

    fn loaded_image(orchestrator: &PageOrchestrator, page: u32) -> PageImage {
        match orchestrator.page_state(page) {
            PageState::Loaded(image) => image,
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_margin_extends_viewport() {
        // Page starts 150px below the fold
        let page = Rect::new(0.0, 750.0, 800.0, 1000.0);

        assert!(!intersection(page, ROOT, 0.0).is_intersecting);
        let hit = intersection(page, ROOT, 200.0);
        assert!(hit.is_intersecting);
        assert!((hit.ratio - 0.05).abs() < 1e-9);
        assert!(hit.is_visible(0.01));
    }

    #[test]
    fn test_far_page_is_not_visible() {
        let page = Rect::new(0.0, 2000.0, 800.0, 1000.0);
        assert!(!intersection(page, ROOT, 200.0).is_visible(0.01));
    }

    #[test]
    fn test_text_layer_positions() {
        let viewport = Viewport::new(PAGE_WIDTH, PAGE_HEIGHT, 1.5);
        let items = vec![
            TextItem {
                text: "Chapter 1".into(),
                transform: [18.0, 0.0, 0.0, 18.0, 72.0, 720.0],
                width: 120.0,
                height: 18.0,
            },
            TextItem {
                text: "  ".into(),
                transform: [12.0, 0.0, 0.0, 12.0, 72.0, 700.0],
                width: 3.0,
                height: 12.0,
            },
        ];

        let layer = build_text_layer(1, &viewport, &items);
        assert_eq!(layer.spans.len(), 1);
        assert_eq!((layer.width, layer.height), (918.0, 1188.0));

        let span = &layer.spans[0];
        assert_eq!(span.font_size, 27.0);
        assert_eq!(span.left, 108.0);
        assert_eq!(span.top, 81.0);
        assert_eq!(span.width, 180.0);
        assert_eq!(span.angle, 0.0);
    }

    #[tokio::test]
    async fn test_first_visibility_triggers_one_load() {
        let (orchestrator, doc) = orchestrator(5).await;
        let mut surface = PageSurface::new(2, VisibilityConfig::default());
        let bounds = Rect::new(0.0, 100.0, 800.0, 1000.0);

        assert!(surface.on_intersection(bounds, ROOT, &orchestrator));
        assert!(surface.is_visible());
        assert!(!surface.on_intersection(bounds, ROOT, &orchestrator));

        orchestrator.wait_idle().await;
        assert!(orchestrator.page_state(2).is_loaded());
        assert_eq!(doc.render_count(), 1);
    }

    #[tokio::test]
    async fn test_offscreen_event_does_not_mark_visible() {
        let (orchestrator, doc) = orchestrator(5).await;
        let mut surface = PageSurface::new(4, VisibilityConfig::default());

        let far = Rect::new(0.0, 5000.0, 800.0, 1000.0);
        assert!(!surface.on_intersection(far, ROOT, &orchestrator));
        assert!(!surface.is_visible());
        assert_eq!(doc.render_count(), 0);
    }

    #[tokio::test]
    async fn test_visible_loaded_page_is_not_refetched() {
        let (orchestrator, doc) = orchestrator(5).await;
        orchestrator.load_page(1).await;

        let mut surface = PageSurface::new(1, VisibilityConfig::default());
        assert!(!surface.on_intersection(ROOT, ROOT, &orchestrator));
        assert!(surface.is_visible());
        assert_eq!(doc.render_count(), 1);
    }

    #[tokio::test]
    async fn test_text_layer_built_once_per_image() {
        let (orchestrator, doc) = orchestrator(5).await;
        orchestrator.load_page(3).await;
        let image = loaded_image(&orchestrator, 3);

        let mut surface = PageSurface::new(3, VisibilityConfig::default());
        assert!(surface.on_image_loaded(&image, &orchestrator).await.unwrap());
        assert!(!surface.on_image_loaded(&image, &orchestrator).await.unwrap());
        assert_eq!(doc.text_fetch_count(), 1);

        let layer = surface.text_layer().unwrap();
        assert_eq!(layer.page_number, 3);
        assert_eq!(layer.spans[0].text, "Chapter 3");
        assert_eq!(layer.spans.len(), 2);
        assert!(orchestrator.monitor().summary(metrics::TEXT_LAYER).is_some());
    }

    #[tokio::test]
    async fn test_new_image_rebuilds_text_layer() {
        let (orchestrator, doc) = orchestrator(5).await;
        orchestrator.load_page(3).await;
        let first = loaded_image(&orchestrator, 3);

        let mut surface = PageSurface::new(3, VisibilityConfig::default());
        surface.on_image_loaded(&first, &orchestrator).await.unwrap();

        orchestrator.reload_page(3).await;
        let second = loaded_image(&orchestrator, 3);
        assert!(surface.on_image_loaded(&second, &orchestrator).await.unwrap());
        assert_eq!(doc.text_fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_set_page_resets_surface() {
        let (orchestrator, _doc) = orchestrator(5).await;
        orchestrator.load_page(3).await;
        let image = loaded_image(&orchestrator, 3);

        let mut surface = PageSurface::new(3, VisibilityConfig::default());
        surface.on_intersection(ROOT, ROOT, &orchestrator);
        surface.on_image_loaded(&image, &orchestrator).await.unwrap();

        surface.set_page(4);
        assert!(!surface.is_visible());
        assert!(surface.text_layer().is_none());
        // Image for the old page is ignored
        assert!(!surface.on_image_loaded(&image, &orchestrator).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_document_skips_text_layer() {
        let (orchestrator, _doc) = orchestrator(5).await;
        orchestrator.load_page(2).await;
        let image = loaded_image(&orchestrator, 2);
        orchestrator.unbind_document();

        let mut surface = PageSurface::new(2, VisibilityConfig::default());
        assert!(!surface.on_image_loaded(&image, &orchestrator).await.unwrap());
        assert!(surface.text_layer().is_none());
    }

    #[tokio::test]
    async fn test_tracker_loads_pages_scrolled_into_view() {
        let (orchestrator, doc) = orchestrator(10).await;
        let mut tracker = VisibilityTracker::new(VisibilityConfig::default());
        let layout: Vec<(u32, Rect)> = (1..=10)
            .map(|page| (page, Rect::new(0.0, (page - 1) as f64 * 1000.0, 800.0, 1000.0)))
            .collect();
        for page in 1..=10 {
            tracker.mount(page);
        }

        // Viewport over page 1, margin reaches nothing further
        assert_eq!(tracker.on_scroll(ROOT, &layout, &orchestrator), vec![1]);

        // Scrolled to the boundary of pages 3 and 4
        let scrolled = Rect::new(0.0, 2700.0, 800.0, 600.0);
        assert_eq!(tracker.on_scroll(scrolled, &layout, &orchestrator), vec![3, 4]);
        assert_eq!(tracker.on_scroll(scrolled, &layout, &orchestrator), Vec::<u32>::new());
        assert_eq!(tracker.visible_pages(), vec![1, 3, 4]);

        orchestrator.wait_idle().await;
        assert_eq!(doc.render_count(), 3);

        assert!(tracker.unmount(3).is_some());
        assert!(tracker.surface(3).is_none());
        assert!(!tracker.mount(3).is_visible());
    }
}
