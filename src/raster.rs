use std::sync::Arc;

use anyhow::Context;
use image::DynamicImage;
use pdfium_render::prelude::{PdfRenderConfig, Pdfium};

/// Reduced RGB raster of a page, fitted into a square box with aspect
/// preserved. This is the detector's input format.
#[derive(Debug, Clone)]
pub struct Pixmap {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Pixmap {
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());
        Self {
            rgb: rgb.into_raw(),
            width,
            height,
        }
    }
}

/// A page bitmap cached by a tab, tagged with the DPI it was rendered at.
/// Replaced by swapping the owning `Arc`; the compositor's old reference
/// keeps the previous bitmap alive until it drops it.
#[derive(Debug)]
pub struct RasterImage {
    pub image: DynamicImage,
    pub dpi: f32,
}

pub type SharedRaster = Arc<RasterImage>;

/// The rendering surface the core consumes. Page geometry is in points;
/// bitmaps are caller-owned.
pub trait PageRasterizer: Send + Sync {
    fn page_count(&self) -> u32;

    /// Page size in points.
    fn page_size(&self, page: usize) -> anyhow::Result<(f32, f32)>;

    /// Full-quality render of one page at the given DPI.
    fn render_page(&self, page: usize, dpi: f32) -> anyhow::Result<DynamicImage>;

    /// Reduced render fitted within `target x target` pixels.
    fn render_pixmap(&self, page: usize, target: u32) -> anyhow::Result<Pixmap>;
}

pub type SharedRasterizer = Arc<dyn PageRasterizer>;

/// pdfium-backed rasterizer. pdfium is not safe for concurrent calls on
/// one document, so the document is reloaded from the owned byte slice on
/// every call and never shared across threads mid-render.
pub struct PdfiumRasterizer {
    pdfium: Pdfium,
    data: Arc<[u8]>,
    password: Option<String>,
    page_count: u32,
    page_sizes: Vec<(f32, f32)>,
}

impl PdfiumRasterizer {
    pub fn new(data: Arc<[u8]>, password: Option<String>) -> anyhow::Result<Self> {
        let pdfium = Pdfium::new(
            Pdfium::bind_to_statically_linked_library()
                .context("can't bind statically linked pdfium")?,
        );
        let document = pdfium
            .load_pdf_from_byte_slice(&data, password.as_deref())
            .context("can't open document")?;
        let page_count = document.pages().len() as u32;
        let page_sizes = document
            .pages()
            .iter()
            .map(|page| (page.width().value, page.height().value))
            .collect();
        drop(document);
        Ok(Self {
            pdfium,
            data,
            password,
            page_count,
            page_sizes,
        })
    }

    fn render_scaled(&self, page: usize, scale: f32) -> anyhow::Result<DynamicImage> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(&self.data, self.password.as_deref())
            .context("can't reopen document")?;
        let page = document
            .pages()
            .get(page as u16)
            .with_context(|| format!("no page {page}"))?;
        let image = page
            .render_with_config(&PdfRenderConfig::default().scale_page_by_factor(scale))
            .map(|bitmap| bitmap.as_image())?;
        Ok(image)
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page: usize) -> anyhow::Result<(f32, f32)> {
        self.page_sizes
            .get(page)
            .copied()
            .with_context(|| format!("no page {page}"))
    }

    fn render_page(&self, page: usize, dpi: f32) -> anyhow::Result<DynamicImage> {
        // Page points are 1/72in, so the scale factor is dpi relative to 72.
        self.render_scaled(page, dpi / 72.0)
    }

    fn render_pixmap(&self, page: usize, target: u32) -> anyhow::Result<Pixmap> {
        let (w, h) = self.page_size(page)?;
        let scale = target as f32 / w.max(h);
        let image = self.render_scaled(page, scale)?;
        Ok(Pixmap::from_image(&image))
    }
}
