use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type PageID = usize;

lazy_static! {
    /// Layout classes emitted by the detector, in canonical index order.
    ///
    /// `class_id` fields across the crate index into this table; detections
    /// whose id falls outside of it are discarded during post-processing.
    pub static ref CLASS_TABLE: [&'static str; 25] = [
        "abstract",
        "algorithm",
        "aside_text",
        "chart",
        "content",
        "display_formula",
        "doc_title",
        "figure_title",
        "footer",
        "footer_image",
        "footnote",
        "formula_number",
        "header",
        "header_image",
        "image",
        "inline_formula",
        "number",
        "paragraph_title",
        "reference",
        "reference_content",
        "seal",
        "table",
        "text",
        "vertical_text",
        "vision_footnote",
    ];
}

/// Index of the `text` class, used for the synthetic whole-page fallback block.
pub const TEXT_CLASS_ID: usize = 22;

pub fn class_name(class_id: usize) -> Option<&'static str> {
    CLASS_TABLE.get(class_id).copied()
}

pub fn class_id_by_name(name: &str) -> Option<usize> {
    CLASS_TABLE.iter().position(|&c| c == name)
}

/// Axis-aligned rectangle in page points, origin top-left, y-down.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + w,
            y1: y + h,
        }
    }

    #[inline(always)]
    pub fn center(&self) -> (f32, f32) {
        (
            self.x0 + self.width() / 2f32,
            self.y0 + self.height() / 2f32,
        )
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        self.height() * self.width()
    }

    #[inline(always)]
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    #[inline(always)]
    fn overlap_x(&self, other: &Self) -> f32 {
        f32::max(
            0f32,
            f32::min(self.x1, other.x1) - f32::max(self.x0, other.x0),
        )
    }

    #[inline(always)]
    fn overlap_y(&self, other: &Self) -> f32 {
        f32::max(
            0f32,
            f32::min(self.y1, other.y1) - f32::max(self.y0, other.y0),
        )
    }

    #[inline(always)]
    pub fn intersection(&self, other: &Self) -> f32 {
        self.overlap_x(other) * self.overlap_y(other)
    }

    #[inline(always)]
    fn union(&self, other: &Self) -> f32 {
        other.area() + self.area() - self.intersection(other)
    }

    #[inline(always)]
    pub fn iou(&self, other: &Self) -> f32 {
        self.intersection(other) / self.union(other)
    }

    /// Squared distance from the rectangle center to a point.
    #[inline(always)]
    pub fn center_distance_sq(&self, x: f32, y: f32) -> f32 {
        let (cx, cy) = self.center();
        (cx - x).powi(2) + (cy - y).powi(2)
    }

    /// Clamp the rectangle into `[0, w] x [0, h]`.
    pub fn clamp_to(&self, w: f32, h: f32) -> Self {
        Self {
            x0: self.x0.clamp(0f32, w),
            y0: self.y0.clamp(0f32, h),
            x1: self.x1.clamp(0f32, w),
            y1: self.y1.clamp(0f32, h),
        }
    }
}

/// One horizontal text line within a block, in page points.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LineInfo {
    pub y_center: f32,
    pub height: f32,
}

/// A semantically detected region of the page, with its reading-order rank
/// and the text lines found inside it. `lines` is never empty after
/// analysis; blocks without detectable rows carry a synthetic midline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayoutBlock {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
    pub order: u32,
    pub lines: Vec<LineInfo>,
}

impl LayoutBlock {
    pub fn class_name(&self) -> &'static str {
        class_name(self.class_id).unwrap_or("unknown")
    }
}

/// Analysis result for one page: blocks sorted by ascending `order`
/// (dense `0..N`), all bboxes within the page, every block with >= 1 line.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PageAnalysis {
    pub blocks: Vec<LayoutBlock>,
    pub page_w: f32,
    pub page_h: f32,
}

impl PageAnalysis {
    pub fn empty(page_w: f32, page_h: f32) -> Self {
        Self {
            blocks: Vec::new(),
            page_w,
            page_h,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

pub type SharedAnalysis = Arc<PageAnalysis>;

/// One whole-page text block with a synthetic midline, served when the
/// detector is unavailable. Degraded but valid: the page stays navigable
/// as a single region.
pub fn fallback_analysis(page_w: f32, page_h: f32) -> PageAnalysis {
    let bbox = BBox::new(0f32, 0f32, page_w, page_h);
    let midline = LineInfo {
        y_center: page_h / 2f32,
        height: page_h,
    };
    PageAnalysis {
        blocks: vec![LayoutBlock {
            bbox,
            class_id: TEXT_CLASS_ID,
            confidence: 1.0,
            order: 0,
            lines: vec![midline],
        }],
        page_w,
        page_h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection() {
        let bbox1 = BBox::new(0.0, 0.0, 2.0, 2.0);
        let bbox2 = BBox::new(1.0, 1.0, 3.0, 3.0);
        let bbox3 = BBox::new(2.0, 2.0, 4.0, 4.0);
        let bbox4 = BBox::new(3.0, 3.0, 5.0, 5.0); // No overlap
        let bbox5 = BBox::new(-1.0, -1.0, 1.0, 1.0); // Negative coordinates
        let bbox6 = BBox::new(0.5, 0.5, 1.5, 1.5); // Inside bbox1

        // Edge Cases
        assert_eq!(bbox1.intersection(&bbox3), 0.0);
        assert_eq!(bbox1.intersection(&bbox4), 0.0); // Adjacent
        assert_eq!(bbox5.intersection(&bbox1), 1.0);

        // Overlaps
        assert_eq!(bbox1.intersection(&bbox2), 1.0);
        assert_eq!(bbox1.intersection(&bbox6), bbox6.area());

        // Sanity Checks
        assert_eq!(bbox1.intersection(&bbox1), bbox1.area());
    }

    #[test]
    fn test_iou() {
        let bbox1 = BBox::new(0.0, 0.0, 2.0, 2.0);
        let bbox2 = BBox::new(1.0, 1.0, 3.0, 3.0);
        let bbox4 = BBox::new(3.0, 3.0, 5.0, 5.0);
        let bbox6 = BBox::new(0.5, 0.5, 1.5, 1.5);

        assert_eq!(bbox1.iou(&bbox1), 1.0);
        assert_eq!(bbox1.iou(&bbox4), 0.0);
        assert_eq!(bbox1.iou(&bbox2), 1.0 / 7.0);
        assert_eq!(bbox1.iou(&bbox6), bbox6.area() / bbox1.area());
    }

    #[test]
    fn test_clamp_to_page() {
        let bbox = BBox::new(-10.0, 5.0, 650.0, 900.0);
        let clamped = bbox.clamp_to(600.0, 800.0);
        assert_eq!(clamped, BBox::new(0.0, 5.0, 600.0, 800.0));
    }

    #[test]
    fn test_class_table_roundtrip() {
        assert_eq!(CLASS_TABLE.len(), 25);
        assert_eq!(class_id_by_name("abstract"), Some(0));
        assert_eq!(class_id_by_name("text"), Some(TEXT_CLASS_ID));
        assert_eq!(class_id_by_name("vision_footnote"), Some(24));
        assert_eq!(class_id_by_name("bogus"), None);
        for (id, name) in CLASS_TABLE.iter().enumerate() {
            assert_eq!(class_id_by_name(name), Some(id));
        }
    }

    #[test]
    fn test_fallback_analysis_shape() {
        let pa = fallback_analysis(600.0, 800.0);
        assert_eq!(pa.blocks.len(), 1);
        let block = &pa.blocks[0];
        assert_eq!(block.class_id, TEXT_CLASS_ID);
        assert_eq!(block.order, 0);
        assert_eq!(block.lines.len(), 1);
        assert_eq!(block.lines[0].y_center, 400.0);
        assert_eq!(block.bbox, BBox::new(0.0, 0.0, 600.0, 800.0));
    }
}
