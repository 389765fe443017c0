use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::config::ColourEffect;
use crate::entities::{LayoutBlock, LineInfo, PageAnalysis};

const TITLE_COLOR: [u8; 4] = [209, 139, 0, 255];
const TEXT_COLOR: [u8; 4] = [0, 0, 255, 255];
const FIGURE_COLOR: [u8; 4] = [17, 138, 1, 255];
const OTHER_COLOR: [u8; 4] = [128, 128, 128, 255];
const LINE_COLOR: [u8; 4] = [255, 0, 0, 255];
const ACTIVE_LINE_COLOR: [u8; 4] = [255, 0, 255, 255];

fn block_colour(block: &LayoutBlock) -> Rgba<u8> {
    match block.class_name() {
        "doc_title" | "paragraph_title" | "figure_title" => Rgba(TITLE_COLOR),
        "chart" | "image" | "seal" | "table" | "header_image" | "footer_image" => {
            Rgba(FIGURE_COLOR)
        }
        "abstract" | "algorithm" | "aside_text" | "content" | "footnote" | "reference"
        | "reference_content" | "text" | "vertical_text" | "vision_footnote" => Rgba(TEXT_COLOR),
        _ => Rgba(OTHER_COLOR),
    }
}

/// Draw block outlines and line rules over a rendered page. `scale` is
/// rendered pixels per page point (dpi / 72).
pub fn draw_analysis(analysis: &PageAnalysis, page_img: &DynamicImage, scale: f32) -> RgbaImage {
    // Convert the dynamic image to RGBA for in-place drawing.
    let mut out_img = page_img.to_rgba8();

    for block in &analysis.blocks {
        let x0 = (block.bbox.x0 * scale) as i32;
        let y0 = (block.bbox.y0 * scale) as i32;
        let x1 = (block.bbox.x1 * scale) as i32;
        let y1 = (block.bbox.y1 * scale) as i32;

        let width = (x1 - x0).max(1) as u32;
        let height = (y1 - y0).max(1) as u32;

        let rect = Rect::at(x0, y0).of_size(width, height);
        draw_hollow_rect_mut(&mut out_img, rect, block_colour(block));

        for line in &block.lines {
            let ly = (line.y_center * scale) as i32;
            let rule = Rect::at(x0, ly).of_size(width, 1);
            draw_filled_rect_mut(&mut out_img, rule, Rgba(LINE_COLOR));
        }
    }

    out_img
}

/// Highlight the rail cursor's line as a band across its block.
pub fn draw_active_line(
    out_img: &mut RgbaImage,
    block: &LayoutBlock,
    line: LineInfo,
    scale: f32,
) {
    let x0 = (block.bbox.x0 * scale) as i32;
    let width = ((block.bbox.width() * scale) as i32).max(1) as u32;
    let height = ((line.height * scale) as i32).max(1) as u32;
    let y0 = ((line.y_center - line.height / 2.0) * scale) as i32;
    let rect = Rect::at(x0, y0).of_size(width, height);
    draw_hollow_rect_mut(out_img, rect, Rgba(ACTIVE_LINE_COLOR));
}

/// Apply the configured palette in place, blended by `intensity` in
/// `[0, 1]`.
pub fn apply_colour_effect(img: &mut RgbaImage, effect: ColourEffect, intensity: f32) {
    if effect == ColourEffect::None || intensity <= 0.0 {
        return;
    }
    let t = intensity.clamp(0.0, 1.0);
    for pixel in img.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        let (nr, ng, nb) = match effect {
            ColourEffect::None => (r as f32, g as f32, b as f32),
            ColourEffect::Invert => (255.0 - r as f32, 255.0 - g as f32, 255.0 - b as f32),
            ColourEffect::Grayscale => (luma, luma, luma),
            ColourEffect::Amber => (luma, luma * 0.75, luma * 0.25),
        };
        let blend = |old: u8, new: f32| (old as f32 * (1.0 - t) + new * t).round() as u8;
        pixel.0 = [blend(r, nr), blend(g, ng), blend(b, nb), a];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BBox, TEXT_CLASS_ID};

    fn analysis_with_block() -> PageAnalysis {
        PageAnalysis {
            blocks: vec![LayoutBlock {
                bbox: BBox::from_xywh(10.0, 10.0, 40.0, 30.0),
                class_id: TEXT_CLASS_ID,
                confidence: 0.9,
                order: 0,
                lines: vec![LineInfo {
                    y_center: 20.0,
                    height: 6.0,
                }],
            }],
            page_w: 100.0,
            page_h: 100.0,
        }
    }

    #[test]
    fn test_draw_outlines_and_rules() {
        let page = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            100,
            100,
            Rgba([255, 255, 255, 255]),
        ));
        let out = draw_analysis(&analysis_with_block(), &page, 1.0);
        // Block outline at the top-left corner, line rule across row 20.
        assert_eq!(out.get_pixel(10, 10), &Rgba(TEXT_COLOR));
        assert_eq!(out.get_pixel(30, 20), &Rgba(LINE_COLOR));
        // Outside the block nothing changed.
        assert_eq!(out.get_pixel(90, 90), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_active_line_band() {
        let analysis = analysis_with_block();
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        let block = &analysis.blocks[0];
        draw_active_line(&mut img, block, block.lines[0], 1.0);
        // Band spans the block width, centered on the line.
        assert_eq!(img.get_pixel(10, 17), &Rgba(ACTIVE_LINE_COLOR));
        assert_eq!(img.get_pixel(30, 22), &Rgba(ACTIVE_LINE_COLOR));
        assert_eq!(img.get_pixel(30, 20), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_invert_full_intensity() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        apply_colour_effect(&mut img, ColourEffect::Invert, 1.0);
        assert_eq!(img.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_half_intensity_blends() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 0, 255]));
        apply_colour_effect(&mut img, ColourEffect::Invert, 0.5);
        let px = img.get_pixel(0, 0);
        assert_eq!(px.0[0], 128); // (200 + 55) / 2, rounded
        assert_eq!(px.0[3], 255); // alpha untouched
    }

    #[test]
    fn test_none_and_zero_intensity_are_noops() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([12, 34, 56, 255]));
        let before = img.clone();
        apply_colour_effect(&mut img, ColourEffect::None, 1.0);
        apply_colour_effect(&mut img, ColourEffect::Amber, 0.0);
        assert_eq!(img, before);
    }

    #[test]
    fn test_grayscale_flattens_channels() {
        let mut img = RgbaImage::from_pixel(1, 1, Rgba([250, 10, 40, 255]));
        apply_colour_effect(&mut img, ColourEffect::Grayscale, 1.0);
        let px = img.get_pixel(0, 0).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }
}
