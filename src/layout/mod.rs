use anyhow::Context;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array2, Array4};
use rayon::prelude::*;

use crate::entities::{BBox, LayoutBlock, LineInfo, PageAnalysis, CLASS_TABLE};
use crate::raster::Pixmap;

pub mod lines;
pub mod model;
mod nms;

use lines::detect_row_bands;
use model::{DetectorInput, LayoutDetector, OrtLayoutDetector};

/// Confidence threshold for filtering out low probability bounding boxes.
/// Bounding boxes with probability below this threshold will be ignored.
pub const CONF_THRESHOLD: f32 = 0.4;

/// Intersection over Union (IoU) threshold for non-maximum suppression.
/// It determines the overlap between bounding boxes before suppression.
pub const IOU_THRESHOLD: f32 = 0.5;

/// Detections narrower or shorter than this many pixmap pixels after
/// clamping are noise.
const MIN_BOX_SIDE: f32 = 5.0;

/// A detection row decoded into pixmap pixel space, before suppression
/// and ordering.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
    pub order: f32,
}

/// Run the full analysis pipeline on one page's coarse pixmap:
/// preprocess, detect, filter, suppress, order, then per-block line
/// detection. The result is in page points.
#[tracing::instrument(skip_all)]
pub fn analyze_pixmap(
    detector: &dyn LayoutDetector,
    pixmap: &Pixmap,
    page_w: f32,
    page_h: f32,
) -> anyhow::Result<PageAnalysis> {
    let input = preprocess(pixmap)?;
    let Some(table) = detector.detect(input)? else {
        return Ok(PageAnalysis::empty(page_w, page_h));
    };

    let mut candidates = decode_rows(&table, pixmap.width as f32, pixmap.height as f32);
    nms::nms(&mut candidates, IOU_THRESHOLD);

    // Reading order: detector's own prediction first, top-of-page tiebreak.
    candidates.sort_by(|a, b| {
        a.order
            .partial_cmp(&b.order)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.bbox
                    .y0
                    .partial_cmp(&b.bbox.y0)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let sx = page_w / pixmap.width as f32;
    let sy = page_h / pixmap.height as f32;
    let blocks = candidates
        .par_iter()
        .enumerate()
        .map(|(order, candidate)| {
            let bands = detect_row_bands(pixmap, &candidate.bbox);
            let bbox = BBox::new(
                candidate.bbox.x0 * sx,
                candidate.bbox.y0 * sy,
                candidate.bbox.x1 * sx,
                candidate.bbox.y1 * sy,
            );
            let mut lines: Vec<LineInfo> = bands
                .iter()
                .map(|band| LineInfo {
                    y_center: band.y_center * sy,
                    height: band.height * sy,
                })
                .collect();
            if lines.is_empty() {
                lines.push(LineInfo {
                    y_center: bbox.center().1,
                    height: bbox.height(),
                });
            }
            LayoutBlock {
                bbox,
                class_id: candidate.class_id,
                confidence: candidate.confidence,
                order: order as u32,
                lines,
            }
        })
        .collect();

    Ok(PageAnalysis {
        blocks,
        page_w,
        page_h,
    })
}

/// Build the model's input tensors: nearest-neighbour rescale to the
/// square input size, channel-first, scaled to `[0, 1]`. No mean/std
/// normalization.
pub(crate) fn preprocess(pixmap: &Pixmap) -> anyhow::Result<DetectorInput> {
    let side = OrtLayoutDetector::INPUT_SIZE;
    let src = RgbImage::from_raw(pixmap.width, pixmap.height, pixmap.rgb.clone())
        .context("pixmap buffer does not match its dimensions")?;
    let resized = image::imageops::resize(&src, side, side, FilterType::Nearest);

    let mut image = Array4::zeros([1, 3, side as usize, side as usize]);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        image[[0, 0, y, x]] = r as f32 / 255.0;
        image[[0, 1, y, x]] = g as f32 / 255.0;
        image[[0, 2, y, x]] = b as f32 / 255.0;
    }

    let im_shape = Array2::from_shape_vec((1, 2), vec![side as f32, side as f32])?;
    let scale_factor = Array2::from_shape_vec(
        (1, 2),
        vec![
            side as f32 / pixmap.height as f32,
            side as f32 / pixmap.width as f32,
        ],
    )?;

    Ok(DetectorInput {
        image,
        im_shape,
        scale_factor,
    })
}

/// Decode detection rows `[class_id, confidence, x0, y0, x1, y1, order?]`
/// into candidates, dropping low-confidence rows, unknown classes, and
/// boxes that clamp down to slivers. Coordinates are in pixmap pixels.
fn decode_rows(table: &Array2<f32>, px_w: f32, px_h: f32) -> Vec<Candidate> {
    let has_order = table.ncols() >= 7;
    let mut candidates = Vec::new();
    for row in table.outer_iter() {
        let confidence = row[1];
        if confidence < CONF_THRESHOLD {
            continue;
        }
        let class = row[0];
        if class < 0.0 || class >= CLASS_TABLE.len() as f32 {
            continue;
        }
        let bbox = BBox::new(row[2], row[3], row[4], row[5]).clamp_to(px_w, px_h);
        if bbox.width() < MIN_BOX_SIDE || bbox.height() < MIN_BOX_SIDE {
            continue;
        }
        candidates.push(Candidate {
            bbox,
            class_id: class as usize,
            confidence,
            order: if has_order { row[6] } else { 0.0 },
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::model::testing::FakeDetector;
    use super::*;

    fn white_pixmap(width: u32, height: u32) -> Pixmap {
        Pixmap {
            rgb: vec![255u8; (width * height * 3) as usize],
            width,
            height,
        }
    }

    #[test]
    fn test_no_detection_tensor_is_empty_analysis() {
        let detector = FakeDetector::no_output();
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 600.0, 800.0).unwrap();
        assert!(pa.is_empty());
        assert_eq!(pa.page_w, 600.0);
        assert_eq!(pa.page_h, 800.0);
    }

    #[test]
    fn test_zero_rows_is_empty_analysis() {
        let detector = FakeDetector::from_rows(vec![]);
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 600.0, 800.0).unwrap();
        assert!(pa.is_empty());
    }

    #[test]
    fn test_order_column_overrides_array_order() {
        // Rows arrive as A, B, C with detector orders 2, 0, 1; the final
        // sequence is B, C, A with dense ranks.
        let detector = FakeDetector::from_rows(vec![
            vec![22.0, 0.9, 10.0, 10.0, 110.0, 60.0, 2.0],  // A
            vec![22.0, 0.9, 10.0, 120.0, 110.0, 170.0, 0.0], // B
            vec![22.0, 0.9, 10.0, 230.0, 110.0, 280.0, 1.0], // C
        ]);
        let pixmap = white_pixmap(400, 400);
        let pa = analyze_pixmap(&detector, &pixmap, 400.0, 400.0).unwrap();
        assert_eq!(pa.blocks.len(), 3);
        assert_eq!(pa.blocks[0].bbox.y0, 120.0); // B
        assert_eq!(pa.blocks[1].bbox.y0, 230.0); // C
        assert_eq!(pa.blocks[2].bbox.y0, 10.0); // A
        let orders: Vec<u32> = pa.blocks.iter().map(|b| b.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_six_column_output_falls_back_to_y_sort() {
        let detector = FakeDetector::from_rows(vec![
            vec![22.0, 0.9, 10.0, 230.0, 110.0, 280.0],
            vec![22.0, 0.9, 10.0, 10.0, 110.0, 60.0],
            vec![22.0, 0.9, 10.0, 120.0, 110.0, 170.0],
        ]);
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 400.0, 400.0).unwrap();
        let tops: Vec<f32> = pa.blocks.iter().map(|b| b.bbox.y0).collect();
        assert_eq!(tops, vec![10.0, 120.0, 230.0]);
    }

    #[test]
    fn test_filters_confidence_class_and_slivers() {
        let detector = FakeDetector::from_rows(vec![
            vec![22.0, 0.39, 10.0, 10.0, 110.0, 60.0, 0.0], // low confidence
            vec![25.0, 0.9, 10.0, 10.0, 110.0, 60.0, 0.0],  // class off table
            vec![-1.0, 0.9, 10.0, 10.0, 110.0, 60.0, 0.0],  // negative class
            vec![22.0, 0.9, 10.0, 10.0, 110.0, 13.0, 0.0],  // 3px tall sliver
            vec![22.0, 0.9, 390.0, 10.0, 500.0, 60.0, 0.0], // clamps to 10px wide
            vec![22.0, 0.9, 10.0, 100.0, 110.0, 160.0, 0.0], // survives
        ]);
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 400.0, 400.0).unwrap();
        assert_eq!(pa.blocks.len(), 2);
        // The off-page box was clamped into the page before the size check;
        // with equal detector orders the y tiebreak puts it first.
        assert_eq!(pa.blocks[0].bbox.x0, 390.0);
        assert_eq!(pa.blocks[0].bbox.x1, 400.0);
        assert_eq!(pa.blocks[1].bbox.x0, 10.0);
    }

    #[test]
    fn test_overlapping_pair_suppressed() {
        // IoU ~= 0.68 between these two, so the lower-confidence one goes.
        let detector = FakeDetector::from_rows(vec![
            vec![22.0, 0.9, 0.0, 0.0, 100.0, 100.0, 0.0],
            vec![22.0, 0.85, 10.0, 10.0, 110.0, 110.0, 0.0],
        ]);
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 400.0, 400.0).unwrap();
        assert_eq!(pa.blocks.len(), 1);
        assert_eq!(pa.blocks[0].confidence, 0.9);
    }

    #[test]
    fn test_point_space_mapping_and_invariants() {
        let detector = FakeDetector::from_rows(vec![
            vec![17.0, 0.95, 40.0, 20.0, 360.0, 60.0, 0.0],
            vec![22.0, 0.8, 40.0, 80.0, 360.0, 380.0, 1.0],
        ]);
        // Pixmap is 400x400 for a 600x800pt page: sx = 1.5, sy = 2.0.
        let pa = analyze_pixmap(&detector, &white_pixmap(400, 400), 600.0, 800.0).unwrap();
        assert_eq!(pa.blocks.len(), 2);
        assert_eq!(pa.blocks[0].bbox, BBox::new(60.0, 40.0, 540.0, 120.0));
        assert_eq!(pa.blocks[1].bbox, BBox::new(60.0, 160.0, 540.0, 760.0));

        for (i, block) in pa.blocks.iter().enumerate() {
            assert_eq!(block.order, i as u32);
            assert!(!block.lines.is_empty());
            assert!(block.bbox.x0 >= 0.0 && block.bbox.x1 <= pa.page_w);
            assert!(block.bbox.y0 >= 0.0 && block.bbox.y1 <= pa.page_h);
        }
        // Blank page: every block falls back to its vertical midline.
        assert_eq!(pa.blocks[0].lines[0].y_center, 80.0);
        assert_eq!(pa.blocks[0].lines[0].height, 80.0);
    }

    #[test]
    fn test_line_detection_feeds_blocks() {
        // Put ink bands inside the block region of the pixmap.
        let mut pixmap = white_pixmap(400, 400);
        for &(r0, r1) in &[(100u32, 110u32), (140, 150), (180, 190)] {
            for y in r0..r1 {
                for x in 40..360 {
                    let i = ((y * 400 + x) * 3) as usize;
                    pixmap.rgb[i..i + 3].copy_from_slice(&[0, 0, 0]);
                }
            }
        }
        let detector = FakeDetector::from_rows(vec![vec![
            22.0, 0.9, 40.0, 90.0, 360.0, 200.0, 0.0,
        ]]);
        let pa = analyze_pixmap(&detector, &pixmap, 400.0, 400.0).unwrap();
        assert_eq!(pa.blocks.len(), 1);
        let lines = &pa.blocks[0].lines;
        assert_eq!(lines.len(), 3);
        assert!(lines.windows(2).all(|w| w[0].y_center < w[1].y_center));
        assert!((lines[0].y_center - 105.0).abs() <= 1.0);
        assert!((lines[2].y_center - 185.0).abs() <= 1.0);
    }

    #[test]
    fn test_preprocess_tensor_shapes() {
        let mut pixmap = white_pixmap(400, 200);
        pixmap.rgb[0] = 51; // top-left red channel
        let input = preprocess(&pixmap).unwrap();
        assert_eq!(input.image.shape(), &[1, 3, 800, 800]);
        assert_eq!(input.im_shape[[0, 0]], 800.0);
        assert_eq!(input.im_shape[[0, 1]], 800.0);
        assert_eq!(input.scale_factor[[0, 0]], 4.0); // 800 / 200
        assert_eq!(input.scale_factor[[0, 1]], 2.0); // 800 / 400
        assert!((input.image[[0, 0, 0, 0]] - 0.2).abs() < 1e-6);
        assert_eq!(input.image[[0, 1, 0, 0]], 1.0);
    }
}
