use crate::entities::BBox;
use crate::raster::Pixmap;

/// Luminance below which a pixel counts as ink, out of 255.
const INK_LUMA: f32 = 160.0;
/// Fraction of the mean nonzero row density a row must reach to be text.
const REL_THRESHOLD: f32 = 0.15;
/// Absolute density floor, guarding against near-blank regions.
const ABS_THRESHOLD: f32 = 0.005;
/// Minimum run length, in pixmap rows, to count as a line.
const MIN_RUN_LEN: usize = 3;

/// A contiguous band of inked rows, in pixmap pixel coordinates relative
/// to the page (not the block).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RowBand {
    pub y_center: f32,
    pub height: f32,
}

/// Horizontal-projection line detection over one block's sub-region of the
/// coarse pixmap. Returns the detected bands top-to-bottom; empty when the
/// region has no rows above the ink threshold.
pub(crate) fn detect_row_bands(pixmap: &Pixmap, bbox_px: &BBox) -> Vec<RowBand> {
    let x0 = (bbox_px.x0.max(0.0) as usize).min(pixmap.width as usize);
    let x1 = (bbox_px.x1.max(0.0) as usize).min(pixmap.width as usize);
    let y0 = (bbox_px.y0.max(0.0) as usize).min(pixmap.height as usize);
    let y1 = (bbox_px.y1.max(0.0) as usize).min(pixmap.height as usize);
    if x1 <= x0 || y1 <= y0 {
        return Vec::new();
    }

    let densities = row_ink_densities(pixmap, x0, x1, y0, y1);
    let smoothed = box_smooth(&densities);

    let nonzero: Vec<f32> = smoothed.iter().copied().filter(|&d| d > 0.0).collect();
    if nonzero.is_empty() {
        return Vec::new();
    }
    let mean = nonzero.iter().sum::<f32>() / nonzero.len() as f32;
    let threshold = (REL_THRESHOLD * mean).max(ABS_THRESHOLD);

    let mut bands = Vec::new();
    let mut run_start: Option<usize> = None;
    for (row, &density) in smoothed.iter().enumerate() {
        if density > threshold {
            run_start.get_or_insert(row);
        } else if let Some(start) = run_start.take() {
            push_band(&mut bands, y0, start, row);
        }
    }
    if let Some(start) = run_start {
        push_band(&mut bands, y0, start, smoothed.len());
    }
    bands
}

fn push_band(bands: &mut Vec<RowBand>, y0: usize, start: usize, end: usize) {
    let len = end - start;
    if len < MIN_RUN_LEN {
        return;
    }
    bands.push(RowBand {
        y_center: y0 as f32 + (start + end) as f32 / 2.0,
        height: len as f32,
    });
}

/// Fraction of ink pixels per row within the column window.
fn row_ink_densities(pixmap: &Pixmap, x0: usize, x1: usize, y0: usize, y1: usize) -> Vec<f32> {
    let width = (x1 - x0) as f32;
    let stride = pixmap.width as usize * 3;
    (y0..y1)
        .map(|y| {
            let row = &pixmap.rgb[y * stride + x0 * 3..y * stride + x1 * 3];
            let ink = row
                .chunks_exact(3)
                .filter(|px| {
                    let luma =
                        0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    luma < INK_LUMA
                })
                .count();
            ink as f32 / width
        })
        .collect()
}

/// Radius-1 box smoother; edge rows average over the in-bounds window.
fn box_smooth(densities: &[f32]) -> Vec<f32> {
    let n = densities.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(n);
            densities[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}
