use std::collections::HashSet;
use std::time::Duration;

use itertools::Itertools;

use crate::config::ViewerConfig;
use crate::entities::{BBox, LayoutBlock, LineInfo, SharedAnalysis};

use super::camera::Camera;
use super::Viewport;

/// Screen fraction from the left edge where the active block's left edge
/// rests after a snap.
pub const RAIL_LEFT_FRACTION: f32 = 0.05;
/// Horizontal slack around a block during scrolling, as a fraction of the
/// block width.
const BLOCK_MARGIN_FRACTION: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Forward,
    Backward,
}

/// Outcome of a line-cursor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStep {
    Ok,
    /// The cursor was already on the last line of the last block.
    PageBoundaryNext,
    /// The cursor was already on the first line of the first block.
    PageBoundaryPrev,
}

#[derive(Debug, Clone)]
struct SnapAnim {
    start: (f32, f32),
    target: (f32, f32),
    elapsed: Duration,
    duration: Duration,
}

#[derive(Debug, Clone)]
struct ScrollHold {
    direction: ScrollDirection,
    /// Accumulated hold time in seconds; position is always derived from
    /// this total, never integrated per frame.
    held: f64,
    start_x: f32,
}

/// Rail parameters lifted out of the user config.
#[derive(Debug, Clone, Copy)]
pub struct RailTuning {
    pub zoom_threshold: f32,
    pub snap_duration_ms: f32,
    pub scroll_speed_start: f32,
    pub scroll_speed_max: f32,
    pub scroll_ramp_time: f32,
}

impl From<&ViewerConfig> for RailTuning {
    fn from(cfg: &ViewerConfig) -> Self {
        Self {
            zoom_threshold: cfg.rail_zoom_threshold,
            snap_duration_ms: cfg.snap_duration_ms,
            scroll_speed_start: cfg.scroll_speed_start,
            scroll_speed_max: cfg.scroll_speed_max,
            scroll_ramp_time: cfg.scroll_ramp_time,
        }
    }
}

/// Total scroll displacement in page points after holding for `held`
/// seconds: quadratic speed ramp up to `ramp` seconds, constant max
/// afterwards, integrated in closed form.
pub fn scroll_displacement(held: f64, tuning: &RailTuning) -> f64 {
    let s0 = tuning.scroll_speed_start as f64;
    let s1 = tuning.scroll_speed_max as f64;
    let ramp = tuning.scroll_ramp_time as f64;
    if held <= ramp {
        s0 * held + (s1 - s0) * held.powi(3) / (3.0 * ramp * ramp)
    } else {
        s0 * ramp + (s1 - s0) * ramp / 3.0 + s1 * (held - ramp)
    }
}

/// Block/line cursor over the current page's navigable blocks, plus the
/// snap animation and the ramped hold-to-scroll. Inactive until the zoom
/// crosses the threshold on a page with navigable analysis.
pub struct RailNavigator {
    tuning: RailTuning,
    analysis: Option<SharedAnalysis>,
    /// Indices into `analysis.blocks`, in reading order.
    navigable: Vec<usize>,
    active: bool,
    cur_block: usize,
    cur_line: usize,
    snap: Option<SnapAnim>,
    scroll: Option<ScrollHold>,
}

impl RailNavigator {
    pub fn new(tuning: RailTuning) -> Self {
        Self {
            tuning,
            analysis: None,
            navigable: Vec::new(),
            active: false,
            cur_block: 0,
            cur_line: 0,
            snap: None,
            scroll: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn has_analysis(&self) -> bool {
        self.analysis.is_some()
    }

    pub fn analysis(&self) -> Option<&SharedAnalysis> {
        self.analysis.as_ref()
    }

    pub fn navigable(&self) -> &[usize] {
        &self.navigable
    }

    /// `(block, line)` cursor within the navigable sequence.
    pub fn cursor(&self) -> Option<(usize, usize)> {
        if self.navigable.is_empty() {
            None
        } else {
            Some((self.cur_block, self.cur_line))
        }
    }

    pub fn current_block(&self) -> Option<&LayoutBlock> {
        let analysis = self.analysis.as_ref()?;
        let block_idx = *self.navigable.get(self.cur_block)?;
        analysis.blocks.get(block_idx)
    }

    pub fn current_line(&self) -> Option<LineInfo> {
        self.current_block()?.lines.get(self.cur_line).copied()
    }

    /// Install a page's analysis and recompute the navigable sequence.
    /// Cursor, snap and scroll are reset.
    pub fn set_analysis(&mut self, analysis: SharedAnalysis, navigable_classes: &HashSet<usize>) {
        self.navigable = analysis
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| navigable_classes.contains(&block.class_id))
            .map(|(idx, _)| idx)
            .collect();
        self.analysis = Some(analysis);
        self.cur_block = 0;
        self.cur_line = 0;
        self.snap = None;
        self.scroll = None;
    }

    /// Drop the analysis (page change); rail goes inactive.
    pub fn clear_analysis(&mut self) {
        self.analysis = None;
        self.navigable.clear();
        self.active = false;
        self.cur_block = 0;
        self.cur_line = 0;
        self.snap = None;
        self.scroll = None;
    }

    /// Re-evaluate activation after a zoom change or an analysis install.
    pub fn update_zoom(&mut self, cam: &Camera, viewport: Viewport) {
        let should_activate = cam.zoom >= self.tuning.zoom_threshold && !self.navigable.is_empty();
        if should_activate && !self.active {
            self.active = true;
            self.find_nearest_block(cam, viewport);
        } else if !should_activate {
            self.active = false;
            self.snap = None;
            self.scroll = None;
        }
    }

    /// Move the cursor to the navigable block whose center is closest to
    /// the viewport center.
    pub fn find_nearest_block(&mut self, cam: &Camera, viewport: Viewport) {
        let Some(analysis) = self.analysis.as_ref() else {
            return;
        };
        let (vx, vy) = viewport.center();
        let (px, py) = cam.screen_to_page(vx, vy);
        let nearest = self.navigable.iter().position_min_by(|&&a, &&b| {
            let da = analysis.blocks[a].bbox.center_distance_sq(px, py);
            let db = analysis.blocks[b].bbox.center_distance_sq(px, py);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(nav_idx) = nearest {
            self.cur_block = nav_idx;
            self.cur_line = 0;
        }
    }

    pub fn next_line(&mut self) -> LineStep {
        let Some(block) = self.current_block() else {
            return LineStep::Ok;
        };
        if self.cur_line + 1 < block.lines.len() {
            self.cur_line += 1;
        } else if self.cur_block + 1 < self.navigable.len() {
            self.cur_block += 1;
            self.cur_line = 0;
        } else {
            return LineStep::PageBoundaryNext;
        }
        LineStep::Ok
    }

    pub fn prev_line(&mut self) -> LineStep {
        if self.current_block().is_none() {
            return LineStep::Ok;
        }
        if self.cur_line > 0 {
            self.cur_line -= 1;
        } else if self.cur_block > 0 {
            self.cur_block -= 1;
            self.cur_line = self
                .current_block()
                .map(|b| b.lines.len() - 1)
                .unwrap_or(0);
        } else {
            return LineStep::PageBoundaryPrev;
        }
        LineStep::Ok
    }

    /// Land on the last line of the last block, for entering a page from
    /// its far edge.
    pub fn jump_to_end(&mut self) {
        if self.navigable.is_empty() {
            return;
        }
        self.cur_block = self.navigable.len() - 1;
        self.cur_line = self
            .current_block()
            .map(|b| b.lines.len() - 1)
            .unwrap_or(0);
    }

    /// Navigable index of the block containing a page point, if any.
    pub fn find_block_at_point(&self, page_x: f32, page_y: f32) -> Option<usize> {
        let analysis = self.analysis.as_ref()?;
        self.navigable
            .iter()
            .position(|&idx| analysis.blocks[idx].bbox.contains_point(page_x, page_y))
    }

    /// Put the cursor on a navigable block directly (hit-test selection).
    pub fn select_block(&mut self, nav_idx: usize) {
        if nav_idx < self.navigable.len() {
            self.cur_block = nav_idx;
            self.cur_line = 0;
        }
    }

    /// Begin animating the camera so the current line center rests at
    /// mid-viewport and the block's left edge at the rail column.
    pub fn start_snap_to_current(&mut self, cam: &Camera, viewport: Viewport) {
        let Some(block) = self.current_block() else {
            return;
        };
        let Some(line) = self.current_line() else {
            return;
        };
        let zoom = cam.zoom;
        let bbox = block.bbox.clone();
        let raw_x = viewport.w * RAIL_LEFT_FRACTION - bbox.x0 * zoom;
        let target_x = clamp_block_x(raw_x, &bbox, zoom, viewport);
        let target_y = viewport.h / 2.0 - line.y_center * zoom;
        self.snap = Some(SnapAnim {
            start: (cam.offset_x, cam.offset_y),
            target: (target_x, target_y),
            elapsed: Duration::ZERO,
            duration: Duration::from_secs_f32(self.tuning.snap_duration_ms.max(1.0) / 1000.0),
        });
    }

    /// Begin (or continue) a hold-to-scroll in `direction`, anchored at
    /// the current camera x. Repeated calls with the same direction are
    /// no-ops.
    pub fn start_scroll(&mut self, direction: ScrollDirection, cam_x: f32) {
        if let Some(hold) = &self.scroll {
            if hold.direction == direction {
                return;
            }
        }
        self.scroll = Some(ScrollHold {
            direction,
            held: 0.0,
            start_x: cam_x,
        });
    }

    pub fn stop_scroll(&mut self) {
        self.scroll = None;
    }

    pub fn is_snapping(&self) -> bool {
        self.snap.is_some()
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll.is_some()
    }

    /// Advance snap and scroll by `dt`; returns whether either is still
    /// running.
    pub fn tick(&mut self, cam: &mut Camera, dt: Duration, viewport: Viewport) -> bool {
        if let Some(snap) = &mut self.snap {
            snap.elapsed += dt;
            let t = (snap.elapsed.as_secs_f32() / snap.duration.as_secs_f32()).min(1.0);
            let eased = 1.0 - (1.0 - t).powi(3);
            cam.offset_x = snap.start.0 + (snap.target.0 - snap.start.0) * eased;
            cam.offset_y = snap.start.1 + (snap.target.1 - snap.start.1) * eased;
            if t >= 1.0 {
                self.snap = None;
            }
        }

        if let Some(hold) = &mut self.scroll {
            hold.held += dt.as_secs_f64();
        }
        if let Some(hold) = &self.scroll {
            let displacement = scroll_displacement(hold.held, &self.tuning);
            let sign = match hold.direction {
                ScrollDirection::Forward => -1.0,
                ScrollDirection::Backward => 1.0,
            };
            let raw_x = hold.start_x + (sign * displacement) as f32 * cam.zoom;
            cam.offset_x = match self.current_block() {
                Some(block) => clamp_block_x(raw_x, &block.bbox, cam.zoom, viewport),
                None => raw_x,
            };
        }

        self.snap.is_some() || self.scroll.is_some()
    }
}

/// Keep the block in horizontal reach: center it when it fits with its
/// margins, otherwise stop its edges at the viewport edges.
fn clamp_block_x(cam_x: f32, bbox: &BBox, zoom: f32, viewport: Viewport) -> f32 {
    let margin = BLOCK_MARGIN_FRACTION * bbox.width();
    if (bbox.width() + 2.0 * margin) * zoom <= viewport.w {
        return (viewport.w - bbox.width() * zoom) / 2.0 - bbox.x0 * zoom;
    }
    let min_x = viewport.w - (bbox.x1 + margin) * zoom;
    let max_x = (margin - bbox.x0) * zoom;
    cam_x.clamp(min_x, max_x)
}
