use std::time::{Duration, Instant};

use crate::analysis::AnalysisWorker;

use super::tab::TabState;
use super::Viewport;

/// Cadence of the idle poll timer that runs while the worker is busy and
/// no animation frames are being produced.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on per-frame animation time, so a stalled compositor does
/// not teleport animations.
pub const MAX_FRAME_DT: Duration = Duration::from_millis(50);

/// Which of the three paint layers need repainting after a tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Invalidations {
    /// Transform changed: re-composite, bitmap untouched.
    pub camera: bool,
    /// The page bitmap itself was replaced.
    pub page: bool,
    /// Rail highlights or analysis results changed.
    pub overlay: bool,
}

impl Invalidations {
    pub fn any(&self) -> bool {
        self.camera || self.page || self.overlay
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameReport {
    /// Re-arm the animation callback for another frame.
    pub animating: bool,
    pub invalidate: Invalidations,
}

/// Drives the per-frame work order. The shell owns the actual timers: it
/// re-arms a vsync callback while `animating`, and runs `poll_tick` on a
/// slow timer while `wants_poll_timer` — never both in the same frame.
pub struct FrameScheduler {
    last_frame: Option<Instant>,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self { last_frame: None }
    }

    /// Animation time for the frame starting at `now`, clamped to
    /// `MAX_FRAME_DT`.
    pub fn frame_dt(&mut self, now: Instant) -> Duration {
        let dt = match self.last_frame {
            Some(last) => now.saturating_duration_since(last).min(MAX_FRAME_DT),
            None => Duration::ZERO,
        };
        self.last_frame = Some(now);
        dt
    }

    /// The animation callback stopped re-arming; the next frame starts a
    /// fresh dt baseline.
    pub fn reset(&mut self) {
        self.last_frame = None;
    }

    /// One animation frame, in fixed order: rail tick, zoom-speed decay,
    /// result polling, lookahead submission, DPI swap check.
    pub fn tick(
        &mut self,
        tab: &mut TabState,
        worker: &mut AnalysisWorker,
        viewport: Viewport,
        dt: Duration,
    ) -> FrameReport {
        let dt = dt.min(MAX_FRAME_DT);
        let mut invalidate = Invalidations::default();

        if tab.rail.tick(&mut tab.camera, dt, viewport) {
            invalidate.camera = true;
        }
        tab.camera.decay_zoom_speed(dt);

        while let Some(result) = worker.poll() {
            if tab.accept_result(result, viewport) {
                invalidate.overlay = true;
                invalidate.camera = true;
            }
        }

        tab.pump_lookahead(worker);
        if tab.pump_raster() {
            invalidate.page = true;
        }

        let animating =
            tab.rail.is_snapping() || tab.rail.is_scrolling() || tab.camera.zoom_speed > 0.0;
        FrameReport {
            animating,
            invalidate,
        }
    }

    /// Idle work only — result polling and background pumping — for the
    /// slow timer. Animation time is never advanced here.
    pub fn poll_tick(
        tab: &mut TabState,
        worker: &mut AnalysisWorker,
        viewport: Viewport,
    ) -> Invalidations {
        let mut invalidate = Invalidations::default();
        while let Some(result) = worker.poll() {
            if tab.accept_result(result, viewport) {
                invalidate.overlay = true;
                invalidate.camera = true;
            }
        }
        tab.pump_lookahead(worker);
        if tab.pump_raster() {
            invalidate.page = true;
        }
        invalidate
    }

    /// Whether the slow timer should stay armed.
    pub fn wants_poll_timer(tab: &TabState, worker: &AnalysisWorker) -> bool {
        !worker.is_idle() || tab.has_background_work()
    }
}
