use std::time::Duration;

use super::Viewport;

pub const ZOOM_MIN: f32 = 0.1;
pub const ZOOM_MAX: f32 = 20.0;

/// Raster DPI of the base tier; also the floor of the tier range.
pub const BASE_DPI: f32 = 150.0;
pub const MAX_DPI: f32 = 600.0;

/// Half-life of the zoom-speed metric driving the motion-blur effect.
const ZOOM_SPEED_HALF_LIFE_MS: f32 = 80.0;
/// Below this the metric reads as settled.
const ZOOM_SPEED_EPSILON: f32 = 1e-3;

/// Screen transform for one tab: `screen = offset + zoom * page`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
    /// Decaying indicator that the zoom changed recently.
    pub zoom_speed: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
            zoom_speed: 0.0,
        }
    }
}

impl Camera {
    pub fn set_zoom(&mut self, zoom: f32) {
        let zoom = zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        if zoom != self.zoom {
            self.zoom = zoom;
            self.zoom_speed = 1.0;
        }
    }

    /// Change zoom while keeping the page point under `cursor` fixed on
    /// screen.
    pub fn zoom_about(&mut self, cursor: (f32, f32), new_zoom: f32) {
        let new_zoom = new_zoom.clamp(ZOOM_MIN, ZOOM_MAX);
        let ratio = new_zoom / self.zoom;
        self.offset_x = cursor.0 - (cursor.0 - self.offset_x) * ratio;
        self.offset_y = cursor.1 - (cursor.1 - self.offset_y) * ratio;
        self.set_zoom(new_zoom);
    }

    /// Letterbox the whole page into the viewport.
    pub fn fit_page(&mut self, page_w: f32, page_h: f32, viewport: Viewport) {
        let zoom = (viewport.w / page_w).min(viewport.h / page_h);
        self.set_zoom(zoom);
        self.offset_x = (viewport.w - page_w * self.zoom) / 2.0;
        self.offset_y = (viewport.h - page_h * self.zoom) / 2.0;
    }

    /// Per axis: center the page when it fits, otherwise pin its visible
    /// edge to the viewport edge.
    pub fn clamp_to_page(&mut self, page_w: f32, page_h: f32, viewport: Viewport) {
        let scaled_w = page_w * self.zoom;
        let scaled_h = page_h * self.zoom;
        self.offset_x = if scaled_w <= viewport.w {
            (viewport.w - scaled_w) / 2.0
        } else {
            self.offset_x.clamp(viewport.w - scaled_w, 0.0)
        };
        self.offset_y = if scaled_h <= viewport.h {
            (viewport.h - scaled_h) / 2.0
        } else {
            self.offset_y.clamp(viewport.h - scaled_h, 0.0)
        };
    }

    pub fn decay_zoom_speed(&mut self, dt: Duration) {
        if self.zoom_speed == 0.0 {
            return;
        }
        let dt_ms = dt.as_secs_f32() * 1000.0;
        self.zoom_speed *= 0.5f32.powf(dt_ms / ZOOM_SPEED_HALF_LIFE_MS);
        if self.zoom_speed < ZOOM_SPEED_EPSILON {
            self.zoom_speed = 0.0;
        }
    }

    #[inline(always)]
    pub fn screen_to_page(&self, sx: f32, sy: f32) -> (f32, f32) {
        (
            (sx - self.offset_x) / self.zoom,
            (sy - self.offset_y) / self.zoom,
        )
    }

    #[inline(always)]
    pub fn page_to_screen(&self, px: f32, py: f32) -> (f32, f32) {
        (
            self.offset_x + px * self.zoom,
            self.offset_y + py * self.zoom,
        )
    }
}

/// DPI the cached page bitmap should be rendered at for a given zoom.
pub fn dpi_for_zoom(zoom: f32) -> f32 {
    (zoom * BASE_DPI).clamp(BASE_DPI, MAX_DPI)
}

/// Whether the cached bitmap is far enough off the needed tier to be
/// worth a re-render. Downgrades never go below the base tier.
pub fn needs_rerender(needed: f32, cached: f32) -> bool {
    needed > cached * 1.4 || (needed < cached * 0.4 && cached > BASE_DPI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_anchored_zoom() {
        let mut cam = Camera::default();
        cam.zoom_about((200.0, 200.0), 2.0);
        assert_eq!(cam.offset_x, -200.0);
        assert_eq!(cam.offset_y, -200.0);
        assert_eq!(cam.zoom, 2.0);
        assert_eq!(cam.zoom_speed, 1.0);
    }

    #[test]
    fn test_cursor_anchored_zoom_inverts() {
        let mut cam = Camera {
            offset_x: -37.5,
            offset_y: 12.25,
            zoom: 1.75,
            zoom_speed: 0.0,
        };
        let cursor = (433.0, 291.0);
        let original = (cam.offset_x, cam.offset_y);
        let (px, py) = cam.screen_to_page(cursor.0, cursor.1);

        cam.zoom_about(cursor, 6.5);
        // The page point under the cursor is preserved...
        let (px2, py2) = cam.screen_to_page(cursor.0, cursor.1);
        assert!((px - px2).abs() < 1e-3 && (py - py2).abs() < 1e-3);

        // ...and zooming back restores the offset.
        cam.zoom_about(cursor, 1.75);
        assert!((cam.offset_x - original.0).abs() < 1e-3);
        assert!((cam.offset_y - original.1).abs() < 1e-3);
    }

    #[test]
    fn test_fit_page_centers() {
        let mut cam = Camera::default();
        let viewport = Viewport::new(1000.0, 700.0);
        cam.fit_page(600.0, 800.0, viewport);
        assert_eq!(cam.zoom, 700.0 / 800.0);
        // Vertically exact, horizontally letterboxed.
        assert_eq!(cam.offset_y, 0.0);
        assert_eq!(cam.offset_x, (1000.0 - 600.0 * cam.zoom) / 2.0);
    }

    #[test]
    fn test_clamp_centers_or_pins_edges() {
        let viewport = Viewport::new(1000.0, 700.0);

        // Small page: centered both ways.
        let mut cam = Camera {
            offset_x: 500.0,
            offset_y: -900.0,
            zoom: 0.5,
            zoom_speed: 0.0,
        };
        cam.clamp_to_page(600.0, 800.0, viewport);
        assert_eq!(cam.offset_x, (1000.0 - 300.0) / 2.0);
        assert_eq!(cam.offset_y, (700.0 - 400.0) / 2.0);

        // Large page: offsets pinned so an edge meets the viewport edge.
        let mut cam = Camera {
            offset_x: 50.0,
            offset_y: -9000.0,
            zoom: 4.0,
            zoom_speed: 0.0,
        };
        cam.clamp_to_page(600.0, 800.0, viewport);
        assert_eq!(cam.offset_x, 0.0); // left page edge at left viewport edge
        assert_eq!(cam.offset_y, 700.0 - 800.0 * 4.0); // bottom edge pinned
    }

    #[test]
    fn test_zoom_speed_half_life() {
        let mut cam = Camera::default();
        cam.set_zoom(2.0);
        assert_eq!(cam.zoom_speed, 1.0);
        cam.decay_zoom_speed(Duration::from_millis(80));
        assert!((cam.zoom_speed - 0.5).abs() < 1e-4);
        cam.decay_zoom_speed(Duration::from_millis(160));
        assert!((cam.zoom_speed - 0.125).abs() < 1e-4);
        // Long settle snaps to zero.
        cam.decay_zoom_speed(Duration::from_secs(2));
        assert_eq!(cam.zoom_speed, 0.0);
    }

    #[test]
    fn test_set_zoom_clamps_and_marks_change() {
        let mut cam = Camera::default();
        cam.set_zoom(50.0);
        assert_eq!(cam.zoom, ZOOM_MAX);
        cam.zoom_speed = 0.0;
        cam.set_zoom(ZOOM_MAX); // no change, no motion
        assert_eq!(cam.zoom_speed, 0.0);
        cam.set_zoom(0.01);
        assert_eq!(cam.zoom, ZOOM_MIN);
        assert_eq!(cam.zoom_speed, 1.0);
    }

    #[test]
    fn test_dpi_tiers() {
        assert_eq!(dpi_for_zoom(0.5), 150.0);
        assert_eq!(dpi_for_zoom(1.0), 150.0);
        assert_eq!(dpi_for_zoom(2.0), 300.0);
        assert_eq!(dpi_for_zoom(10.0), 600.0);

        assert!(!needs_rerender(150.0, 150.0));
        assert!(!needs_rerender(200.0, 150.0)); // within the 1.4x band
        assert!(needs_rerender(300.0, 150.0));
        assert!(needs_rerender(150.0, 600.0)); // big downgrade
        assert!(!needs_rerender(149.0, 150.0)); // base tier never downgrades
    }
}
