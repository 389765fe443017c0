use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;

use crate::analysis::{AnalysisKey, AnalysisRequest, AnalysisResult, AnalysisWorker};
use crate::config::ViewerConfig;
use crate::entities::{PageID, SharedAnalysis};
use crate::layout::model::OrtLayoutDetector;
use crate::raster::{PageRasterizer, Pixmap, RasterImage, SharedRaster};

use super::camera::{dpi_for_zoom, needs_rerender, Camera};
use super::rail::{LineStep, RailNavigator, RailTuning};
use super::Viewport;

/// Which edge of a page the rail cursor enters from once analysis lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailEntry {
    Start,
    End,
}

struct RasterTask {
    page: PageID,
    rx: oneshot::Receiver<anyhow::Result<RasterImage>>,
}

struct PixmapTask {
    page: PageID,
    rx: oneshot::Receiver<anyhow::Result<Pixmap>>,
}

/// All state owned by one open document: page cursor, camera, rail, the
/// cached page bitmap at its DPI tier, the per-page analysis cache, and
/// the in-flight background work slots.
pub struct TabState {
    pub file_path: PathBuf,
    pub page_count: usize,
    pub cur_page: PageID,
    pub page_w: f32,
    pub page_h: f32,
    pub camera: Camera,
    pub rail: RailNavigator,
    /// Swapped whole, never mutated in place: the compositor may still
    /// hold the previous reference.
    pub cached_image: Option<SharedRaster>,
    pub pending_rail_setup: bool,
    rail_entry: RailEntry,
    /// Set when the current page's render failed; blocks re-render
    /// scheduling so a broken page is not retried every frame.
    raster_failed: bool,
    analysis_cache: HashMap<PageID, SharedAnalysis>,
    lookahead_queue: VecDeque<PageID>,
    raster_task: Option<RasterTask>,
    pixmap_task: Option<PixmapTask>,
    rasterizer: Arc<dyn PageRasterizer>,
    runtime: tokio::runtime::Handle,
    navigable_classes: HashSet<usize>,
    lookahead_pages: usize,
}

impl TabState {
    /// Open a document: read page geometry, fit the camera, render the
    /// base-tier bitmap, and submit the first page for analysis.
    pub async fn open(
        file_path: PathBuf,
        rasterizer: Arc<dyn PageRasterizer>,
        worker: &mut AnalysisWorker,
        config: &ViewerConfig,
        viewport: Viewport,
    ) -> anyhow::Result<Self> {
        let page_count = rasterizer.page_count() as usize;
        anyhow::ensure!(page_count > 0, "document has no pages");
        let (page_w, page_h) = rasterizer.page_size(0)?;

        let mut camera = Camera::default();
        camera.fit_page(page_w, page_h, viewport);

        let dpi = dpi_for_zoom(camera.zoom);
        let raster = rasterizer.clone();
        let (image, pixmap) = tokio::task::spawn_blocking(move || {
            let image = raster.render_page(0, dpi)?;
            let pixmap = raster.render_pixmap(0, OrtLayoutDetector::INPUT_SIZE)?;
            anyhow::Ok((image, pixmap))
        })
        .await
        .context("raster task panicked")??;

        let mut tab = Self {
            file_path,
            page_count,
            cur_page: 0,
            page_w,
            page_h,
            camera,
            rail: RailNavigator::new(RailTuning::from(config)),
            cached_image: Some(Arc::new(RasterImage { image, dpi })),
            pending_rail_setup: true,
            rail_entry: RailEntry::Start,
            raster_failed: false,
            analysis_cache: HashMap::new(),
            lookahead_queue: VecDeque::new(),
            raster_task: None,
            pixmap_task: None,
            rasterizer,
            runtime: tokio::runtime::Handle::current(),
            navigable_classes: config.navigable_class_ids(),
            lookahead_pages: config.analysis_lookahead_pages.max(0) as usize,
        };
        tab.refill_lookahead();
        worker.submit(AnalysisRequest {
            key: tab.key(0),
            pixmap,
            page_w,
            page_h,
        });
        Ok(tab)
    }

    fn key(&self, page: PageID) -> AnalysisKey {
        AnalysisKey {
            file_path: self.file_path.clone(),
            page,
        }
    }

    pub fn current_analysis(&self) -> Option<&SharedAnalysis> {
        self.analysis_cache.get(&self.cur_page)
    }

    pub fn cached_analysis(&self, page: PageID) -> Option<&SharedAnalysis> {
        self.analysis_cache.get(&page)
    }

    /// True while background work could deliver something to poll for.
    pub fn has_background_work(&self) -> bool {
        self.raster_task.is_some()
            || self.pixmap_task.is_some()
            || !self.lookahead_queue.is_empty()
    }

    /// Change zoom about a screen cursor and re-evaluate rail activation.
    /// While in rail mode, every zoom change re-snaps the current line
    /// onto the rail.
    pub fn zoom_at_cursor(&mut self, new_zoom: f32, cursor: (f32, f32), viewport: Viewport) {
        self.camera.zoom_about(cursor, new_zoom);
        self.rail.update_zoom(&self.camera, viewport);
        if self.rail.is_active() {
            self.rail.start_snap_to_current(&self.camera, viewport);
        } else {
            self.camera.clamp_to_page(self.page_w, self.page_h, viewport);
        }
    }

    /// Jump to a page. Rail state resets; interest in pending work for
    /// the old page is dropped (results still land in the cache).
    pub fn set_page(&mut self, page: PageID, viewport: Viewport, entry: RailEntry) {
        if page >= self.page_count || page == self.cur_page {
            return;
        }
        self.cur_page = page;
        if let Ok((w, h)) = self.rasterizer.page_size(page) {
            self.page_w = w;
            self.page_h = h;
        }
        self.rail.clear_analysis();
        self.rail_entry = entry;
        self.pending_rail_setup = true;
        self.raster_failed = false;
        self.camera.clamp_to_page(self.page_w, self.page_h, viewport);

        // Discard the in-flight render for the page we left and start the
        // new page at whatever tier the zoom demands.
        self.raster_task = None;
        self.spawn_raster(page, dpi_for_zoom(self.camera.zoom));
        self.refill_lookahead();

        if let Some(analysis) = self.analysis_cache.get(&page).cloned() {
            self.install_analysis(analysis, viewport);
        } else if self
            .pixmap_task
            .as_ref()
            .map(|t| t.page != page)
            .unwrap_or(true)
        {
            self.pixmap_task = None;
            self.spawn_pixmap(page);
        }
    }

    /// Step the rail cursor forward, crossing to the next page when the
    /// current one is exhausted.
    pub fn advance_line(&mut self, viewport: Viewport) {
        match self.rail.next_line() {
            LineStep::Ok => self.rail.start_snap_to_current(&self.camera, viewport),
            LineStep::PageBoundaryNext => {
                if self.cur_page + 1 < self.page_count {
                    self.set_page(self.cur_page + 1, viewport, RailEntry::Start);
                }
            }
            LineStep::PageBoundaryPrev => {}
        }
    }

    /// Step the rail cursor backward, entering the previous page at its
    /// last line when crossing.
    pub fn retreat_line(&mut self, viewport: Viewport) {
        match self.rail.prev_line() {
            LineStep::Ok => self.rail.start_snap_to_current(&self.camera, viewport),
            LineStep::PageBoundaryPrev => {
                if self.cur_page > 0 {
                    self.set_page(self.cur_page - 1, viewport, RailEntry::End);
                }
            }
            LineStep::PageBoundaryNext => {}
        }
    }

    /// Route one worker result into this tab. Returns true when it was
    /// installed for the current page (overlay + snap changed).
    pub fn accept_result(&mut self, result: AnalysisResult, viewport: Viewport) -> bool {
        if result.key.file_path != self.file_path {
            return false;
        }
        let page = result.key.page;
        self.analysis_cache.insert(page, result.analysis.clone());
        if page == self.cur_page && self.pending_rail_setup {
            self.install_analysis(result.analysis, viewport);
            true
        } else {
            // The user has moved on; keep the analysis for when they
            // come back but leave the rail alone.
            false
        }
    }

    fn install_analysis(&mut self, analysis: SharedAnalysis, viewport: Viewport) {
        self.pending_rail_setup = false;
        self.rail.set_analysis(analysis, &self.navigable_classes);
        // Activation must be re-evaluated now: the zoom may already be
        // past the threshold, and no zoom change is coming to trigger it.
        self.rail.update_zoom(&self.camera, viewport);
        if self.rail_entry == RailEntry::End {
            self.rail.jump_to_end();
        }
        if self.rail.is_active() {
            self.rail.start_snap_to_current(&self.camera, viewport);
        }
        self.rail_entry = RailEntry::Start;
    }

    /// Move prepared lookahead pixmaps to the worker, one page at a time,
    /// only while the worker has nothing else to do.
    pub fn pump_lookahead(&mut self, worker: &mut AnalysisWorker) {
        if let Some(task) = &mut self.pixmap_task {
            match task.rx.try_recv() {
                Ok(Ok(pixmap)) => {
                    let page = task.page;
                    self.pixmap_task = None;
                    let (page_w, page_h) = match self.rasterizer.page_size(page) {
                        Ok(size) => size,
                        Err(_) => (self.page_w, self.page_h),
                    };
                    worker.submit(AnalysisRequest {
                        key: self.key(page),
                        pixmap,
                        page_w,
                        page_h,
                    });
                }
                Ok(Err(e)) => {
                    let page = task.page;
                    self.pixmap_task = None;
                    tracing::error!("pixmap render failed for page {page}: {e:?}");
                    if page == self.cur_page {
                        // No pixmap means no analysis is coming; don't
                        // leave the rail waiting for one.
                        self.pending_rail_setup = false;
                    }
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.pixmap_task = None;
                }
            }
        }

        if self.pixmap_task.is_none() && worker.is_idle() {
            while let Some(page) = self.lookahead_queue.pop_front() {
                if !self.analysis_cache.contains_key(&page) {
                    self.spawn_pixmap(page);
                    break;
                }
            }
        }
    }

    /// Poll the DPI re-render slot and schedule the next upgrade when the
    /// zoom has drifted off the cached tier. Returns true when the page
    /// bitmap was swapped.
    pub fn pump_raster(&mut self) -> bool {
        let mut swapped = false;
        if let Some(task) = &mut self.raster_task {
            match task.rx.try_recv() {
                Ok(Ok(raster)) => {
                    let page = task.page;
                    self.raster_task = None;
                    if page == self.cur_page {
                        // Built in full off-thread; the swap is a single
                        // reference assignment.
                        self.cached_image = Some(Arc::new(raster));
                        swapped = true;
                    }
                }
                Ok(Err(e)) => {
                    let page = task.page;
                    self.raster_task = None;
                    tracing::error!("render failed for page {page}: {e:?}");
                    if page == self.cur_page {
                        // Keep the previous bitmap; no automatic retry,
                        // and no rail lock onto a page we can't show.
                        self.raster_failed = true;
                        self.pending_rail_setup = false;
                    }
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.raster_task = None;
                }
            }
        }

        if self.raster_task.is_none() && !self.raster_failed {
            let needed = dpi_for_zoom(self.camera.zoom);
            if let Some(cached) = &self.cached_image {
                if needs_rerender(needed, cached.dpi) {
                    self.spawn_raster(self.cur_page, needed);
                }
            }
        }
        swapped
    }

    fn spawn_raster(&mut self, page: PageID, dpi: f32) {
        let raster = self.rasterizer.clone();
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            let result = raster
                .render_page(page, dpi)
                .map(|image| RasterImage { image, dpi });
            let _ = tx.send(result);
        });
        self.raster_task = Some(RasterTask { page, rx });
    }

    fn spawn_pixmap(&mut self, page: PageID) {
        let raster = self.rasterizer.clone();
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            let _ = tx.send(raster.render_pixmap(page, OrtLayoutDetector::INPUT_SIZE));
        });
        self.pixmap_task = Some(PixmapTask { page, rx });
    }

    fn refill_lookahead(&mut self) {
        self.lookahead_queue.clear();
        for page in self.cur_page + 1..=self.cur_page + self.lookahead_pages {
            if page < self.page_count && !self.analysis_cache.contains_key(&page) {
                self.lookahead_queue.push_back(page);
            }
        }
    }
}
