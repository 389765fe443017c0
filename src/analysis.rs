use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::entities::{fallback_analysis, PageAnalysis, PageID, SharedAnalysis};
use crate::layout::analyze_pixmap;
use crate::layout::model::{LayoutDetector, OrtConfig, OrtLayoutDetector};
use crate::raster::Pixmap;

/// Identity of one analysis request; at most one request per key may be
/// in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub file_path: PathBuf,
    pub page: PageID,
}

#[derive(Debug)]
pub struct AnalysisRequest {
    pub key: AnalysisKey,
    pub pixmap: Pixmap,
    pub page_w: f32,
    pub page_h: f32,
}

#[derive(Debug)]
pub struct AnalysisResult {
    pub key: AnalysisKey,
    pub analysis: SharedAnalysis,
    /// True when the detector was unavailable and the synthetic
    /// whole-page analysis was served instead.
    pub fallback: bool,
    pub inference: Duration,
}

/// Handle to the single inference thread. Requests and results travel on
/// unbounded queues; the handle tracks which keys are in flight so every
/// accepted request yields exactly one result.
///
/// The detector session is created on the worker thread and never leaves
/// it. If the session cannot be created the thread stays up and serves
/// the fallback analysis for every request.
pub struct AnalysisWorker {
    request_tx: Option<UnboundedSender<AnalysisRequest>>,
    result_rx: UnboundedReceiver<AnalysisResult>,
    in_flight: HashSet<AnalysisKey>,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    pub fn spawn(config: OrtConfig) -> Self {
        Self::spawn_with(move || OrtLayoutDetector::new(config))
    }

    pub fn spawn_with<D, F>(factory: F) -> Self
    where
        D: LayoutDetector + 'static,
        F: FnOnce() -> anyhow::Result<D> + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("layout-analysis".into())
            .spawn(move || run_worker(factory, request_rx, result_tx))
            .expect("can't spawn analysis thread");
        Self {
            request_tx: Some(request_tx),
            result_rx,
            in_flight: HashSet::new(),
            thread: Some(thread),
        }
    }

    /// Queue a request. Returns false when the same `(file, page)` is
    /// already in flight or the worker is shut down.
    pub fn submit(&mut self, request: AnalysisRequest) -> bool {
        if self.in_flight.contains(&request.key) {
            return false;
        }
        let Some(tx) = &self.request_tx else {
            return false;
        };
        let key = request.key.clone();
        if tx.send(request).is_err() {
            tracing::error!("analysis thread is gone; dropping request");
            return false;
        }
        self.in_flight.insert(key);
        true
    }

    /// Non-blocking result fetch; clears the in-flight mark for the key.
    pub fn poll(&mut self) -> Option<AnalysisResult> {
        let result = self.result_rx.try_recv().ok()?;
        self.in_flight.remove(&result.key);
        Some(result)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Close the request queue and wait for the thread to drain and exit.
    pub fn shutdown(mut self) {
        self.request_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain and exit on its own.
        self.request_tx.take();
    }
}

fn run_worker<D, F>(
    factory: F,
    mut request_rx: UnboundedReceiver<AnalysisRequest>,
    result_tx: UnboundedSender<AnalysisResult>,
) where
    D: LayoutDetector + 'static,
    F: FnOnce() -> anyhow::Result<D>,
{
    let detector = match factory() {
        Ok(detector) => Some(detector),
        Err(e) => {
            tracing::error!("layout detector unavailable, serving fallback analyses: {e:?}");
            None
        }
    };

    while let Some(request) = request_rx.blocking_recv() {
        let start = Instant::now();
        let (analysis, fallback) = match &detector {
            Some(detector) => {
                match analyze_pixmap(detector, &request.pixmap, request.page_w, request.page_h) {
                    Ok(analysis) => (analysis, false),
                    Err(e) => {
                        tracing::error!("analysis failed for page {}: {e:?}", request.key.page);
                        (
                            PageAnalysis::empty(request.page_w, request.page_h),
                            false,
                        )
                    }
                }
            }
            None => (fallback_analysis(request.page_w, request.page_h), true),
        };
        let inference = start.elapsed();
        tracing::debug!(
            "analysis for page {} took {}ms ({} blocks)",
            request.key.page,
            inference.as_millis(),
            analysis.blocks.len()
        );
        let sent = result_tx.send(AnalysisResult {
            key: request.key,
            analysis: Arc::new(analysis),
            fallback,
            inference,
        });
        if sent.is_err() {
            // Consumer is gone; nothing left to drain for.
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::model::testing::FakeDetector;

    fn request(page: PageID) -> AnalysisRequest {
        AnalysisRequest {
            key: AnalysisKey {
                file_path: "/tmp/doc.pdf".into(),
                page,
            },
            pixmap: Pixmap {
                rgb: vec![255u8; 40 * 40 * 3],
                width: 40,
                height: 40,
            },
            page_w: 600.0,
            page_h: 800.0,
        }
    }

    fn wait_result(worker: &mut AnalysisWorker) -> AnalysisResult {
        for _ in 0..1000 {
            if let Some(result) = worker.poll() {
                return result;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("no analysis result within 2s");
    }

    #[test]
    fn test_duplicate_key_rejected_until_result() {
        let mut worker = AnalysisWorker::spawn_with(|| {
            Ok(FakeDetector::from_rows(vec![vec![
                22.0, 0.9, 2.0, 2.0, 38.0, 38.0, 0.0,
            ]]))
        });
        assert!(worker.submit(request(0)));
        assert!(!worker.submit(request(0)));
        assert!(worker.submit(request(1)));
        assert!(!worker.is_idle());

        let first = wait_result(&mut worker);
        let second = wait_result(&mut worker);
        assert_ne!(first.key.page, second.key.page);
        assert!(worker.is_idle());

        // Key free again once its result was polled.
        assert!(worker.submit(request(0)));
        let redo = wait_result(&mut worker);
        assert_eq!(redo.key.page, 0);
        assert_eq!(redo.analysis.blocks.len(), 1);
        assert!(!redo.fallback);
    }

    #[test]
    fn test_fallback_mode_on_startup_failure() {
        let mut worker = AnalysisWorker::spawn_with(|| {
            anyhow::Result::<FakeDetector>::Err(anyhow::anyhow!("model load failed"))
        });
        assert!(worker.submit(request(3)));
        let result = wait_result(&mut worker);
        assert!(result.fallback);
        assert_eq!(result.analysis.blocks.len(), 1);
        assert_eq!(result.analysis.page_w, 600.0);
        assert!(worker.is_idle());
    }

    #[test]
    fn test_empty_detector_output_still_produces_result() {
        let mut worker = AnalysisWorker::spawn_with(|| Ok(FakeDetector::no_output()));
        assert!(worker.submit(request(7)));
        let result = wait_result(&mut worker);
        assert!(!result.fallback);
        assert!(result.analysis.is_empty());
    }

    #[test]
    fn test_shutdown_joins() {
        let mut worker = AnalysisWorker::spawn_with(|| Ok(FakeDetector::no_output()));
        assert!(worker.submit(request(0)));
        worker.shutdown();
    }
}
