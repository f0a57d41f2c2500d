//! 推理线程: 检测 → 精修 → 轮廓 → 事件

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::RecvTimeoutError;
use image::{GrayImage, Rgb, RgbImage};

use super::{EventStore, Frame, FrameResult, PatrolState, Slot, WorkItem};
use crate::config::PipelineConfig;
use crate::detection::{
    accumulate, binarize, draw_polylines, external_contours, fill_polygon, filter_by_area,
};
use crate::models::{MaskRefiner, SegmentDetector};
use crate::Detection;

const POLL: Duration = Duration::from_secs(1);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

pub struct InferenceWorker<D, R> {
    detector: D,
    refiner: R,
    config: PipelineConfig,
    events: EventStore,
    results: Slot<FrameResult>,
}

impl<D: SegmentDetector, R: MaskRefiner> InferenceWorker<D, R> {
    pub fn new(
        detector: D,
        refiner: R,
        config: PipelineConfig,
        events: EventStore,
        results: Slot<FrameResult>,
    ) -> Self {
        Self {
            detector,
            refiner,
            config,
            events,
            results,
        }
    }

    fn qualifies(&self, det: &Detection, width: u32, height: u32) -> bool {
        if det.class_id() != self.config.target_class_id || det.segment.is_empty() {
            return false;
        }
        let (x1, y1, x2, y2) = det.bbox.clamped(width, height);
        (x2 - x1) as u64 * (y2 - y1) as u64 >= self.config.min_box_area as u64
    }

    /// Runs one frame through both models. `None` when no detection qualified.
    pub fn process(&mut self, frame: Frame) -> Result<Option<FrameResult>> {
        let t = Instant::now();
        let (w, h) = frame.image.dimensions();
        let detections = self.detector.detect(&frame.image)?;

        let mut acc = GrayImage::new(w, h);
        let mut segments = Vec::with_capacity(detections.len());
        let mut refined = 0;
        for det in detections.iter() {
            segments.push(det.segment.clone());
            if !self.qualifies(det, w, h) {
                continue;
            }

            let (x1, y1, x2, y2) = det.bbox.clamped(w, h);
            let coarse = fill_polygon(w, h, &det.segment);
            let crop = RgbImage::from_fn(x2 - x1, y2 - y1, |x, y| {
                if coarse.get_pixel(x1 + x, y1 + y).0[0] > 0 {
                    *frame.image.get_pixel(x1 + x, y1 + y)
                } else {
                    Rgb([0, 0, 0])
                }
            });

            let sub = self.refiner.refine(&crop)?;
            accumulate(&mut acc, &sub, x1, y1);
            refined += 1;
        }

        if refined == 0 {
            log::debug!(
                "no {} above {}px² in {} detections",
                crate::class_name(self.config.target_class_id),
                self.config.min_box_area,
                detections.len()
            );
            return Ok(None);
        }

        binarize(&mut acc);
        let mask = acc;
        let contours = filter_by_area(external_contours(&mask), self.config.contour_area_range);
        log::debug!(
            "🔍 {} detections, {} refined, {} contours ({:?})",
            detections.len(),
            refined,
            contours.len(),
            t.elapsed()
        );

        if !contours.is_empty() {
            let mut canvas = frame.image.clone();
            draw_polylines(&mut canvas, &contours, GREEN, 3);
            draw_polylines(&mut canvas, &segments, RED, 3);
            self.events.persist(&canvas, &frame.captured_at);
        }

        Ok(Some(FrameResult { mask, segments }))
    }

    /// Worker loop. Returns on the shutdown sentinel or when `stop` is raised.
    pub fn run(&mut self, inbox: Slot<WorkItem>, stop: Arc<AtomicBool>) {
        log::info!("🚀 inference worker started");
        loop {
            let frame = match inbox.take_timeout(POLL) {
                Ok(WorkItem::Frame(frame)) => frame,
                Ok(WorkItem::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    continue;
                }
            };

            match self.process(frame) {
                Ok(Some(result)) => {
                    if self.results.replace(result).is_some() {
                        log::trace!("unread result replaced");
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("⚠️  inference failed, frame skipped: {:#}", e),
            }
        }
        log::info!("🛑 inference worker stopped");
    }
}

/// 推理线程句柄
pub struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    inbox: Slot<WorkItem>,
    state: Arc<PatrolState>,
    stop: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Loads the models inside a named thread and runs the worker loop there.
    /// A load failure ends the thread.
    pub fn spawn<D, R, F>(
        loader: F,
        config: PipelineConfig,
        events: EventStore,
        inbox: Slot<WorkItem>,
        results: Slot<FrameResult>,
        state: Arc<PatrolState>,
    ) -> Result<Self>
    where
        D: SegmentDetector + 'static,
        R: MaskRefiner + 'static,
        F: FnOnce() -> Result<(D, R)> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let inbox = inbox.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("inference".into())
                .spawn(move || {
                    let (detector, refiner) = match loader() {
                        Ok(models) => models,
                        Err(e) => {
                            log::error!("❌ model load failed: {:#}", e);
                            return;
                        }
                    };
                    InferenceWorker::new(detector, refiner, config, events, results)
                        .run(inbox, stop);
                })?
        };

        Ok(Self {
            thread: Some(thread),
            inbox,
            state,
            stop,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stops patrol, discards pending work and waits up to `timeout` for the
    /// thread. Returns `false` if it had to be detached.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.state.set_active(false);
        self.inbox.drain();
        self.stop.store(true, Ordering::Relaxed);
        self.inbox.offer(WorkItem::Shutdown);

        let thread = match self.thread.take() {
            Some(t) => t,
            None => return true,
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                log::error!("❌ inference worker panicked");
            }
            true
        } else {
            log::warn!("⚠️  inference worker still busy after {:?}, detached", timeout);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bbox, Point2};
    use anyhow::anyhow;
    use image::Luma;

    struct Fixed(Vec<Detection>);

    impl SegmentDetector for Fixed {
        fn detect(&mut self, _: &RgbImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl SegmentDetector for Failing {
        fn detect(&mut self, _: &RgbImage) -> Result<Vec<Detection>> {
            Err(anyhow!("engine gone"))
        }
    }

    struct Ones;

    impl MaskRefiner for Ones {
        fn refine(&mut self, crop: &RgbImage) -> Result<GrayImage> {
            Ok(GrayImage::from_pixel(crop.width(), crop.height(), Luma([1])))
        }
    }

    /// Refines every crop to a single 2x2 blob, below the contour area floor.
    struct Speck;

    impl MaskRefiner for Speck {
        fn refine(&mut self, crop: &RgbImage) -> Result<GrayImage> {
            Ok(GrayImage::from_fn(crop.width(), crop.height(), |x, y| {
                Luma([(x < 2 && y < 2) as u8])
            }))
        }
    }

    struct Slow(Duration);

    impl SegmentDetector for Slow {
        fn detect(&mut self, _: &RgbImage) -> Result<Vec<Detection>> {
            thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, id: usize) -> Detection {
        let mut d = Detection::new(Bbox::new(x1, y1, x2, y2, id, 0.9), vec![0.0; 32]);
        d.segment = vec![
            Point2::new(x1, y1),
            Point2::new(x2 - 1., y1),
            Point2::new(x2 - 1., y2 - 1.),
            Point2::new(x1, y2 - 1.),
        ];
        d
    }

    fn worker<D: SegmentDetector>(
        detector: D,
        dir: &std::path::Path,
    ) -> (InferenceWorker<D, Ones>, Slot<FrameResult>) {
        let results = Slot::new();
        let w = InferenceWorker::new(
            detector,
            Ones,
            PipelineConfig::default(),
            EventStore::new(dir).unwrap(),
            results.clone(),
        );
        (w, results)
    }

    fn frame() -> Frame {
        Frame::new(
            RgbImage::from_pixel(400, 300, Rgb([90, 90, 90])),
            chrono::Local::now(),
        )
    }

    fn jpgs(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map_or(false, |x| x == "jpg"))
            .count()
    }

    #[test]
    fn test_process_refines_target() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, _) = worker(Fixed(vec![det(100., 50., 250., 200., 0)]), dir.path());
        let result = w.process(frame()).unwrap().unwrap();
        assert_eq!(result.mask.dimensions(), (400, 300));
        assert_eq!(result.mask.get_pixel(150, 100).0[0], 255);
        assert_eq!(result.mask.get_pixel(20, 20).0[0], 0);
        assert!(result.mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert_eq!(result.segments.len(), 1);
        assert_eq!(jpgs(dir.path()), 1);
    }

    #[test]
    fn test_process_skips_small_and_foreign() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, _) = worker(
            Fixed(vec![
                det(0., 0., 90., 90., 0),     // 8100 px²
                det(100., 50., 250., 200., 3), // other class
            ]),
            dir.path(),
        );
        assert!(w.process(frame()).unwrap().is_none());
        assert_eq!(jpgs(dir.path()), 0);
    }

    #[test]
    fn test_process_skips_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = det(100., 50., 250., 200., 0);
        d.segment.clear();
        let (mut w, _) = worker(Fixed(vec![d]), dir.path());
        assert!(w.process(frame()).unwrap().is_none());
    }

    #[test]
    fn test_process_tiny_mask_publishes_without_event() {
        let dir = tempfile::tempdir().unwrap();
        let results = Slot::new();
        let mut w = InferenceWorker::new(
            Fixed(vec![det(100., 50., 250., 200., 0)]),
            Speck,
            PipelineConfig::default(),
            EventStore::new(dir.path()).unwrap(),
            results,
        );
        let result = w.process(frame()).unwrap().unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.mask.get_pixel(100, 50).0[0], 255);
        assert_eq!(result.mask.pixels().filter(|p| p.0[0] == 255).count(), 4);
        assert_eq!(jpgs(dir.path()), 0);
    }

    #[test]
    fn test_run_publishes_and_survives_failures() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Slot::new();
        let stop = Arc::new(AtomicBool::new(false));

        let (mut w, results) = worker(Failing, dir.path());
        inbox.offer(WorkItem::Frame(frame()));
        let handle = {
            let inbox = inbox.clone();
            let stop = stop.clone();
            thread::spawn(move || w.run(inbox, stop))
        };
        while !inbox.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        inbox.offer(WorkItem::Shutdown);
        handle.join().unwrap();
        assert!(results.try_take().is_none());

        let (mut w, results) = worker(Fixed(vec![det(100., 50., 250., 200., 0)]), dir.path());
        inbox.offer(WorkItem::Frame(frame()));
        let handle = {
            let inbox = inbox.clone();
            thread::spawn(move || w.run(inbox, stop))
        };
        let result = results.take_timeout(Duration::from_secs(10)).unwrap();
        assert!(!result.segments.is_empty());
        inbox.offer(WorkItem::Shutdown);
        handle.join().unwrap();
    }

    #[test]
    fn test_shutdown_joins_idle_worker() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(PatrolState::new(true, 1.0));
        let handle = WorkerHandle::spawn(
            || Ok((Fixed(Vec::new()), Ones)),
            PipelineConfig::default(),
            EventStore::new(dir.path()).unwrap(),
            Slot::new(),
            Slot::new(),
            state.clone(),
        )
        .unwrap();
        assert!(handle.shutdown(Duration::from_secs(2)));
        assert!(!state.is_active());
    }

    #[test]
    fn test_shutdown_detaches_busy_worker() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Slot::new();
        let handle = WorkerHandle::spawn(
            || Ok((Slow(Duration::from_secs(2)), Ones)),
            PipelineConfig::default(),
            EventStore::new(dir.path()).unwrap(),
            inbox.clone(),
            Slot::new(),
            Arc::new(PatrolState::new(true, 1.0)),
        )
        .unwrap();

        assert!(inbox.offer(WorkItem::Frame(frame())));
        while !inbox.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        // the worker is inside detect; this one stays queued
        assert!(inbox.offer(WorkItem::Frame(frame())));

        assert!(!handle.shutdown(Duration::from_millis(50)));
        assert!(matches!(inbox.try_take(), Some(WorkItem::Shutdown)));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_load_failure_ends_worker() {
        let dir = tempfile::tempdir().unwrap();
        let handle = WorkerHandle::spawn(
            || -> Result<(Fixed, Ones)> { Err(anyhow!("missing model")) },
            PipelineConfig::default(),
            EventStore::new(dir.path()).unwrap(),
            Slot::new(),
            Slot::new(),
            Arc::new(PatrolState::default()),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_finished());
    }
}
