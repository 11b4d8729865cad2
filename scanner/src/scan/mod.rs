pub mod report;
pub mod sources;

use chrono::Utc;
use dumpwatch_common::config::Config;
use dumpwatch_common::detection::DetectionReport;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::change::{ChangeDetector, DetectionResult, EvalError, LoadError};
use crate::ingest::Ingest;
use crate::storage::{DetectionStore, StorageError};

use report::ScanCycleReport;
use sources::CameraSource;

/// Where the scanner is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning(String),
    Sleeping,
    Stopped,
}

/// Returned by [`Scanner::run_forever`] on a clean shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles that ran to completion.
    pub cycles: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("camera root {0} does not exist or is not a directory")]
    RootMissing(String),
    #[error("failed to read camera root {0}: {1}")]
    ReadRoot(String, std::io::Error),
    #[error("no camera directories found in {0}")]
    NoCameras(String),
}

/// Periodic multi-camera scan: background load, frame evaluation, local
/// persistence of detections and submission to the ingestion API.
pub struct Scanner<I> {
    detector: Arc<ChangeDetector>,
    ingest: I,
    store: DetectionStore,
    config: Config,
    state: ScanState,
}

impl<I: Ingest> Scanner<I> {
    pub fn new(
        config: Config,
        detector: Arc<ChangeDetector>,
        ingest: I,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            detector,
            ingest,
            store: DetectionStore::new(&config.scan.annotated_format)?,
            config,
            state: ScanState::Idle,
        })
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.scan.interval_secs)
    }

    /// Run scan cycles until `shutdown` turns true.
    ///
    /// A cycle that has started always runs over every camera. Cancellation
    /// is checked between cycles: before the sleep, while sleeping and once
    /// the sleep ends, so at least one full cycle always runs. Only a failure
    /// to enumerate cameras ends the loop with an error; everything that goes
    /// wrong inside a camera is absorbed by [`Scanner::process_camera`].
    pub async fn run_forever(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, ScanError> {
        let mut cycles: u64 = 0;

        loop {
            let cameras = sources::discover_cameras(&self.config.scan.root)?;

            info!(cycle = cycles + 1, cameras = cameras.len(), "starting detection cycle");
            let mut report = ScanCycleReport::new(cycles + 1);

            for camera in &cameras {
                self.state = ScanState::Scanning(camera.id.clone());
                let detections = self
                    .process_camera(camera, self.config.scan.background_index)
                    .await;
                report.record(&camera.id, detections);
            }

            cycles += 1;
            report.log();

            if *shutdown.borrow() {
                return Ok(self.stop(cycles));
            }

            self.state = ScanState::Sleeping;
            info!(secs = self.config.scan.interval_secs, "waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    return Ok(self.stop(cycles));
                }
            }

            if *shutdown.borrow() {
                return Ok(self.stop(cycles));
            }
        }
    }

    fn stop(&mut self, cycles: u64) -> RunSummary {
        if let ScanState::Scanning(camera) = &self.state {
            debug!(last_camera = camera.as_str(), "shutdown seen at end of cycle");
        }
        self.state = ScanState::Stopped;
        info!(cycles, "scanner stopped");
        RunSummary { cycles }
    }

    /// Evaluate every frame of `camera` against the frame at
    /// `background_index` and report the ones showing dumping.
    ///
    /// Returns the number of detections the ingestion API accepted. Never
    /// fails: a missing or unreadable background yields 0, a bad frame is
    /// skipped, a failed write or submission is not counted.
    pub async fn process_camera(&self, camera: &CameraSource, background_index: usize) -> usize {
        let frames = &camera.frames;
        if frames.is_empty() {
            warn!(camera = camera.id, dir = %camera.dir.display(), "no images found for camera");
            return 0;
        }

        let Some(background) = frames.get(background_index) else {
            warn!(
                camera = camera.id,
                background_index,
                frames = frames.len(),
                "background index out of range"
            );
            return 0;
        };

        if let Err(e) = self.load_background(&camera.id, background).await {
            error!(camera = camera.id, error = %e, "failed to load background, skipping camera");
            return 0;
        }

        let mut submitted = 0;
        for (index, path) in frames.iter().enumerate() {
            if index == background_index {
                continue;
            }

            debug!(
                camera = camera.id,
                frame = index + 1,
                total = frames.len(),
                path = %path.display(),
                "processing frame"
            );

            let result = match self.evaluate(&camera.id, path).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(camera = camera.id, path = %path.display(), error = %e, "skipping frame");
                    continue;
                }
            };

            if !result.has_waste {
                continue;
            }

            info!(
                camera = camera.id,
                frame = index,
                area = result.changed_area,
                regions = result.regions,
                "possible illegal dumping detected"
            );

            if self.report_detection(camera, index, &result).await {
                submitted += 1;
            }
        }

        submitted
    }

    async fn load_background(&self, camera_id: &str, path: &Path) -> Result<(), LoadError> {
        let detector = Arc::clone(&self.detector);
        let camera_id = camera_id.to_string();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || detector.load_background(&camera_id, &path))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))?
    }

    async fn evaluate(&self, camera_id: &str, path: &Path) -> Result<DetectionResult, EvalError> {
        let detector = Arc::clone(&self.detector);
        let camera_id = camera_id.to_string();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || detector.evaluate(&camera_id, &path))
            .await
            .map_err(|e| EvalError::Worker(e.to_string()))?
    }

    /// Persist the annotated frame, then hand it to the ingestion API.
    async fn report_detection(
        &self,
        camera: &CameraSource,
        index: usize,
        result: &DetectionResult,
    ) -> bool {
        let saved = match self.store.save(&camera.dir, index, &result.annotated).await {
            Ok(s) => s,
            Err(e) => {
                error!(
                    camera = camera.id,
                    frame = index,
                    error = %e,
                    "failed to store annotated frame"
                );
                return false;
            }
        };
        let saved_path = saved.path.display().to_string();

        let report = DetectionReport {
            camera_id: camera.id.clone(),
            captured_at: Utc::now(),
            coordinates: self.config.coordinates_for(&camera.id),
            detection_area: result.changed_area,
            waste_type: self.config.ingest.waste_type.clone(),
            image_name: saved.file_name,
            image: saved.bytes,
        };

        match self.ingest.submit(&report).await {
            Ok(receipt) => {
                info!(
                    camera = camera.id,
                    id = receipt.id,
                    timestamp = report.timestamp(),
                    coordinates = %report.coordinates,
                    area = report.detection_area,
                    image = saved_path,
                    "detection submitted"
                );
                true
            }
            Err(e) => {
                error!(
                    camera = camera.id,
                    image = saved_path,
                    error = %e,
                    "failed to submit detection"
                );
                false
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender can never request
/// it, so that case waits forever.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestError, IngestReceipt};
    use dumpwatch_common::detection::Coordinates;
    use image::{GrayImage, Luma};
    use std::fs;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockIngest {
        reports: Arc<Mutex<Vec<DetectionReport>>>,
        fail: bool,
        /// Raised on the first submission, to cancel while a camera is busy.
        cancel: Option<Arc<watch::Sender<bool>>>,
    }

    impl MockIngest {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl Ingest for MockIngest {
        async fn submit(&self, report: &DetectionReport) -> Result<IngestReceipt, IngestError> {
            if let Some(cancel) = &self.cancel {
                cancel.send_replace(true);
            }
            let mut reports = self.reports.lock().unwrap();
            reports.push(report.clone());
            if self.fail {
                return Err(IngestError::Status(503, "unavailable".into()));
            }
            Ok(IngestReceipt {
                id: format!("det-{}", reports.len()),
            })
        }
    }

    fn background() -> GrayImage {
        GrayImage::from_pixel(100, 100, Luma([50]))
    }

    fn with_block() -> GrayImage {
        let mut img = background();
        for y in 30..70 {
            for x in 30..70 {
                img.put_pixel(x, y, Luma([250]));
            }
        }
        img
    }

    fn config(root: &Path) -> Config {
        Config::from_toml(&format!(
            "[scan]\nroot = {:?}\ninterval_secs = 3600\nannotated_format = \"png\"\n\
             [cameras.cam_geo]\nlatitude = 10.5\nlongitude = 20.25\n",
            root.display().to_string()
        ))
        .unwrap()
    }

    fn scanner(root: &Path, ingest: MockIngest) -> Scanner<MockIngest> {
        let config = config(root);
        let detector = Arc::new(ChangeDetector::new(config.detector.clone()));
        Scanner::new(config, detector, ingest).unwrap()
    }

    /// Camera dir with `000.png` as background followed by `frames`, each
    /// either a block frame (`true`) or an unchanged one (`false`).
    fn camera_dir(root: &Path, id: &str, frames: &[bool]) -> CameraSource {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        background().save(dir.join("000.png")).unwrap();
        for (i, changed) in frames.iter().enumerate() {
            let img = if *changed { with_block() } else { background() };
            img.save(dir.join(format!("{:03}.png", i + 1))).unwrap();
        }
        CameraSource::new(id, &dir, sources::list_frames(&dir).unwrap())
    }

    #[tokio::test]
    async fn empty_sequence_returns_zero_without_loading() {
        let root = tempfile::tempdir().unwrap();
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        let camera = CameraSource::new("empty", root.path(), vec![]);
        assert_eq!(scanner.process_camera(&camera, 0).await, 0);
        assert!(!scanner.detector.has_background("empty"));
        assert_eq!(ingest.count(), 0);
    }

    #[tokio::test]
    async fn every_changed_frame_is_saved_and_submitted() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_a", &[true, false, true]);
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 0).await, 2);
        assert!(camera.dir.join("detection_1.png").exists());
        assert!(!camera.dir.join("detection_2.png").exists());
        assert!(camera.dir.join("detection_3.png").exists());

        let reports = ingest.reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].camera_id, "cam_a");
        assert_eq!(reports[0].image_name, "detection_1.png");
        assert_eq!(reports[0].waste_type, "unknown");
        assert_eq!(reports[0].coordinates.latitude, -8.0476);
        assert!(reports[0].detection_area > 1000.0);
        assert!(!reports[0].image.is_empty());
    }

    #[tokio::test]
    async fn corrupt_frame_does_not_stop_the_camera() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_a", &[true, true, true, true, true]);
        fs::write(camera.dir.join("003.png"), b"truncated").unwrap();
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 0).await, 4);
        assert_eq!(ingest.count(), 4);
        assert!(!camera.dir.join("detection_3.png").exists());
        assert!(camera.dir.join("detection_5.png").exists());
    }

    #[tokio::test]
    async fn bad_background_skips_camera() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_a", &[true, true]);
        fs::write(camera.dir.join("000.png"), b"not a png").unwrap();
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 0).await, 0);
        assert_eq!(ingest.count(), 0);
    }

    #[tokio::test]
    async fn out_of_range_background_index_skips_camera() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_a", &[true]);
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 7).await, 0);
        assert!(!scanner.detector.has_background("cam_a"));
    }

    #[tokio::test]
    async fn background_index_selects_reference_frame() {
        let root = tempfile::tempdir().unwrap();
        // 001 is the block frame; using it as background makes 000 and 002 differ.
        let camera = camera_dir(root.path(), "cam_a", &[true, false]);
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 1).await, 2);
        assert!(camera.dir.join("detection_0.png").exists());
        assert!(camera.dir.join("detection_2.png").exists());
        assert!(!camera.dir.join("detection_1.png").exists());
    }

    #[tokio::test]
    async fn failed_submission_is_not_counted() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_a", &[true, true]);
        let ingest = MockIngest::failing();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 0).await, 0);
        // both frames were still attempted
        assert_eq!(ingest.count(), 2);
        assert!(camera.dir.join("detection_2.png").exists());
    }

    #[tokio::test]
    async fn camera_coordinates_override_default() {
        let root = tempfile::tempdir().unwrap();
        let camera = camera_dir(root.path(), "cam_geo", &[true]);
        let ingest = MockIngest::default();
        let scanner = scanner(root.path(), ingest.clone());

        assert_eq!(scanner.process_camera(&camera, 0).await, 1);
        let reports = ingest.reports.lock().unwrap();
        assert_eq!(
            reports[0].coordinates,
            Coordinates {
                latitude: 10.5,
                longitude: 20.25
            }
        );
    }

    #[tokio::test]
    async fn missing_root_stops_the_loop() {
        let root = tempfile::tempdir().unwrap();
        let mut scanner = scanner(&root.path().join("gone"), MockIngest::default());
        let (_tx, rx) = watch::channel(false);

        let err = scanner.run_forever(rx).await.unwrap_err();
        assert!(matches!(err, ScanError::RootMissing(_)));
        // Stopped is only reached through cancellation.
        assert_eq!(scanner.state(), &ScanState::Idle);
    }

    #[tokio::test]
    async fn shutdown_before_start_still_runs_one_full_cycle() {
        let root = tempfile::tempdir().unwrap();
        camera_dir(root.path(), "cam_a", &[true]);
        camera_dir(root.path(), "cam_b", &[true]);
        let ingest = MockIngest::default();
        let mut scanner = scanner(root.path(), ingest.clone());
        let (_tx, rx) = watch::channel(true);

        let summary = scanner.run_forever(rx).await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(scanner.state(), &ScanState::Stopped);
        assert!(scanner.detector.has_background("cam_a"));
        assert!(scanner.detector.has_background("cam_b"));
        assert_eq!(ingest.count(), 2);
    }

    #[tokio::test]
    async fn shutdown_while_scanning_finishes_the_cycle() {
        let root = tempfile::tempdir().unwrap();
        camera_dir(root.path(), "cam_a", &[true, true]);
        camera_dir(root.path(), "cam_b", &[true]);
        let (tx, rx) = watch::channel(false);
        let ingest = MockIngest {
            cancel: Some(Arc::new(tx)),
            ..MockIngest::default()
        };
        let mut scanner = scanner(root.path(), ingest.clone());

        let summary = tokio::time::timeout(Duration::from_secs(30), scanner.run_forever(rx))
            .await
            .expect("scanner did not stop")
            .unwrap();

        assert_eq!(summary.cycles, 1);
        assert_eq!(scanner.state(), &ScanState::Stopped);
        let reports = ingest.reports.lock().unwrap();
        let cameras: Vec<&str> = reports.iter().map(|r| r.camera_id.as_str()).collect();
        assert_eq!(cameras, vec!["cam_a", "cam_a", "cam_b"]);
    }

    #[tokio::test]
    async fn shutdown_during_first_sleep_runs_exactly_one_cycle() {
        let root = tempfile::tempdir().unwrap();
        camera_dir(root.path(), "cam_a", &[true, false]);
        camera_dir(root.path(), "cam_b", &[true]);
        let ingest = MockIngest::default();
        let mut scanner = scanner(root.path(), ingest.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let result = scanner.run_forever(rx).await;
            (result, scanner.state().clone())
        });

        let probe = ingest.clone();
        tokio::time::timeout(Duration::from_secs(30), async move {
            while probe.count() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first cycle never submitted");

        tx.send(true).unwrap();
        let (result, state) = tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("scanner did not stop")
            .unwrap();

        assert_eq!(result.unwrap(), RunSummary { cycles: 1 });
        assert_eq!(state, ScanState::Stopped);
        assert_eq!(ingest.count(), 2);
    }
}
