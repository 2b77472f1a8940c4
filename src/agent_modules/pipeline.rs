use chrono::Local;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::capture::{CaptureError, FrameSource};
use super::config::AgentConfig;
use super::detection::{Detection, DetectionClassifier};
use super::detector::Detector;
use super::dispatcher::{AlertCandidate, AlertDispatcher};
use super::evidence::EvidenceEncoder;
use super::throttle::AlertThrottle;

const STATS_LOG_EVERY: u64 = 100;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILENAME_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub frame_interval: Duration,
    pub capture_retry: Duration,
    /// Annotated images are also written here before dispatch when set.
    pub archive_dir: Option<PathBuf>,
}

impl From<&AgentConfig> for PipelineSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            frame_interval: config.frame_interval(),
            capture_retry: config.capture_retry(),
            archive_dir: config
                .save_detections
                .then(|| PathBuf::from(&config.detection_dir)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub frames_processed: u64,
    pub capture_failures: u64,
    pub detector_failures: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub alerts_suppressed: u64,
}

/// What happened to the qualifying detections of one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub qualifying: usize,
    pub suppressed: usize,
    pub sent: Vec<i64>,
    pub failed: usize,
}

/// Sequential detect, classify, throttle, encode, dispatch loop.
///
/// A dispatch blocks the loop until it returns, so a slow server delays the
/// next capture instead of queueing alerts.
pub struct DetectionPipeline {
    classifier: DetectionClassifier,
    throttle: Arc<AlertThrottle>,
    encoder: EvidenceEncoder,
    dispatcher: AlertDispatcher,
    settings: PipelineSettings,
    stats: RunStats,
    archive_seq: u64,
}

impl DetectionPipeline {
    pub fn new(
        classifier: DetectionClassifier,
        throttle: Arc<AlertThrottle>,
        encoder: EvidenceEncoder,
        dispatcher: AlertDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            classifier,
            throttle,
            encoder,
            dispatcher,
            settings,
            stats: RunStats::default(),
            archive_seq: 0,
        }
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Classifies `detections` for `frame` and dispatches one alert per
    /// qualifying detection that the throttle lets through.
    pub async fn process_frame(&mut self, frame: &RgbImage, detections: &[Detection]) -> FrameReport {
        let qualifying = self
            .classifier
            .classify(detections, self.settings.confidence_threshold);
        let mut report = FrameReport {
            qualifying: qualifying.len(),
            ..FrameReport::default()
        };

        for detection in qualifying {
            let now = Instant::now();
            if !self.throttle.should_fire(&detection.label, now) {
                debug!(
                    label = %detection.label,
                    remaining_secs = self.throttle.remaining(&detection.label, now).as_secs(),
                    "Alert suppressed by cooldown."
                );
                report.suppressed += 1;
                self.stats.alerts_suppressed += 1;
                continue;
            }

            let image = match self.encoder.annotate(frame, std::slice::from_ref(&detection)) {
                Ok(image) => image,
                Err(e) => {
                    error!(label = %detection.label, error = %e, "Failed to encode evidence, dropping alert.");
                    report.failed += 1;
                    self.stats.alerts_failed += 1;
                    continue;
                }
            };

            let captured_at = Local::now();
            self.archive_seq += 1;
            let filename = format!(
                "detection_{}_{}.jpg",
                captured_at.format(FILENAME_TIME_FORMAT),
                self.archive_seq
            );
            self.archive(&filename, &image).await;

            let candidate = AlertCandidate {
                label: detection.label.clone(),
                confidence: detection.confidence,
                image,
                timestamp: captured_at.format(TIMESTAMP_FORMAT).to_string(),
                filename,
            };
            match self.dispatcher.send(candidate).await {
                Ok(id) => {
                    info!(alert_id = id, label = %detection.label, confidence = detection.confidence, "Alert dispatched.");
                    report.sent.push(id);
                    self.stats.alerts_sent += 1;
                }
                Err(e) => {
                    warn!(label = %detection.label, error = %e, "Failed to dispatch alert.");
                    report.failed += 1;
                    self.stats.alerts_failed += 1;
                }
            }
        }
        report
    }

    async fn archive(&self, filename: &str, image: &[u8]) {
        let Some(dir) = &self.settings.archive_dir else {
            return;
        };
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(filename), image).await
        }
        .await;
        match result {
            Ok(()) => debug!(file = %filename, "Saved detection image."),
            Err(e) => warn!(dir = %dir.display(), file = %filename, error = %e, "Failed to save detection image."),
        }
    }

    /// Runs until `stop` turns true or the source is exhausted. Per-frame
    /// failures are logged and skipped, never returned.
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &dyn Detector,
        mut stop: watch::Receiver<bool>,
    ) -> RunStats {
        info!("Detection loop started.");
        loop {
            if *stop.borrow() {
                info!("Stop requested.");
                break;
            }

            let frame = match source.next_frame().await {
                Ok(frame) => frame,
                Err(CaptureError::Exhausted) => {
                    info!("Frame source exhausted.");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to capture frame.");
                    self.stats.capture_failures += 1;
                    if pause(self.settings.capture_retry, &mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            match detector.detect(&frame).await {
                Ok(detections) => {
                    self.process_frame(&frame, &detections).await;
                }
                Err(e) => {
                    warn!(error = %e, "Detector failed, skipping frame.");
                    self.stats.detector_failures += 1;
                }
            }

            self.stats.frames_processed += 1;
            if self.stats.frames_processed % STATS_LOG_EVERY == 0 {
                self.log_stats("Detection loop progress.");
            }

            if pause(self.settings.frame_interval, &mut stop).await {
                break;
            }
        }
        self.log_stats("Detection loop stopped.");
        self.stats
    }

    fn log_stats(&self, message: &str) {
        let s = self.stats;
        info!(
            frames = s.frames_processed,
            alerts_sent = s.alerts_sent,
            alerts_failed = s.alerts_failed,
            alerts_suppressed = s.alerts_suppressed,
            capture_failures = s.capture_failures,
            detector_failures = s.detector_failures,
            "{}",
            message
        );
    }
}

/// Sleeps for `duration` unless stopped first. Returns whether a stop was requested.
async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        changed = stop.changed() => {
            if changed.is_err() {
                // sender gone, nobody can stop us early any more
                tokio::time::sleep(duration).await;
            }
            *stop.borrow()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AlertStore, SqliteAlertStore};
    use crate::server::config::ServerConfig;
    use crate::services::alert_ingestion::AlertIngestionService;
    use crate::web::create_axum_router;
    use async_trait::async_trait;
    use image::Rgb;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    use crate::agent_modules::detector::DetectorError;

    struct ScriptedSource {
        frames: VecDeque<Result<RgbImage, CaptureError>>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<RgbImage, CaptureError>>) -> Self {
            Self { frames: frames.into() }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
            self.frames.pop_front().unwrap_or(Err(CaptureError::Exhausted))
        }
    }

    /// Returns the scripted detections in order, then nothing.
    struct ScriptedDetector {
        results: Mutex<VecDeque<Result<Vec<Detection>, DetectorError>>>,
    }

    impl ScriptedDetector {
        fn new(results: Vec<Result<Vec<Detection>, DetectorError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
            }
        }
    }

    #[async_trait]
    impl Detector for ScriptedDetector {
        async fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb([30, 30, 30]))
    }

    fn fire(confidence: f32) -> Detection {
        Detection::new("fire", confidence, [5.0, 5.0, 30.0, 30.0])
    }

    async fn alert_server() -> (SocketAddr, Arc<SqliteAlertStore>) {
        let store = Arc::new(SqliteAlertStore::in_memory().await.unwrap());
        let ingestion = Arc::new(AlertIngestionService::new(store.clone()));
        let router = create_axum_router(ingestion, Arc::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, store)
    }

    fn settings(archive_dir: Option<PathBuf>) -> PipelineSettings {
        PipelineSettings {
            confidence_threshold: 0.5,
            frame_interval: Duration::from_millis(1),
            capture_retry: Duration::from_millis(1),
            archive_dir,
        }
    }

    fn pipeline(alert_url: String, throttle: Arc<AlertThrottle>, archive_dir: Option<PathBuf>) -> DetectionPipeline {
        DetectionPipeline::new(
            DetectionClassifier::default(),
            throttle,
            EvidenceEncoder::new(85, None),
            AlertDispatcher::new(alert_url, Duration::from_secs(5)).unwrap(),
            settings(archive_dir),
        )
    }

    fn no_stop() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn repeated_fire_sends_one_alert_within_cooldown() {
        let (addr, store) = alert_server().await;
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, None);

        let mut source = ScriptedSource::new(vec![Ok(frame()), Ok(frame()), Ok(frame())]);
        let detector = ScriptedDetector::new(vec![
            Ok(vec![fire(0.9)]),
            Ok(vec![fire(0.95)]),
            Ok(vec![fire(0.8)]),
        ]);
        let (_tx, rx) = no_stop();

        let stats = pipeline.run(&mut source, &detector, rx).await;

        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.alerts_sent, 1);
        assert_eq!(stats.alerts_suppressed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        let alert = store.latest().await.unwrap().unwrap();
        assert_eq!(alert.label, "fire");
        assert!((alert.confidence - 0.9).abs() < 1e-6);
        let image = store.get_image(alert.id).await.unwrap();
        assert!(image::load_from_memory(&image.bytes).is_ok());
    }

    #[tokio::test]
    async fn irrelevant_or_weak_detections_send_nothing() {
        let (addr, store) = alert_server().await;
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, None);

        let report = pipeline
            .process_frame(
                &frame(),
                &[
                    Detection::new("person", 0.99, [0.0, 0.0, 10.0, 10.0]),
                    fire(0.3),
                ],
            )
            .await;

        assert_eq!(report, FrameReport::default());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn distinct_labels_in_one_frame_each_alert() {
        let (addr, store) = alert_server().await;
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, None);

        let report = pipeline
            .process_frame(
                &frame(),
                &[
                    fire(0.9),
                    Detection::new("smoke", 0.7, [10.0, 10.0, 40.0, 40.0]),
                    fire(0.85),
                ],
            )
            .await;

        assert_eq!(report.qualifying, 3);
        assert_eq!(report.sent, vec![1, 2]);
        assert_eq!(report.suppressed, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn capture_and_detector_failures_do_not_stop_the_loop() {
        let (addr, store) = alert_server().await;
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, None);

        let mut source = ScriptedSource::new(vec![
            Err(CaptureError::Status(503)),
            Ok(frame()),
            Ok(frame()),
        ]);
        let detector = ScriptedDetector::new(vec![
            Err(DetectorError::Status(500)),
            Ok(vec![fire(0.9)]),
        ]);
        let (_tx, rx) = no_stop();

        let stats = pipeline.run(&mut source, &detector, rx).await;

        assert_eq!(stats.capture_failures, 1);
        assert_eq!(stats.detector_failures, 1);
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.alerts_sent, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_counts_failure_and_continues() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, None);
        let mut source = ScriptedSource::new(vec![Ok(frame()), Ok(frame())]);
        let detector = ScriptedDetector::new(vec![
            Ok(vec![fire(0.9)]),
            Ok(vec![Detection::new("smoke", 0.9, [1.0, 1.0, 9.0, 9.0])]),
        ]);
        let (_tx, rx) = no_stop();

        let stats = pipeline.run(&mut source, &detector, rx).await;

        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.alerts_failed, 2);
        assert_eq!(stats.alerts_sent, 0);
    }

    #[tokio::test]
    async fn archive_keeps_a_copy_of_each_dispatched_image() {
        let (addr, _store) = alert_server().await;
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("detections");
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline(format!("http://{addr}/alert"), throttle, Some(archive.clone()));

        let report = pipeline.process_frame(&frame(), &[fire(0.9)]).await;
        assert_eq!(report.sent.len(), 1);

        let names: Vec<String> = std::fs::read_dir(&archive)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("detection_"));
        assert!(names[0].ends_with("_1.jpg"));
    }

    #[tokio::test]
    async fn shared_throttle_spans_pipelines() {
        let (addr, store) = alert_server().await;
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut first = pipeline(format!("http://{addr}/alert"), throttle.clone(), None);
        let mut second = pipeline(format!("http://{addr}/alert"), throttle, None);

        assert_eq!(first.process_frame(&frame(), &[fire(0.9)]).await.sent.len(), 1);
        assert_eq!(second.process_frame(&frame(), &[fire(0.9)]).await.suppressed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_loop() {
        let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(30)));
        let mut pipeline = pipeline("http://127.0.0.1:9/alert".to_string(), throttle, None);
        let mut source = ScriptedSource::new(vec![Ok(frame())]);
        let detector = ScriptedDetector::new(Vec::new());
        let (tx, rx) = no_stop();
        tx.send(true).unwrap();

        let stats = pipeline.run(&mut source, &detector, rx).await;
        assert_eq!(stats, RunStats::default());
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_pause() {
        let (tx, mut rx) = no_stop();
        let waiter = tokio::spawn(async move { pause(Duration::from_secs(60), &mut rx).await });
        tx.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }

    #[test]
    fn settings_follow_agent_config() {
        let config = crate::agent_modules::config::parse_config(
            "alert_url = \"http://localhost:5000/alert\"\nsave_detections = false",
        )
        .unwrap();
        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.confidence_threshold, 0.5);
        assert_eq!(settings.frame_interval, Duration::from_millis(100));
        assert!(settings.archive_dir.is_none());
    }
}
