//! Per-frame processing loop and the supervised restart loop around it.
//!
//! Responsibilities:
//! - pull the freshest frame from the `FrameSource`
//! - run detection and ask the `EventGate` whether to notify
//! - persist an annotated snapshot and send it with a caption
//! - send the half-hourly heartbeat
//! - contain every per-frame failure so monitoring never stops on a bad frame
//!
//! The loop ends only when the source is exhausted or released. `supervise`
//! then builds a fresh orchestrator after a delay, a bounded number of times.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};

use crate::annotate;
use crate::detect::{DetectionAggregator, DetectionSummary};
use crate::frame::Frame;
use crate::gate::EventGate;
use crate::heartbeat::HeartbeatScheduler;
use crate::ingest::FrameSource;
use crate::notify::Notifier;

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub camera_name: String,
    pub snapshot_dir: PathBuf,
}

/// Counters for one orchestrator run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub frames_processed: u64,
    pub notifications_sent: u64,
    pub heartbeats_sent: u64,
    pub frame_errors: u64,
}

/// What happened to a single frame.
#[derive(Clone, Debug)]
pub struct FrameOutcome {
    pub summary: DetectionSummary,
    /// The gate let this frame through (delivery may still have failed).
    pub notified: bool,
    pub snapshot: Option<PathBuf>,
    pub heartbeat: bool,
}

pub struct StreamOrchestrator {
    source: FrameSource,
    aggregator: DetectionAggregator,
    gate: EventGate,
    heartbeat: HeartbeatScheduler,
    notifier: Arc<dyn Notifier>,
    settings: OrchestratorSettings,
    report: RunReport,
}

impl StreamOrchestrator {
    pub fn new(
        source: FrameSource,
        aggregator: DetectionAggregator,
        gate: EventGate,
        notifier: Arc<dyn Notifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source,
            aggregator,
            gate,
            heartbeat: HeartbeatScheduler::new(),
            notifier,
            settings,
            report: RunReport::default(),
        }
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Process frames until the source gives up, then release it and send the
    /// closing status message.
    pub fn run(mut self) -> RunReport {
        log::info!(
            "StreamOrchestrator: monitoring {} ({}) with {} detector",
            self.settings.camera_name,
            self.source.stats().url,
            self.aggregator.detector_name()
        );
        // `read` keeps returning frames while the source is live and yields
        // `None` once it is exhausted and the last frame has been taken.
        while let Some(frame) = self.source.read() {
            if let Err(e) = self.process_frame(&frame, Local::now()) {
                self.report.frame_errors += 1;
                log::error!(
                    "StreamOrchestrator: frame {} failed: {:#}",
                    frame.sequence(),
                    e
                );
            }
        }

        let stats = self.source.stats();
        self.source.release();
        log::warn!(
            "StreamOrchestrator: {} closed after {} frames ({} published, {} reconnects)",
            self.settings.camera_name,
            self.report.frames_processed,
            stats.frames_published,
            stats.reconnects
        );
        let closed = format!(
            "[INFO] heart beat msg, camera {} status : CAMERA CLOSED",
            self.settings.camera_name
        );
        if let Err(e) = self.notifier.send_message(&closed) {
            log::error!("StreamOrchestrator: closing message failed: {}", e);
        }
        self.report
    }

    /// Detection, notification and heartbeat for one frame at time `now`.
    ///
    /// Notifier and snapshot-file failures are logged and do not fail the
    /// frame. Detection failures do. A snapshot that cannot be rendered fails
    /// the frame only after the heartbeat has been evaluated.
    pub fn process_frame(&mut self, frame: &Frame, now: DateTime<Local>) -> Result<FrameOutcome> {
        self.report.frames_processed += 1;
        let summary = self.aggregator.analyze(frame).context("detection")?;

        let notified = self.gate.should_notify(&summary, &now);
        let mut snapshot = None;
        let mut alert_error = None;
        if notified {
            match self.send_alert(frame, &summary, &now) {
                Ok(path) => snapshot = path,
                Err(e) => alert_error = Some(e),
            }
        }

        let heartbeat = self.heartbeat.is_due(&now);
        if heartbeat {
            let message = format!(
                "[INFO] heart beat msg, camera {} status : {}",
                self.settings.camera_name,
                self.source.is_opened()
            );
            match self.notifier.send_message(&message) {
                Ok(()) => self.report.heartbeats_sent += 1,
                Err(e) => log::error!("StreamOrchestrator: heartbeat failed: {}", e),
            }
        }

        if let Some(e) = alert_error {
            return Err(e);
        }
        Ok(FrameOutcome {
            summary,
            notified,
            snapshot,
            heartbeat,
        })
    }

    /// Render, persist and send the alert photo. Returns the snapshot path
    /// when the file could be written.
    fn send_alert(
        &mut self,
        frame: &Frame,
        summary: &DetectionSummary,
        now: &DateTime<Local>,
    ) -> Result<Option<PathBuf>> {
        let jpeg = annotate::render_snapshot(frame, &summary.detections)?;
        let snapshot = match self.write_snapshot(&jpeg, now) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("StreamOrchestrator: snapshot not saved: {:#}", e);
                None
            }
        };

        let caption = caption(summary, now);
        log::info!("StreamOrchestrator: {}", caption);
        match self.notifier.send_photo(&jpeg, &caption) {
            Ok(()) => self.report.notifications_sent += 1,
            Err(e) => log::error!("StreamOrchestrator: photo notification failed: {}", e),
        }
        Ok(snapshot)
    }

    fn write_snapshot(&self, jpeg: &[u8], now: &DateTime<Local>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.settings.snapshot_dir).with_context(|| {
            format!(
                "create snapshot dir {}",
                self.settings.snapshot_dir.display()
            )
        })?;
        let path = self
            .settings
            .snapshot_dir
            .join(format!("photo_{}.jpg", now.format("%H%M%S")));
        std::fs::write(&path, jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

/// `Detected 2 person, 1 knife, in image at 10:30:05`
pub fn caption(summary: &DetectionSummary, now: &DateTime<Local>) -> String {
    format!(
        "Detected {} in image at {}",
        summary.describe(),
        now.format("%H:%M:%S")
    )
}

// ----------------------------------------------------------------------------
// Supervised restart loop
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            delay: Duration::from_secs(5),
        }
    }
}

/// Run orchestrators built by `factory` back to back, `policy.delay` apart,
/// until `policy.max_attempts` runs have ended. Always returns an error: a
/// monitor that stopped is a failure.
pub fn supervise<F>(policy: &RestartPolicy, mut factory: F) -> Result<()>
where
    F: FnMut(u32) -> Result<StreamOrchestrator>,
{
    for attempt in 1..=policy.max_attempts {
        log::info!(
            "Supervisor: starting stream monitor (attempt {} of {})",
            attempt,
            policy.max_attempts
        );
        match factory(attempt) {
            Ok(orchestrator) => {
                let report = orchestrator.run();
                log::warn!(
                    "Supervisor: attempt {} ended: {} frames, {} notifications, {} heartbeats, {} errors",
                    attempt,
                    report.frames_processed,
                    report.notifications_sent,
                    report.heartbeats_sent,
                    report.frame_errors
                );
            }
            Err(e) => log::error!("Supervisor: attempt {} failed to start: {:#}", attempt, e),
        }
        if attempt < policy.max_attempts {
            thread::sleep(policy.delay);
        }
    }
    Err(anyhow!(
        "stream monitor stopped after {} attempts",
        policy.max_attempts
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{AggregatorConfig, RawCandidate, StubDetector};
    use crate::ingest::{
        CaptureError, ConnectionProbe, RetryPolicy, SessionOpener, StreamSession,
    };
    use crate::notify::NotifyError;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Reachable;

    impl ConnectionProbe for Reachable {
        fn probe(&self, _url: &str) -> bool {
            true
        }
    }

    struct NeverOpens;

    impl SessionOpener for NeverOpens {
        fn open(&mut self, url: &str) -> Result<Box<dyn StreamSession>, CaptureError> {
            Err(CaptureError::open(url, "refused"))
        }
    }

    #[derive(Default)]
    struct Recorder {
        photos: Mutex<Vec<String>>,
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Notifier for Recorder {
        fn send_photo(&self, _jpeg: &[u8], caption: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Transport("offline".into()));
            }
            self.photos.lock().unwrap().push(caption.to_string());
            Ok(())
        }

        fn send_message(&self, text: &str) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Transport("offline".into()));
            }
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Two frames with a pause between them, then a broken connection.
    struct PacedSession {
        sent: u32,
    }

    impl StreamSession for PacedSession {
        fn read_frame(&mut self) -> Result<Frame, CaptureError> {
            match self.sent {
                0 => {}
                1 => thread::sleep(Duration::from_millis(300)),
                _ => return Err(CaptureError::read("connection reset by peer")),
            }
            self.sent += 1;
            Ok(frame())
        }

        fn describe(&self) -> String {
            "paced test session".to_string()
        }
    }

    /// The first open succeeds, every later one is refused.
    #[derive(Default)]
    struct OpensOnce {
        opened: bool,
    }

    impl SessionOpener for OpensOnce {
        fn open(&mut self, url: &str) -> Result<Box<dyn StreamSession>, CaptureError> {
            if self.opened {
                return Err(CaptureError::open(url, "refused"));
            }
            self.opened = true;
            Ok(Box::new(PacedSession { sent: 0 }))
        }
    }

    fn person_at_center() -> Vec<RawCandidate> {
        vec![RawCandidate {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.25,
            height: 0.5,
            class_scores: vec![0.9],
        }]
    }

    fn orchestrator(
        detector: StubDetector,
        notifier: Arc<Recorder>,
        snapshot_dir: PathBuf,
    ) -> StreamOrchestrator {
        orchestrator_with(Box::new(NeverOpens), detector, notifier, snapshot_dir)
    }

    fn orchestrator_with(
        opener: Box<dyn SessionOpener>,
        detector: StubDetector,
        notifier: Arc<Recorder>,
        snapshot_dir: PathBuf,
    ) -> StreamOrchestrator {
        let source = FrameSource::spawn(
            "http://camera.invalid/stream",
            Box::new(Reachable),
            opener,
            RetryPolicy::immediate(),
        )
        .unwrap();
        StreamOrchestrator::new(
            source,
            DetectionAggregator::new(
                Box::new(detector),
                AggregatorConfig {
                    include_labels: vec!["person".into()],
                    ..AggregatorConfig::default()
                },
            ),
            EventGate::default(),
            notifier,
            OrchestratorSettings {
                camera_name: "porch".into(),
                snapshot_dir,
            },
        )
    }

    fn frame() -> Frame {
        Frame::from_rgb8(vec![60; 80 * 40 * 3], 80, 40).unwrap()
    }

    fn at(minute: u32, second: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn detection_sends_captioned_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder::default());
        let mut orchestrator = orchestrator(detector, notifier.clone(), dir.path().join("image"));

        let outcome = orchestrator.process_frame(&frame(), at(12, 5)).unwrap();

        assert!(outcome.notified);
        assert!(!outcome.heartbeat);
        let snapshot = outcome.snapshot.unwrap();
        assert_eq!(snapshot, dir.path().join("image").join("photo_101205.jpg"));
        assert!(snapshot.exists());
        assert_eq!(
            notifier.photos.lock().unwrap().as_slice(),
            ["Detected 1 person, in image at 10:12:05"]
        );
        assert_eq!(orchestrator.report().notifications_sent, 1);
    }

    #[test]
    fn static_object_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_output(person_at_center());
        detector.push_output(person_at_center());
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder::default());
        let mut orchestrator = orchestrator(detector, notifier.clone(), dir.path().to_path_buf());

        assert!(orchestrator.process_frame(&frame(), at(12, 0)).unwrap().notified);
        assert!(!orchestrator.process_frame(&frame(), at(12, 2)).unwrap().notified);
        assert!(!orchestrator.process_frame(&frame(), at(12, 10)).unwrap().notified);
        assert_eq!(notifier.photos.lock().unwrap().len(), 1);
    }

    #[test]
    fn heartbeat_reports_source_status() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(Recorder::default());
        let mut orchestrator = orchestrator(
            StubDetector::new(vec!["person".into()]),
            notifier.clone(),
            dir.path().to_path_buf(),
        );

        assert!(orchestrator.process_frame(&frame(), at(30, 0)).unwrap().heartbeat);
        assert!(!orchestrator.process_frame(&frame(), at(30, 20)).unwrap().heartbeat);
        assert_eq!(
            notifier.messages.lock().unwrap().as_slice(),
            ["[INFO] heart beat msg, camera porch status : false"]
        );
        assert_eq!(orchestrator.report().heartbeats_sent, 1);
    }

    #[test]
    fn notifier_failures_do_not_fail_the_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let mut orchestrator = orchestrator(detector, notifier, dir.path().to_path_buf());

        let outcome = orchestrator.process_frame(&frame(), at(0, 0)).unwrap();
        assert!(outcome.notified);
        assert!(outcome.heartbeat);
        assert_eq!(orchestrator.report(), &RunReport {
            frames_processed: 1,
            ..RunReport::default()
        });
    }

    #[test]
    fn detector_failure_fails_only_that_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_failure("bad tensor");
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder::default());
        let mut orchestrator = orchestrator(detector, notifier.clone(), dir.path().to_path_buf());

        assert!(orchestrator.process_frame(&frame(), at(5, 0)).is_err());
        assert!(orchestrator.process_frame(&frame(), at(5, 1)).unwrap().notified);
    }

    #[test]
    fn snapshot_write_failure_still_sends_photo_and_heartbeat() {
        // A regular file where the snapshot directory should be.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder::default());
        let mut orchestrator =
            orchestrator(detector, notifier.clone(), blocker.path().to_path_buf());

        let outcome = orchestrator.process_frame(&frame(), at(0, 0)).unwrap();

        assert!(outcome.notified);
        assert!(outcome.snapshot.is_none());
        assert!(outcome.heartbeat);
        assert_eq!(
            notifier.photos.lock().unwrap().as_slice(),
            ["Detected 1 person, in image at 10:00:00"]
        );
        assert_eq!(notifier.messages.lock().unwrap().len(), 1);
        assert_eq!(orchestrator.report(), &RunReport {
            frames_processed: 1,
            notifications_sent: 1,
            heartbeats_sent: 1,
            frame_errors: 0,
        });
    }

    #[test]
    fn run_survives_a_failed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = StubDetector::new(vec!["person".into()]);
        detector.push_failure("bad tensor");
        detector.push_output(person_at_center());
        let notifier = Arc::new(Recorder::default());
        let orchestrator = orchestrator_with(
            Box::new(OpensOnce::default()),
            detector,
            notifier.clone(),
            dir.path().to_path_buf(),
        );

        let report = orchestrator.run();

        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.frame_errors, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(notifier.photos.lock().unwrap().len(), 1);
        assert_eq!(
            notifier.messages.lock().unwrap().last().map(String::as_str),
            Some("[INFO] heart beat msg, camera porch status : CAMERA CLOSED")
        );
    }

    #[test]
    fn dead_source_ends_run_with_closed_message() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(Recorder::default());
        let orchestrator = orchestrator(
            StubDetector::new(vec!["person".into()]),
            notifier.clone(),
            dir.path().to_path_buf(),
        );

        let report = orchestrator.run();

        assert_eq!(report.frames_processed, 0);
        assert_eq!(
            notifier.messages.lock().unwrap().last().map(String::as_str),
            Some("[INFO] heart beat msg, camera porch status : CAMERA CLOSED")
        );
    }

    #[test]
    fn supervisor_gives_up_after_max_attempts() {
        let policy = RestartPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        };
        let mut attempts = Vec::new();
        let result = supervise(&policy, |attempt| {
            attempts.push(attempt);
            Err(anyhow!("camera unplugged"))
        });

        assert!(result.is_err());
        assert_eq!(attempts, vec![1, 2, 3]);
    }
}
