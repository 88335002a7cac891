//! HomeCam Sentry
//!
//! Watches a flaky network camera, detects objects of interest in the
//! freshest frame, and sends throttled alerts plus half-hourly heartbeats.
//!
//! # Architecture
//!
//! Two activities run side by side and share only a one-slot `FrameBuffer`:
//!
//! 1. **Acquisition** (`ingest::FrameSource`, own thread): probe, open,
//!    stream, reconnect. Gives up (`Exhausted`) only after repeated open
//!    failures.
//! 2. **Processing** (`orchestrator::StreamOrchestrator`): detection,
//!    notification gating, heartbeats. Per-frame failures are logged and
//!    skipped.
//!
//! `orchestrator::supervise` restarts the whole pipeline a bounded number of
//! times before the process gives up.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the latest-frame-wins `FrameBuffer`
//! - `ingest`: probe, stream sessions (MJPEG/JPEG/stub) and `FrameSource`
//! - `detect`: `Detector` backends, NMS and `DetectionAggregator`
//! - `gate`: `EventGate` (cooldown + spatial dedup)
//! - `heartbeat`: `HeartbeatScheduler`
//! - `annotate`: snapshot boxes and JPEG encoding
//! - `notify`: `Notifier`, Telegram and console implementations
//! - `orchestrator`: the processing loop and the restart supervisor
//! - `config`: `SentryConfig` (JSON file + environment)

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod gate;
pub mod heartbeat;
pub mod ingest;
pub mod notify;
pub mod orchestrator;

pub use config::SentryConfig;
pub use detect::{
    AggregatorConfig, Detection, DetectionAggregator, DetectionSummary, Detector, StubDetector,
};
pub use frame::{Frame, FrameBuffer};
pub use gate::{EventGate, NotificationState};
pub use heartbeat::{HeartbeatScheduler, HeartbeatState};
pub use ingest::{
    CaptureError, CaptureState, ConnectionProbe, FrameSource, RetryPolicy, StreamOpener, TcpProbe,
};
pub use notify::{ConsoleNotifier, Notifier, NotifyError, TelegramNotifier};
pub use orchestrator::{supervise, RestartPolicy, RunReport, StreamOrchestrator};
