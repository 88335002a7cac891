//! sentryd - HomeCam Sentry daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + environment)
//! 2. Connects to the camera stream with probe-before-open reconnects
//! 3. Runs object detection on the freshest frame
//! 4. Sends annotated snapshots and half-hourly heartbeats
//! 5. Restarts the pipeline a bounded number of times before giving up

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use homecam_sentry::{
    config::DetectorSettings,
    detect::{coco_labels, load_labels},
    orchestrator::OrchestratorSettings,
    supervise, AggregatorConfig, ConsoleNotifier, DetectionAggregator, Detector, EventGate,
    FrameSource, Notifier, RestartPolicy, RetryPolicy, SentryConfig, StreamOpener,
    StreamOrchestrator, StubDetector, TcpProbe, TelegramNotifier,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a network camera and send detection alerts"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of supervised restart attempts.
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Log notifications instead of sending them.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = SentryConfig::load_from(args.config.as_deref())?;
    log::info!(
        "sentryd: camera {} at {}, snapshots in {}",
        cfg.camera_name,
        cfg.stream_url,
        cfg.snapshot_dir.display()
    );

    let notifier: Arc<dyn Notifier> = match (&cfg.telegram, args.dry_run) {
        (Some(telegram), false) => Arc::new(match &telegram.api_base {
            Some(base) => TelegramNotifier::with_api_base(
                base.as_str(),
                telegram.bot_token.as_str(),
                telegram.chat_id.as_str(),
            )?,
            None => TelegramNotifier::new(telegram.bot_token.as_str(), telegram.chat_id.as_str())?,
        }),
        (None, false) => {
            log::warn!("sentryd: BOT_TOKEN/CHAT_ID not set, notifications are logged only");
            Arc::new(ConsoleNotifier)
        }
        (_, true) => Arc::new(ConsoleNotifier),
    };

    let policy = RestartPolicy {
        max_attempts: args.max_restarts.unwrap_or(cfg.restart.max_attempts),
        delay: cfg.restart.delay,
    };
    if policy.max_attempts == 0 {
        return Err(anyhow!("--max-restarts must be greater than zero"));
    }

    supervise(&policy, |_attempt| build_orchestrator(&cfg, Arc::clone(&notifier)))
}

fn build_orchestrator(
    cfg: &SentryConfig,
    notifier: Arc<dyn Notifier>,
) -> Result<StreamOrchestrator> {
    let mut detector = build_detector(&cfg.detector)?;
    detector.warm_up()?;

    let aggregator = DetectionAggregator::new(
        detector,
        AggregatorConfig {
            confidence_threshold: cfg.detector.confidence_threshold,
            overlap_threshold: cfg.detector.overlap_threshold,
            include_labels: cfg.detector.include_labels.clone(),
        },
    );

    let retry = RetryPolicy::default();
    let source = FrameSource::spawn(
        cfg.stream_url.clone(),
        Box::new(TcpProbe::new(retry.probe_timeout)),
        Box::new(StreamOpener::default()),
        retry,
    )?;

    Ok(StreamOrchestrator::new(
        source,
        aggregator,
        EventGate::new(cfg.gate.min_interval, cfg.gate.min_distance),
        notifier,
        OrchestratorSettings {
            camera_name: cfg.camera_name.clone(),
            snapshot_dir: cfg.snapshot_dir.clone(),
        },
    ))
}

fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let labels = match &settings.labels_path {
        Some(path) => load_labels(path)?,
        None => coco_labels(),
    };

    match &settings.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(homecam_sentry::detect::TractDetector::new(
            path, labels,
        )?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow!(
            "model {} configured but sentryd was built without the backend-tract feature",
            path.display()
        )),
        None => {
            log::warn!("sentryd: no model configured, using the stub detector (no detections)");
            Ok(Box::new(StubDetector::new(labels)))
        }
    }
}
