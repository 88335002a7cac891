use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::detect::DEFAULT_INCLUDE_LABELS;

const DEFAULT_STREAM_URL: &str = "stub://front_camera";
const DEFAULT_CAMERA_NAME: &str = "camera";
const DEFAULT_SNAPSHOT_DIR: &str = "image";
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_OVERLAP: f32 = 0.3;
const DEFAULT_MIN_INTERVAL_SECS: u64 = 5;
const DEFAULT_MIN_DISTANCE: f32 = 50.0;
const DEFAULT_MAX_RESTARTS: u32 = 7;
const DEFAULT_RESTART_DELAY_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct SentryConfigFile {
    camera_name: Option<String>,
    snapshot_dir: Option<PathBuf>,
    stream: Option<StreamConfigFile>,
    telegram: Option<TelegramConfigFile>,
    detector: Option<DetectorConfigFile>,
    gate: Option<GateConfigFile>,
    restart: Option<RestartConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    include_labels: Option<Vec<String>>,
    confidence_threshold: Option<f32>,
    overlap_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    min_interval_secs: Option<u64>,
    min_distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RestartConfigFile {
    max_attempts: Option<u32>,
    delay_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub camera_name: String,
    pub snapshot_dir: PathBuf,
    pub stream_url: String,
    pub telegram: Option<TelegramSettings>,
    pub detector: DetectorSettings,
    pub gate: GateSettings,
    pub restart: RestartSettings,
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: Option<String>,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub include_labels: Vec<String>,
    pub confidence_threshold: f32,
    pub overlap_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub min_interval: Duration,
    pub min_distance: f32,
}

#[derive(Debug, Clone)]
pub struct RestartSettings {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl SentryConfig {
    /// Load from `SENTRY_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit config file (or none), then apply environment
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Self {
        let camera_name = file
            .camera_name
            .unwrap_or_else(|| DEFAULT_CAMERA_NAME.to_string());
        let snapshot_dir = file
            .snapshot_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR));
        let stream_url = file
            .stream
            .and_then(|stream| stream.url)
            .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());
        let telegram = file.telegram.and_then(|telegram| {
            match (telegram.bot_token, telegram.chat_id) {
                (Some(bot_token), Some(chat_id)) => Some(TelegramSettings {
                    bot_token,
                    chat_id,
                    api_base: telegram.api_base,
                }),
                _ => None,
            }
        });
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            include_labels: detector_file.include_labels.unwrap_or_else(|| {
                DEFAULT_INCLUDE_LABELS
                    .iter()
                    .map(|label| label.to_string())
                    .collect()
            }),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE),
            overlap_threshold: detector_file.overlap_threshold.unwrap_or(DEFAULT_OVERLAP),
        };
        let gate = GateSettings {
            min_interval: Duration::from_secs(
                file.gate
                    .as_ref()
                    .and_then(|gate| gate.min_interval_secs)
                    .unwrap_or(DEFAULT_MIN_INTERVAL_SECS),
            ),
            min_distance: file
                .gate
                .and_then(|gate| gate.min_distance)
                .unwrap_or(DEFAULT_MIN_DISTANCE),
        };
        let restart = RestartSettings {
            max_attempts: file
                .restart
                .as_ref()
                .and_then(|restart| restart.max_attempts)
                .unwrap_or(DEFAULT_MAX_RESTARTS),
            delay: Duration::from_secs(
                file.restart
                    .and_then(|restart| restart.delay_secs)
                    .unwrap_or(DEFAULT_RESTART_DELAY_SECS),
            ),
        };
        Self {
            camera_name,
            snapshot_dir,
            stream_url,
            telegram,
            detector,
            gate,
            restart,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("MJPEG_URL") {
            self.stream_url = url;
        }
        if let Some(name) = non_empty_env("CAMERA_NAME") {
            self.camera_name = name;
        }
        if let Some(dir) = non_empty_env("SENTRY_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        match (non_empty_env("BOT_TOKEN"), non_empty_env("CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => {
                let api_base = self.telegram.take().and_then(|t| t.api_base);
                self.telegram = Some(TelegramSettings {
                    bot_token,
                    chat_id,
                    api_base,
                });
            }
            (Some(bot_token), None) => match self.telegram.as_mut() {
                Some(telegram) => telegram.bot_token = bot_token,
                None => return Err(anyhow!("BOT_TOKEN is set but CHAT_ID is missing")),
            },
            (None, Some(chat_id)) => match self.telegram.as_mut() {
                Some(telegram) => telegram.chat_id = chat_id,
                None => return Err(anyhow!("CHAT_ID is set but BOT_TOKEN is missing")),
            },
            (None, None) => {}
        }
        if let Some(path) = non_empty_env("SENTRY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("SENTRY_LABELS_PATH") {
            self.detector.labels_path = Some(PathBuf::from(path));
        }
        if let Ok(labels) = std::env::var("SENTRY_INCLUDE_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.detector.include_labels = parsed;
            }
        }
        if let Ok(restarts) = std::env::var("SENTRY_MAX_RESTARTS") {
            self.restart.max_attempts = restarts
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTRY_MAX_RESTARTS must be a non-negative integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.stream_url.trim().is_empty() {
            return Err(anyhow!("stream url must not be empty"));
        }
        let url = Url::parse(&self.stream_url).map_err(|e| {
            anyhow!(
                "stream url {} must be absolute (http://, https:// or stub://): {}",
                self.stream_url,
                e
            )
        })?;
        // Reachability checks dial host:port, so the port must be known.
        let dialable = url.host_str().is_some() && url.port_or_known_default().is_some();
        if url.scheme() != "stub" && !dialable {
            return Err(anyhow!(
                "stream url {} needs a host and a port (or a scheme with a default port)",
                self.stream_url
            ));
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("overlap_threshold", self.detector.overlap_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be within 0..=1, got {value}"));
            }
        }
        if self.detector.include_labels.is_empty() {
            return Err(anyhow!("include_labels must not be empty"));
        }
        if self.gate.min_distance < 0.0 {
            return Err(anyhow!("gate min_distance must not be negative"));
        }
        if self.restart.max_attempts == 0 {
            return Err(anyhow!("restart max_attempts must be greater than zero"));
        }
        self.camera_name = self.camera_name.trim().to_string();
        if self.camera_name.is_empty() {
            self.camera_name = DEFAULT_CAMERA_NAME.to_string();
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
