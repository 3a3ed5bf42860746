use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::arbiter::ArbitrationPolicy;
use crate::gate::GateSettings;

const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_FRAME_DELAY_MS: u64 = 20;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_MATCH_RADIUS_PX: f32 = 50.0;
const DEFAULT_EVICT_AFTER_SECS: u64 = 60;
const DEFAULT_LOCK_AFTER_SECS: u64 = 30;
const DEFAULT_ENROLLMENT_SAMPLES: usize = 100;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 100.0;
const DEFAULT_MODEL_PATH: &str = "face_model.json";
const DEFAULT_LABEL_MAP_PATH: &str = "label_map.json";
const DEFAULT_DATASET_DIR: &str = "dataset";
const DEFAULT_DB_PATH: &str = "sentry.db";
const DEFAULT_SERVO_PORT: &str = "/dev/ttyACM0";
const DEFAULT_SERVO_BAUDRATE: u32 = 57600;
const DEFAULT_PAN_PIN: u8 = 9;
const DEFAULT_TILT_PIN: u8 = 10;
const DEFAULT_STEP_INTERVAL_MS: u64 = 20;
const DEFAULT_STEP_DEGREES: f32 = 2.0;
const DEFAULT_RESET_DELAY_MS: u64 = 2000;

#[derive(Debug, Deserialize, Default)]
struct SentryConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracking: Option<TrackingConfigFile>,
    gate: Option<GateConfigFile>,
    recognizer: Option<RecognizerConfigFile>,
    records: Option<RecordsConfigFile>,
    servo: Option<ServoConfigFile>,
    arbiter: Option<ArbiterConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    frame_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    match_radius_px: Option<f32>,
    evict_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    lock_after_secs: Option<u64>,
    enrollment_samples: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RecognizerConfigFile {
    confidence_threshold: Option<f32>,
    model_path: Option<PathBuf>,
    label_map_path: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordsConfigFile {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServoConfigFile {
    enabled: Option<bool>,
    port: Option<String>,
    baudrate: Option<u32>,
    pan_pin: Option<u8>,
    tilt_pin: Option<u8>,
    step_interval_ms: Option<u64>,
    step_degrees: Option<f32>,
    reset_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ArbiterConfigFile {
    policy: Option<ArbitrationPolicy>,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub tracking: TrackingSettings,
    pub gate: GateSettings,
    pub recognizer: RecognizerSettings,
    pub db_path: String,
    pub servo: ServoSettings,
    pub arbiter_policy: ArbitrationPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub frame_delay: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            frame_delay: Duration::from_millis(DEFAULT_FRAME_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub match_radius_px: f32,
    /// `None` keeps idle identities forever.
    pub evict_after: Option<Duration>,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            match_radius_px: DEFAULT_MATCH_RADIUS_PX,
            evict_after: Some(Duration::from_secs(DEFAULT_EVICT_AFTER_SECS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerSettings {
    pub model_path: PathBuf,
    pub label_map_path: PathBuf,
    pub dataset_dir: PathBuf,
    /// Predictions at or above this distance are unrecognized.
    pub confidence_threshold: f32,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            label_map_path: PathBuf::from(DEFAULT_LABEL_MAP_PATH),
            dataset_dir: PathBuf::from(DEFAULT_DATASET_DIR),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServoSettings {
    pub enabled: bool,
    pub port: String,
    pub baudrate: u32,
    pub pan_pin: u8,
    pub tilt_pin: u8,
    pub step_interval_ms: u64,
    pub step_degrees: f32,
    /// Wait after opening the port while the board resets.
    pub reset_delay_ms: u64,
}

impl Default for ServoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_SERVO_PORT.to_string(),
            baudrate: DEFAULT_SERVO_BAUDRATE,
            pan_pin: DEFAULT_PAN_PIN,
            tilt_pin: DEFAULT_TILT_PIN,
            step_interval_ms: DEFAULT_STEP_INTERVAL_MS,
            step_degrees: DEFAULT_STEP_DEGREES,
            reset_delay_ms: DEFAULT_RESET_DELAY_MS,
        }
    }
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings::default(),
            detector: DetectorSettings::default(),
            tracking: TrackingSettings::default(),
            gate: GateSettings {
                lock_after: Duration::from_secs(DEFAULT_LOCK_AFTER_SECS),
                enrollment_samples: DEFAULT_ENROLLMENT_SAMPLES,
            },
            recognizer: RecognizerSettings::default(),
            db_path: DEFAULT_DB_PATH.to_string(),
            servo: ServoSettings::default(),
            arbiter_policy: ArbitrationPolicy::default(),
        }
    }
}

impl SentryConfig {
    /// Load from `SENTRY_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTRY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> Self {
        let defaults = Self::default();

        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let gate = file.gate.unwrap_or_default();
        let recognizer = file.recognizer.unwrap_or_default();
        let servo = file.servo.unwrap_or_default();

        let evict_after_secs = tracking
            .evict_after_secs
            .unwrap_or(DEFAULT_EVICT_AFTER_SECS);

        Self {
            source: SourceSettings {
                uri: source.uri.unwrap_or(defaults.source.uri),
                width: source.width.unwrap_or(defaults.source.width),
                height: source.height.unwrap_or(defaults.source.height),
                frame_delay: source
                    .frame_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.source.frame_delay),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or(defaults.detector.backend),
                model_path: detector.model_path,
            },
            tracking: TrackingSettings {
                match_radius_px: tracking
                    .match_radius_px
                    .unwrap_or(defaults.tracking.match_radius_px),
                evict_after: (evict_after_secs > 0).then(|| Duration::from_secs(evict_after_secs)),
            },
            gate: GateSettings {
                lock_after: gate
                    .lock_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.gate.lock_after),
                enrollment_samples: gate
                    .enrollment_samples
                    .unwrap_or(defaults.gate.enrollment_samples),
            },
            recognizer: RecognizerSettings {
                model_path: recognizer
                    .model_path
                    .unwrap_or(defaults.recognizer.model_path),
                label_map_path: recognizer
                    .label_map_path
                    .unwrap_or(defaults.recognizer.label_map_path),
                dataset_dir: recognizer
                    .dataset_dir
                    .unwrap_or(defaults.recognizer.dataset_dir),
                confidence_threshold: recognizer
                    .confidence_threshold
                    .unwrap_or(defaults.recognizer.confidence_threshold),
            },
            db_path: file
                .records
                .and_then(|records| records.db_path)
                .unwrap_or(defaults.db_path),
            servo: ServoSettings {
                enabled: servo.enabled.unwrap_or(defaults.servo.enabled),
                port: servo.port.unwrap_or(defaults.servo.port),
                baudrate: servo.baudrate.unwrap_or(defaults.servo.baudrate),
                pan_pin: servo.pan_pin.unwrap_or(defaults.servo.pan_pin),
                tilt_pin: servo.tilt_pin.unwrap_or(defaults.servo.tilt_pin),
                step_interval_ms: servo
                    .step_interval_ms
                    .unwrap_or(defaults.servo.step_interval_ms),
                step_degrees: servo.step_degrees.unwrap_or(defaults.servo.step_degrees),
                reset_delay_ms: servo
                    .reset_delay_ms
                    .unwrap_or(defaults.servo.reset_delay_ms),
            },
            arbiter_policy: file
                .arbiter
                .and_then(|arbiter| arbiter.policy)
                .unwrap_or(defaults.arbiter_policy),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(uri) = env_nonempty("SENTRY_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(backend) = env_nonempty("SENTRY_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_nonempty("SENTRY_DETECTOR_MODEL") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = env_nonempty("SENTRY_DATASET_DIR") {
            self.recognizer.dataset_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_nonempty("SENTRY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(port) = env_nonempty("SENTRY_SERVO_PORT") {
            self.servo.port = port;
        }
        if let Some(policy) = env_nonempty("SENTRY_ARBITER_POLICY") {
            self.arbiter_policy = ArbitrationPolicy::parse(&policy)
                .map_err(|e| anyhow!("SENTRY_ARBITER_POLICY: {}", e))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if self.tracking.match_radius_px <= 0.0 || !self.tracking.match_radius_px.is_finite() {
            return Err(anyhow!("tracking.match_radius_px must be greater than zero"));
        }
        if self.gate.lock_after.is_zero() {
            return Err(anyhow!("gate.lock_after_secs must be greater than zero"));
        }
        if self.gate.enrollment_samples == 0 {
            return Err(anyhow!("gate.enrollment_samples must be greater than zero"));
        }
        if !self.recognizer.confidence_threshold.is_finite() {
            return Err(anyhow!("recognizer.confidence_threshold must be finite"));
        }
        if self.servo.step_interval_ms == 0 {
            return Err(anyhow!("servo.step_interval_ms must be greater than zero"));
        }
        if self.servo.step_degrees <= 0.0 || !self.servo.step_degrees.is_finite() {
            return Err(anyhow!("servo.step_degrees must be greater than zero"));
        }
        if self.servo.pan_pin > 15 || self.servo.tilt_pin > 15 {
            return Err(anyhow!("servo pins must be in 0..=15"));
        }
        if self.servo.pan_pin == self.servo.tilt_pin {
            return Err(anyhow!("servo pan and tilt pins must differ"));
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SentryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let mut cfg = SentryConfig::from_file(SentryConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.source.uri, "stub://camera");
        assert_eq!(cfg.tracking.evict_after, Some(Duration::from_secs(60)));
        assert_eq!(cfg.gate.lock_after, Duration::from_secs(30));
        assert_eq!(cfg.gate.enrollment_samples, 100);
        assert_eq!(cfg.servo.pan_pin, 9);
        assert_eq!(cfg.arbiter_policy, ArbitrationPolicy::LongestLocked);
    }

    #[test]
    fn zero_eviction_disables_it() {
        let file: SentryConfigFile =
            serde_json::from_str(r#"{"tracking": {"evict_after_secs": 0}}"#).unwrap();
        let cfg = SentryConfig::from_file(file);
        assert_eq!(cfg.tracking.evict_after, None);
    }

    #[test]
    fn validation_rejects_zero_lock_window() {
        let file: SentryConfigFile =
            serde_json::from_str(r#"{"gate": {"lock_after_secs": 0}}"#).unwrap();
        let mut cfg = SentryConfig::from_file(file);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_shared_servo_pin() {
        let file: SentryConfigFile =
            serde_json::from_str(r#"{"servo": {"pan_pin": 3, "tilt_pin": 3}}"#).unwrap();
        let mut cfg = SentryConfig::from_file(file);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_reads_snake_case() {
        let file: SentryConfigFile =
            serde_json::from_str(r#"{"arbiter": {"policy": "nearest_center"}}"#).unwrap();
        let cfg = SentryConfig::from_file(file);
        assert_eq!(cfg.arbiter_policy, ArbitrationPolicy::NearestCenter);
    }
}
