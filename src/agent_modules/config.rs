use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::Path, time::Duration};
use tracing::{error, info};

pub const DEFAULT_CONFIG_PATH: &str = "agent_config.toml";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfig {
    /// Full URL of the ingestion endpoint, e.g. `http://localhost:5000/alert`.
    pub alert_url: String,
    /// Still-image endpoint of the camera. Ignored when `frame_dir` is set.
    #[serde(default)]
    pub camera_url: Option<String>,
    /// Replay frames from this directory instead of polling a camera.
    #[serde(default)]
    pub frame_dir: Option<String>,
    /// Inference endpoint that turns a JPEG frame into detections.
    #[serde(default)]
    pub detector_url: Option<String>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_fire_labels")]
    pub fire_labels: Vec<String>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub font_path: Option<String>,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_capture_retry_ms")]
    pub capture_retry_ms: u64,

    #[serde(default = "default_save_detections")]
    pub save_detections: bool,
    #[serde(default = "default_detection_dir")]
    pub detection_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_fire_labels() -> Vec<String> {
    vec!["fire".to_string(), "smoke".to_string(), "flame".to_string()]
}

fn default_cooldown_seconds() -> u64 {
    30
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_frame_interval_ms() -> u64 {
    100
}

fn default_capture_retry_ms() -> u64 {
    1000
}

fn default_save_detections() -> bool {
    true
}

fn default_detection_dir() -> String {
    "detections".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl AgentConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.alert_url.trim().is_empty() {
            return Err("alert_url must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence_threshold must be within [0.0, 1.0], got {}",
                self.confidence_threshold
            ));
        }
        if self.fire_labels.iter().all(|l| l.trim().is_empty()) {
            return Err("fire_labels must contain at least one label".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!("jpeg_quality must be within 1..=100, got {}", self.jpeg_quality));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err("frame_width and frame_height must be positive".to_string());
        }
        Ok(())
    }
}

pub fn parse_config(config_str: &str) -> Result<AgentConfig, Box<dyn Error + Send + Sync>> {
    let config: AgentConfig = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(config_path_str: &str) -> Result<AgentConfig, Box<dyn Error + Send + Sync>> {
    let config_path = Path::new(config_path_str);
    // Attempt to get absolute path for logging, but don't fail if it can't be canonicalized
    let absolute_path_display = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    info!(path = ?absolute_path_display, "Attempting to load config.");

    let config_str = fs::read_to_string(config_path).map_err(|e| {
        error!(path = %config_path_str, error = %e, "Failed to read agent config file.");
        e
    })?;

    let agent_config = parse_config(&config_str).map_err(|e| {
        error!(path = %config_path_str, error = %e, "Failed to parse agent config file.");
        e
    })?;

    info!(config = ?agent_config, "Loaded config successfully.");
    Ok(agent_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = parse_config("alert_url = \"http://localhost:5000/alert\"").unwrap();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.fire_labels, vec!["fire", "smoke", "flame"]);
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
        assert_eq!(config.frame_interval(), Duration::from_millis(100));
        assert!(config.save_detections);
        assert_eq!(config.detection_dir, "detections");
        assert!(config.camera_url.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = parse_config(
            r#"
            alert_url = "http://example.org/alert"
            camera_url = "http://192.168.0.100/capture"
            detector_url = "http://127.0.0.1:8000/detect"
            confidence_threshold = 0.65
            fire_labels = ["wildfire"]
            cooldown_seconds = 5
            save_detections = false
            "#,
        )
        .unwrap();
        assert_eq!(config.confidence_threshold, 0.65);
        assert_eq!(config.fire_labels, vec!["wildfire"]);
        assert_eq!(config.cooldown(), Duration::from_secs(5));
        assert!(!config.save_detections);
        assert_eq!(config.camera_url.as_deref(), Some("http://192.168.0.100/capture"));
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let err = parse_config(
            "alert_url = \"http://localhost/alert\"\nconfidence_threshold = 1.5",
        )
        .unwrap_err();
        assert!(err.to_string().contains("confidence_threshold"));
    }

    #[test]
    fn missing_alert_url_is_rejected() {
        assert!(parse_config("cooldown_seconds = 10").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        assert!(load_config("/nonexistent/agent_config.toml").is_err());
    }
}
