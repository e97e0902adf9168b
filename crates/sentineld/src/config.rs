use sentinel_core::annotate::DEFAULT_LABEL_FONT;
use sentinel_core::AlertPolicy;
use sentinel_hw::{CaptureConfig, SourceKey};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `SENTINEL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Surveillance camera: index, device path, or URL.
    pub camera_source: String,
    /// Camera used for enrollment captures.
    pub device_camera_source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Cosine similarity a face must exceed to count as recognized.
    pub match_threshold: f32,
    pub unknown_duration_secs: f64,
    pub alert_cooldown_secs: f64,
    /// Process one frame out of every `frame_skip` captured.
    pub frame_skip: u64,
    pub send_telegram: bool,
    pub telegram_token: String,
    pub telegram_chat_id: String,
    pub intruder_dir: PathBuf,
    pub users_dir: PathBuf,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Square SCRFD input size.
    pub detection_size: usize,
    pub label_font: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = sentinel_core::default_data_dir();
        Self {
            camera_source: "0".into(),
            device_camera_source: "0".into(),
            frame_width: 640,
            frame_height: 480,
            match_threshold: sentinel_core::matcher::DEFAULT_MATCH_THRESHOLD,
            unknown_duration_secs: 2.0,
            alert_cooldown_secs: 30.0,
            frame_skip: 10,
            send_telegram: false,
            telegram_token: String::new(),
            telegram_chat_id: String::new(),
            intruder_dir: data_dir.join("intruders"),
            users_dir: data_dir.join("users"),
            model_dir: PathBuf::from(sentinel_core::default_model_dir()),
            detection_size: 320,
            label_font: PathBuf::from(DEFAULT_LABEL_FONT),
        }
    }
}

impl Config {
    /// Load from `SENTINEL_CONFIG` (or `$XDG_CONFIG_HOME/sentinel/config.toml` if it
    /// exists), apply environment overrides, and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();

        let mut config = match config_file_path(&lookup) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `SENTINEL_*` variables resolved through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("SENTINEL_CAMERA_SOURCE") {
            self.camera_source = v;
        }
        if let Some(v) = lookup("SENTINEL_DEVICE_CAMERA_SOURCE") {
            self.device_camera_source = v;
        }
        env_parse(&lookup, "SENTINEL_FRAME_WIDTH", &mut self.frame_width)?;
        env_parse(&lookup, "SENTINEL_FRAME_HEIGHT", &mut self.frame_height)?;
        env_parse(&lookup, "SENTINEL_MATCH_THRESHOLD", &mut self.match_threshold)?;
        env_parse(&lookup, "SENTINEL_UNKNOWN_DURATION_SECS", &mut self.unknown_duration_secs)?;
        env_parse(&lookup, "SENTINEL_ALERT_COOLDOWN_SECS", &mut self.alert_cooldown_secs)?;
        env_parse(&lookup, "SENTINEL_FRAME_SKIP", &mut self.frame_skip)?;
        env_bool(&lookup, "SENTINEL_SEND_TELEGRAM", &mut self.send_telegram)?;
        if let Some(v) = lookup("SENTINEL_TELEGRAM_TOKEN") {
            self.telegram_token = v;
        }
        if let Some(v) = lookup("SENTINEL_TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = v;
        }
        env_parse(&lookup, "SENTINEL_INTRUDER_DIR", &mut self.intruder_dir)?;
        env_parse(&lookup, "SENTINEL_USERS_DIR", &mut self.users_dir)?;
        env_parse(&lookup, "SENTINEL_MODEL_DIR", &mut self.model_dir)?;
        env_parse(&lookup, "SENTINEL_DETECTION_SIZE", &mut self.detection_size)?;
        env_parse(&lookup, "SENTINEL_LABEL_FONT", &mut self.label_font)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() {
            return Err(ConfigError::Invalid("match_threshold must be finite".into()));
        }
        for (name, secs) in [
            ("unknown_duration_secs", self.unknown_duration_secs),
            ("alert_cooldown_secs", self.alert_cooldown_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be a non-negative number")));
            }
        }
        if self.frame_skip == 0 {
            return Err(ConfigError::Invalid("frame_skip must be at least 1".into()));
        }
        if self.detection_size == 0 || self.detection_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "detection_size {} must be a positive multiple of 32",
                self.detection_size
            )));
        }
        if self.camera_source.trim().is_empty() {
            return Err(ConfigError::Invalid("camera_source is empty".into()));
        }
        Ok(())
    }

    pub fn camera_key(&self) -> SourceKey {
        SourceKey::parse(&self.camera_source)
    }

    pub fn enrollment_key(&self) -> SourceKey {
        SourceKey::parse(&self.device_camera_source)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: Some(self.frame_width).filter(|w| *w > 0),
            height: Some(self.frame_height).filter(|h| *h > 0),
        }
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            unknown_duration: Duration::from_secs_f64(self.unknown_duration_secs),
            cooldown: Duration::from_secs_f64(self.alert_cooldown_secs),
            notifications_enabled: self.send_telegram,
        }
    }
}

fn config_file_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = lookup("SENTINEL_CONFIG").filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let config_home = lookup("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    let path = config_home.join("sentinel/config.toml");
    path.is_file().then_some(path)
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut T,
) -> Result<(), ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    *field = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value,
    })?;
    Ok(())
}

fn env_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &mut bool,
) -> Result<(), ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    *field = match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            return Err(ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            })
        }
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_source, "0");
        assert!((config.match_threshold - 0.45).abs() < 1e-6);
        assert_eq!(config.unknown_duration_secs, 2.0);
        assert_eq!(config.alert_cooldown_secs, 30.0);
        assert_eq!(config.frame_skip, 10);
        assert!(!config.send_telegram);
        assert!(config.intruder_dir.ends_with("intruders"));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("SENTINEL_CAMERA_SOURCE", "http://cam.local/stream"),
                ("SENTINEL_MATCH_THRESHOLD", "0.6"),
                ("SENTINEL_FRAME_SKIP", "5"),
                ("SENTINEL_SEND_TELEGRAM", "true"),
                ("SENTINEL_INTRUDER_DIR", "/srv/intruders"),
            ]))
            .unwrap();

        assert_eq!(config.camera_key(), SourceKey::Url("http://cam.local/stream".into()));
        assert!((config.match_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.frame_skip, 5);
        assert!(config.alert_policy().notifications_enabled);
        assert_eq!(config.intruder_dir, PathBuf::from("/srv/intruders"));
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("SENTINEL_FRAME_SKIP", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "SENTINEL_FRAME_SKIP"));

        let err = config
            .apply_env(env(&[("SENTINEL_SEND_TELEGRAM", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_toml_file_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "camera_source = \"/dev/video2\"\nalert_cooldown_secs = 60\nsend_telegram = true\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.camera_key(), SourceKey::Path("/dev/video2".into()));
        assert_eq!(config.alert_policy().cooldown, Duration::from_secs(60));
        assert_eq!(config.frame_skip, 10);
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "camera = 1\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_config_file_lookup_order() {
        let explicit = config_file_path(&env(&[("SENTINEL_CONFIG", "/etc/sentinel.toml")]));
        assert_eq!(explicit, Some(PathBuf::from("/etc/sentinel.toml")));

        let tmp = tempfile::tempdir().unwrap();
        let lookup = env(&[("XDG_CONFIG_HOME", tmp.path().to_str().unwrap())]);
        assert_eq!(config_file_path(&lookup), None);

        std::fs::create_dir_all(tmp.path().join("sentinel")).unwrap();
        std::fs::write(tmp.path().join("sentinel/config.toml"), "").unwrap();
        assert_eq!(config_file_path(&lookup), Some(tmp.path().join("sentinel/config.toml")));
    }

    #[test]
    fn test_validation() {
        let invalid = [
            Config { frame_skip: 0, ..Config::default() },
            Config { match_threshold: f32::NAN, ..Config::default() },
            Config { unknown_duration_secs: -1.0, ..Config::default() },
            Config { alert_cooldown_secs: f64::INFINITY, ..Config::default() },
            Config { detection_size: 300, ..Config::default() },
            Config { camera_source: " ".into(), ..Config::default() },
        ];
        for config in invalid {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{config:?}");
        }
    }

    #[test]
    fn test_capture_config_zero_means_driver_default() {
        let config = Config { frame_width: 0, ..Config::default() };
        let capture = config.capture_config();
        assert_eq!(capture.width, None);
        assert_eq!(capture.height, Some(480));
    }
}
