use rollcall_core::quality::DEFAULT_QUALITY_THRESHOLD;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} is not a valid value: '{value}'")]
    Unparseable { name: &'static str, value: String },
    #[error("unknown bus kind '{0}' (expected 'session' or 'system')")]
    UnknownBus(String),
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the per-identity image folders (default: datasets/students).
    pub dataset_root: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Similarity a match must exceed.
    pub recognition_threshold: f64,
    /// Minimum sharpness for a training crop.
    pub quality_threshold: f64,
    /// Longest edge an ingested image is resized down to.
    pub max_image_dimension: u32,
    /// Identities with fewer images are flagged by validation.
    pub min_images_per_identity: usize,
    /// Repeat marks of one identity in one session within this window are
    /// suppressed. 0 disables suppression.
    pub dedup_window_secs: u64,
    /// Per-observer outbound queue depth.
    pub observer_buffer: usize,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("datasets/students"),
            db_path: data_dir().join("attendance.db"),
            model_dir: rollcall_core::default_model_dir(),
            recognition_threshold: 0.6,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            max_image_dimension: rollcall_core::imaging::DEFAULT_MAX_DIMENSION,
            min_images_per_identity: 3,
            dedup_window_secs: 0,
            observer_buffer: 64,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from `lookup`, falling back to defaults for
    /// unset or empty keys. Values that are set but unparseable are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            dataset_root: get("ROLLCALL_DATASET_ROOT").map(PathBuf::from).unwrap_or(defaults.dataset_root),
            db_path: get("ROLLCALL_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            model_dir: get("ROLLCALL_MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            recognition_threshold: parse_or(
                "ROLLCALL_RECOGNITION_THRESHOLD",
                get("ROLLCALL_RECOGNITION_THRESHOLD"),
                defaults.recognition_threshold,
            )?,
            quality_threshold: parse_or(
                "ROLLCALL_QUALITY_THRESHOLD",
                get("ROLLCALL_QUALITY_THRESHOLD"),
                defaults.quality_threshold,
            )?,
            max_image_dimension: parse_or(
                "ROLLCALL_MAX_IMAGE_DIMENSION",
                get("ROLLCALL_MAX_IMAGE_DIMENSION"),
                defaults.max_image_dimension,
            )?,
            min_images_per_identity: parse_or(
                "ROLLCALL_MIN_IMAGES_PER_IDENTITY",
                get("ROLLCALL_MIN_IMAGES_PER_IDENTITY"),
                defaults.min_images_per_identity,
            )?,
            dedup_window_secs: parse_or(
                "ROLLCALL_DEDUP_WINDOW_SECS",
                get("ROLLCALL_DEDUP_WINDOW_SECS"),
                defaults.dedup_window_secs,
            )?,
            observer_buffer: parse_or(
                "ROLLCALL_OBSERVER_BUFFER",
                get("ROLLCALL_OBSERVER_BUFFER"),
                defaults.observer_buffer,
            )?,
            bus: match get("ROLLCALL_BUS") {
                Some(raw) => raw.parse()?,
                None => defaults.bus,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("ROLLCALL_RECOGNITION_THRESHOLD", self.recognition_threshold),
            ("ROLLCALL_QUALITY_THRESHOLD", self.quality_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if self.max_image_dimension == 0 {
            return Err(ConfigError::Zero("ROLLCALL_MAX_IMAGE_DIMENSION"));
        }
        if self.observer_buffer == 0 {
            return Err(ConfigError::Zero("ROLLCALL_OBSERVER_BUFFER"));
        }
        Ok(())
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir.join("face_detector.onnx").to_string_lossy().into_owned()
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir.join("face_embedder.onnx").to_string_lossy().into_owned()
    }
}

impl FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            _ => Err(ConfigError::UnknownBus(raw.to_string())),
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Unparseable { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recognition_threshold, 0.6);
        assert_eq!(config.min_images_per_identity, 3);
        assert!(config.db_path.ends_with("rollcall/attendance.db"));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = Config {
            recognition_threshold: 1.5,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "ROLLCALL_RECOGNITION_THRESHOLD",
                value: 1.5
            })
        );
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let config = Config {
            quality_threshold: f64::NAN,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = Config {
            observer_buffer: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("ROLLCALL_OBSERVER_BUFFER")));
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = load(&[
            ("ROLLCALL_RECOGNITION_THRESHOLD", "0.7"),
            ("ROLLCALL_DEDUP_WINDOW_SECS", "300"),
            ("ROLLCALL_BUS", "System"),
            ("ROLLCALL_DATASET_ROOT", ""),
        ])
        .unwrap();
        assert_eq!(config.recognition_threshold, 0.7);
        assert_eq!(config.dedup_window_secs, 300);
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.dataset_root, PathBuf::from("datasets/students"));
    }

    #[test]
    fn test_unparseable_value_rejected() {
        assert_eq!(
            load(&[("ROLLCALL_RECOGNITION_THRESHOLD", "0,7")]).unwrap_err(),
            ConfigError::Unparseable {
                name: "ROLLCALL_RECOGNITION_THRESHOLD",
                value: "0,7".into()
            }
        );
        assert!(matches!(
            load(&[("ROLLCALL_OBSERVER_BUFFER", "-1")]),
            Err(ConfigError::Unparseable { name: "ROLLCALL_OBSERVER_BUFFER", .. })
        ));
    }

    #[test]
    fn test_out_of_range_from_lookup_rejected() {
        assert!(matches!(
            load(&[("ROLLCALL_QUALITY_THRESHOLD", "2")]),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_unknown_bus_rejected() {
        assert_eq!(load(&[("ROLLCALL_BUS", "tcp")]).unwrap_err(), ConfigError::UnknownBus("tcp".into()));
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            ..Config::default()
        };
        assert_eq!(config.detector_model_path(), "/models/face_detector.onnx");
        assert_eq!(config.embedder_model_path(), "/models/face_embedder.onnx");
    }
}
