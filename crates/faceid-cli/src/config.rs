use faceid_core::types::{DEFAULT_DETECTION_THRESHOLD, DEFAULT_VERIFICATION_THRESHOLD};
use faceid_core::{CropRegion, Thresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FACEID_CONFIG";
/// Config file picked up from the working directory when present.
const DEFAULT_CONFIG_FILE: &str = "faceid.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// CLI configuration: defaults, then a TOML file, then `FACEID_*` variables.
/// Command-line flags are applied on top by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Siamese ONNX model file.
    pub model_path: PathBuf,
    /// Directory of reference images for the enrolled identity.
    pub gallery_dir: PathBuf,
    /// Probe image to verify.
    pub probe_path: PathBuf,
    /// Window cut from the probe before preprocessing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_crop: Option<CropRegion>,
    /// Per-pair score a reference must exceed to count as a detection.
    pub detection_threshold: f32,
    /// Fraction of detections the gallery must exceed to verify.
    pub verification_threshold: f32,
    /// Threads scoring gallery pairs; 1 keeps scoring sequential.
    pub workers: usize,
    /// Upper bound in seconds for one verify or score request.
    pub verify_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("siamesemodelv2.onnx"),
            gallery_dir: PathBuf::from("application_data/verification_images"),
            probe_path: PathBuf::from("application_data/input_image/input_image.jpg"),
            probe_crop: None,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            verification_threshold: DEFAULT_VERIFICATION_THRESHOLD,
            workers: 1,
            verify_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` (or `$FACEID_CONFIG`) must exist; `./faceid.toml`
    /// is only read when present. Environment variables override the file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `FACEID_*` variables resolved through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEID_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEID_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEID_PROBE_PATH") {
            self.probe_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse(&lookup, "FACEID_PROBE_CROP") {
            self.probe_crop = Some(v);
        }
        if let Some(v) = env_parse(&lookup, "FACEID_DETECTION_THRESHOLD") {
            self.detection_threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEID_VERIFICATION_THRESHOLD") {
            self.verification_threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEID_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = env_parse(&lookup, "FACEID_VERIFY_TIMEOUT_SECS") {
            self.verify_timeout_secs = v;
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.detection_threshold, self.verification_threshold)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.thresholds(), Thresholds::new(0.99, 0.7));
        assert_eq!(config.workers, 1);
        assert_eq!(
            config.gallery_dir,
            PathBuf::from("application_data/verification_images")
        );
        assert!(config.probe_crop.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            detection_threshold = 0.5
            workers = 4

            [probe_crop]
            x = 200
            y = 120
            width = 250
            height = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.detection_threshold, 0.5);
        assert_eq!(config.verification_threshold, 0.7);
        assert_eq!(config.workers, 4);
        assert_eq!(config.probe_crop, Some(CropRegion::new(200, 120, 250, 250)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("FACEID_GALLERY_DIR", "/srv/gallery"),
            ("FACEID_VERIFICATION_THRESHOLD", "0.5"),
            ("FACEID_PROBE_CROP", "1,2,3,4"),
            ("FACEID_WORKERS", "8"),
        ]));
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/gallery"));
        assert_eq!(config.verification_threshold, 0.5);
        assert_eq!(config.probe_crop, Some(CropRegion::new(1, 2, 3, 4)));
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_unparsable_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(lookup(&[
            ("FACEID_DETECTION_THRESHOLD", "high"),
            ("FACEID_PROBE_CROP", "0,0"),
        ]));
        assert_eq!(config.detection_threshold, 0.99);
        assert!(config.probe_crop.is_none());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/nonexistent/faceid.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_malformed_file() {
        let path = std::env::temp_dir().join(format!("faceid-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "workers = \"many\"").unwrap();
        let result = Config::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_toml_output_parses_back() {
        let mut config = Config::default();
        config.probe_crop = Some(CropRegion::new(200, 120, 250, 250));
        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
