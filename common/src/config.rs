use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::detection::Coordinates;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scan: ScanConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default = "default_location")]
    pub location: Coordinates,
    /// Per-camera coordinate overrides, keyed by camera directory name.
    #[serde(default)]
    pub cameras: BTreeMap<String, Coordinates>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    pub root: PathBuf,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub background_index: usize,
    #[serde(default = "default_annotated_format")]
    pub annotated_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Per-pixel luminance difference (0-255) above which a pixel counts as changed.
    #[serde(default = "default_intensity_threshold")]
    pub intensity_threshold: u8,
    /// Changed area (pixels) above which a frame is reported as waste.
    #[serde(default = "default_area_threshold")]
    pub area_threshold: f64,
    /// Radius of the square structuring element; 2 gives a 5x5 kernel.
    #[serde(default = "default_kernel_radius")]
    pub kernel_radius: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: default_intensity_threshold(),
            area_threshold: default_area_threshold(),
            kernel_radius: default_kernel_radius(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ingest_path")]
    pub path: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_waste_type")]
    pub waste_type: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            path: default_ingest_path(),
            timeout_secs: default_timeout(),
            waste_type: default_waste_type(),
        }
    }
}

impl IngestConfig {
    /// Full URL of the detection ingestion endpoint.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Annotated frame formats the scanner knows how to write.
pub const ANNOTATED_FORMATS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.interval_secs == 0 {
            return Err(ConfigError::Invalid("scan.interval_secs must be > 0".into()));
        }
        let format = self.scan.annotated_format.to_ascii_lowercase();
        if !ANNOTATED_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "scan.annotated_format {:?} not one of {ANNOTATED_FORMATS:?}",
                self.scan.annotated_format
            )));
        }
        let area = self.detector.area_threshold;
        if area.is_nan() || area < 0.0 {
            return Err(ConfigError::Invalid(
                "detector.area_threshold must be a number >= 0".into(),
            ));
        }
        if !self.location.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "location {} is out of range",
                self.location
            )));
        }
        for (camera, coords) in &self.cameras {
            if !coords.is_valid() {
                return Err(ConfigError::Invalid(format!(
                    "cameras.{camera} location {coords} is out of range"
                )));
            }
        }
        Ok(())
    }

    /// Coordinates for a camera, falling back to the global location.
    pub fn coordinates_for(&self, camera_id: &str) -> Coordinates {
        self.cameras
            .get(camera_id)
            .copied()
            .unwrap_or(self.location)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_interval() -> u64 {
    30
}
fn default_annotated_format() -> String {
    "jpg".into()
}
fn default_intensity_threshold() -> u8 {
    30
}
fn default_area_threshold() -> f64 {
    1000.0
}
fn default_kernel_radius() -> u8 {
    2
}
fn default_endpoint() -> String {
    "http://localhost:8000".into()
}
fn default_ingest_path() -> String {
    "/api/waste-detection".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_waste_type() -> String {
    "unknown".into()
}
fn default_location() -> Coordinates {
    // Recife city centre.
    Coordinates {
        latitude: -8.0476,
        longitude: -34.8770,
    }
}
fn default_log_level() -> String {
    "info".into()
}
