use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::fmt;

/// File name prefix of annotated detection frames written next to the source images.
pub const DETECTION_PREFIX: &str = "detection_";

/// Geographic position of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// A confirmed detection as handed to the ingestion API.
///
/// `image` holds the encoded annotated frame; `image_name` is the file name it
/// was saved under, reused as the upload file name.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub camera_id: String,
    pub captured_at: DateTime<Utc>,
    pub coordinates: Coordinates,
    pub detection_area: f64,
    pub waste_type: String,
    pub image_name: String,
    pub image: Vec<u8>,
}

impl DetectionReport {
    /// ISO-8601 timestamp, millisecond precision, `Z` suffix.
    pub fn timestamp(&self) -> String {
        self.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// MIME type of the attached image, derived from its file extension.
    pub fn image_mime(&self) -> &'static str {
        let ext = self
            .image_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            _ => "image/jpeg",
        }
    }
}

/// Name of the annotated frame for sequence position `index`,
/// e.g. `detection_3.jpg`.
pub fn detection_file_name(index: usize, ext: &str) -> String {
    format!("{DETECTION_PREFIX}{index}.{ext}")
}

/// True for files the scanner itself wrote; they are never treated as input frames.
pub fn is_detection_file(file_name: &str) -> bool {
    file_name.starts_with(DETECTION_PREFIX)
}
