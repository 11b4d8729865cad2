pub mod background;
pub mod pipeline;

use dumpwatch_common::config::DetectorConfig;
use image::{DynamicImage, ImageError, ImageReader, RgbImage};
use std::path::Path;
use tracing::{debug, info};

use background::BackgroundStore;

/// Outcome of comparing one frame with its camera's background.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub has_waste: bool,
    /// Summed area of all outer changed regions, in pixels.
    pub changed_area: f64,
    pub regions: usize,
    /// The input frame with every changed region outlined. Produced whether
    /// or not `has_waste` is set.
    pub annotated: RgbImage,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to decode background image {0}: {1}")]
    Decode(String, ImageError),
    #[error("background worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("no background loaded for camera {0}")]
    NoBackground(String),
    #[error("failed to decode frame {0}: {1}")]
    Decode(String, ImageError),
    #[error("frame dimensions {actual:?} do not match background {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("detection worker failed: {0}")]
    Worker(String),
}

/// Background-subtraction change detector holding one reference frame per camera.
///
/// Pipeline per frame:
/// 1. luminance conversion
/// 2. absolute difference against the camera's background
/// 3. binarise at `intensity_threshold`
/// 4. opening then closing with a `(2r+1)x(2r+1)` square kernel
/// 5. outer contours, areas summed
/// 6. `has_waste = changed_area > area_threshold`
pub struct ChangeDetector {
    config: DetectorConfig,
    backgrounds: BackgroundStore,
}

impl ChangeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        info!(
            intensity_threshold = config.intensity_threshold,
            area_threshold = config.area_threshold,
            kernel = 2 * config.kernel_radius as u32 + 1,
            "change detector initialised"
        );
        Self {
            config,
            backgrounds: BackgroundStore::new(),
        }
    }

    pub fn has_background(&self, camera_id: &str) -> bool {
        self.backgrounds.get(camera_id).is_some()
    }

    /// Decode `path` and install it as the background for `camera_id`.
    ///
    /// On failure any earlier background for the camera is dropped, so the
    /// camera cannot be evaluated until a load succeeds.
    pub fn load_background(&self, camera_id: &str, path: &Path) -> Result<(), LoadError> {
        match decode(path) {
            Ok(img) => {
                self.set_background(camera_id, &img);
                info!(camera = camera_id, path = %path.display(), "background loaded");
                Ok(())
            }
            Err(e) => {
                self.backgrounds.remove(camera_id);
                Err(LoadError::Decode(path.display().to_string(), e))
            }
        }
    }

    pub fn set_background(&self, camera_id: &str, img: &DynamicImage) {
        self.backgrounds.replace(camera_id, img.to_luma8());
    }

    /// Decode the frame at `path` and evaluate it. The background lookup
    /// happens first, so an unknown camera never touches the file.
    pub fn evaluate(&self, camera_id: &str, path: &Path) -> Result<DetectionResult, EvalError> {
        if !self.has_background(camera_id) {
            return Err(EvalError::NoBackground(camera_id.to_string()));
        }
        let frame = decode(path).map_err(|e| EvalError::Decode(path.display().to_string(), e))?;
        self.evaluate_image(camera_id, &frame)
    }

    pub fn evaluate_image(
        &self,
        camera_id: &str,
        frame: &DynamicImage,
    ) -> Result<DetectionResult, EvalError> {
        let background = self
            .backgrounds
            .get(camera_id)
            .ok_or_else(|| EvalError::NoBackground(camera_id.to_string()))?;

        let gray = frame.to_luma8();
        if gray.dimensions() != background.dimensions() {
            return Err(EvalError::DimensionMismatch {
                expected: background.dimensions(),
                actual: gray.dimensions(),
            });
        }

        let mask = pipeline::change_mask(&background, &gray, self.config.intensity_threshold);
        let mask = pipeline::denoise(&mask, self.config.kernel_radius);
        let contours = pipeline::outer_contours(&mask);
        let changed_area: f64 = contours
            .iter()
            .map(|c| pipeline::polygon_area(&c.points))
            .sum();
        let has_waste = changed_area > self.config.area_threshold;

        debug!(
            camera = camera_id,
            regions = contours.len(),
            changed_area,
            threshold = self.config.area_threshold,
            has_waste,
            "frame evaluated"
        );

        Ok(DetectionResult {
            has_waste,
            changed_area,
            regions: contours.len(),
            annotated: pipeline::annotate(frame, &contours),
        })
    }
}

fn decode(path: &Path) -> Result<DynamicImage, ImageError> {
    ImageReader::open(path)
        .map_err(ImageError::IoError)?
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .decode()
}
