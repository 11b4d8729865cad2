use dumpwatch_common::detection::detection_file_name;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An annotated frame written to disk, with the bytes that were written.
#[derive(Debug)]
pub struct SavedFrame {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Writes annotated detections next to the camera's source images as
/// `detection_<index>.<ext>`.
pub struct DetectionStore {
    format: ImageFormat,
    ext: String,
}

impl DetectionStore {
    pub fn new(ext: &str) -> Result<Self, StorageError> {
        let ext = ext.to_ascii_lowercase();
        let format = ImageFormat::from_extension(&ext)
            .ok_or_else(|| StorageError::UnsupportedFormat(ext.clone()))?;
        Ok(Self { format, ext })
    }

    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, StorageError> {
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, self.format)
            .map_err(|e| StorageError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }

    /// Encode and write the annotated frame for sequence position `index`
    /// into `dir`, overwriting a previous file of the same name.
    pub async fn save(
        &self,
        dir: &Path,
        index: usize,
        image: &RgbImage,
    ) -> Result<SavedFrame, StorageError> {
        let bytes = self.encode(image)?;
        let file_name = detection_file_name(index, &self.ext);
        let path = dir.join(&file_name);

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| StorageError::Write(path.display().to_string(), e))?;

        debug!(path = %path.display(), size = bytes.len(), "stored annotated frame");

        Ok(SavedFrame {
            path,
            file_name,
            bytes,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unsupported annotated frame format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to encode annotated frame: {0}")]
    Encode(String),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
}
