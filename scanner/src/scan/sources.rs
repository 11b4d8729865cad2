use dumpwatch_common::detection::is_detection_file;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::ScanError;

/// One camera: its directory under the scan root and the image files inside it.
#[derive(Debug, Clone)]
pub struct CameraSource {
    pub id: String,
    pub dir: PathBuf,
    /// Frames sorted by file name across all extensions. The frame at the
    /// configured background index becomes the camera's reference.
    pub frames: Vec<PathBuf>,
}

impl CameraSource {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>, frames: Vec<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
            frames,
        }
    }
}

/// Every subdirectory of `root` is a camera named after the directory.
///
/// Fails when `root` is missing or unreadable, or holds no camera
/// directories. A camera whose own directory cannot be listed is kept with an
/// empty frame list so the cycle can carry on without it.
pub fn discover_cameras(root: &Path) -> Result<Vec<CameraSource>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::RootMissing(root.display().to_string()));
    }

    let entries =
        std::fs::read_dir(root).map_err(|e| ScanError::ReadRoot(root.display().to_string(), e))?;

    let mut cameras = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ScanError::ReadRoot(root.display().to_string(), e))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        let frames = match list_frames(&dir) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(camera = id, error = %e, "failed to list camera images");
                Vec::new()
            }
        };
        debug!(camera = id, frames = frames.len(), "camera discovered");
        cameras.push(CameraSource::new(id, dir, frames));
    }

    if cameras.is_empty() {
        return Err(ScanError::NoCameras(root.display().to_string()));
    }

    cameras.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(cameras)
}

/// Image files directly inside `dir`, sorted by file name.
///
/// Any extension the image codec recognises is accepted; annotated
/// `detection_*` outputs are skipped.
pub fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name();
        if is_detection_file(&name.to_string_lossy()) {
            continue;
        }
        if ImageFormat::from_path(&path).is_ok() {
            frames.push(path);
        }
    }
    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(frames: &[PathBuf]) -> Vec<String> {
        frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn frames_sorted_across_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "c.jpeg", "a0.bmp", "notes.txt", "detection_2.jpg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.png")).unwrap();

        let frames = list_frames(dir.path()).unwrap();
        assert_eq!(names(&frames), vec!["a.jpg", "a0.bmp", "b.png", "c.jpeg"]);
    }

    #[test]
    fn cameras_sorted_by_directory_name() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("camera_02")).unwrap();
        fs::create_dir(root.path().join("camera_01")).unwrap();
        fs::write(root.path().join("camera_01/img_1.jpg"), b"x").unwrap();
        fs::write(root.path().join("stray.jpg"), b"x").unwrap();

        let cameras = discover_cameras(root.path()).unwrap();
        let ids: Vec<&str> = cameras.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["camera_01", "camera_02"]);
        assert_eq!(cameras[0].frames.len(), 1);
        assert!(cameras[1].frames.is_empty());
        assert_eq!(cameras[0].dir, root.path().join("camera_01"));
    }

    #[test]
    fn missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let err = discover_cameras(&root.path().join("vanished")).unwrap_err();
        assert!(matches!(err, ScanError::RootMissing(_)));
    }

    #[test]
    fn root_without_cameras_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("loose.jpg"), b"x").unwrap();
        let err = discover_cameras(root.path()).unwrap_err();
        assert!(matches!(err, ScanError::NoCameras(_)));
    }
}
