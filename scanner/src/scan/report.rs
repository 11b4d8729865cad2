use std::collections::BTreeMap;
use tracing::info;

/// Detections submitted per camera during one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCycleReport {
    pub cycle: u64,
    pub per_camera: BTreeMap<String, usize>,
    pub total: usize,
}

impl ScanCycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Self::default()
        }
    }

    pub fn record(&mut self, camera_id: &str, detections: usize) {
        *self.per_camera.entry(camera_id.to_string()).or_default() += detections;
        self.total += detections;

        if detections > 0 {
            info!(camera = camera_id, detections, "possible dumping reported for camera");
        } else {
            info!(camera = camera_id, "no dumping detected for camera");
        }
    }

    pub fn cameras(&self) -> usize {
        self.per_camera.len()
    }

    pub fn log(&self) {
        info!(
            cycle = self.cycle,
            cameras = self.cameras(),
            total = self.total,
            per_camera = ?self.per_camera,
            "detection cycle complete"
        );
    }
}
