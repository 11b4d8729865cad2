use image::GrayImage;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Reference frames keyed by camera id.
///
/// Readers only hold the lock long enough to clone the `Arc`; a reload swaps
/// the entry under the write lock, so the last writer for a camera wins and an
/// evaluation in flight keeps the model it started with.
#[derive(Default)]
pub struct BackgroundStore {
    models: RwLock<HashMap<String, Arc<GrayImage>>>,
}

impl BackgroundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, camera_id: &str) -> Option<Arc<GrayImage>> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(camera_id).cloned()
    }

    /// Install `model` for `camera_id`, replacing any previous one.
    pub fn replace(&self, camera_id: &str, model: GrayImage) {
        let (width, height) = model.dimensions();
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        let previous = models.insert(camera_id.to_string(), Arc::new(model));
        debug!(
            camera = camera_id,
            width,
            height,
            replaced = previous.is_some(),
            "background model stored"
        );
    }

    pub fn remove(&self, camera_id: &str) -> bool {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.remove(camera_id).is_some()
    }
}
