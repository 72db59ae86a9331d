pub mod camera;
pub mod config;
pub mod diagnostics;
pub mod pipeline;
pub mod stream;

use std::sync::Arc;

use camera::backend::{CameraBackend, CameraDevice};
use camera::dummy::DummyBackend;
use camera::error::{CameraError, Result};
use camera::types::DeviceInfo;

/// Create the camera backend for the current build.
///
/// When `DUMMY_CAMERA=1` is set, a simulated camera is used instead.
pub fn create_backend() -> Arc<dyn CameraBackend> {
    if DummyBackend::is_enabled() {
        tracing::info!("DUMMY_CAMERA set, using synthetic camera backend");
        return Arc::new(DummyBackend::new());
    }
    Arc::new(NullBackend)
}

/// Backend used when no native camera backend is compiled in.
pub struct NullBackend;

impl CameraBackend for NullBackend {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![])
    }

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>> {
        Err(CameraError::DeviceNotFound(format!(
            "no camera backend available for device {index}"
        )))
    }
}
