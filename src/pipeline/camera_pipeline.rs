use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::camera::backend::CameraBackend;
use crate::camera::error::Result;
use crate::camera::types::Resolution;
use crate::config::types::{AppConfig, DeviceConfig, TransformConfig};
use crate::config::watcher::{ConfigWatcher, Projection, WatchHandle};
use crate::diagnostics::stats::{FpsCounter, StatsSnapshot};
use crate::pipeline::preview::PreviewSink;
use crate::pipeline::transform::TransformOptions;
use crate::stream::capture::{CaptureLoop, CaptureState};
use crate::stream::hub::{BroadcastHub, SinkHandle, StreamError};

/// Frames kept by each preview created through [`CameraPipeline::create_preview`].
const PREVIEW_CAPACITY: usize = 3;

/// Wires a capture loop to the application configuration and a frame-rate
/// counter, and gives the rest of the application one handle to attach
/// consumers to.
pub struct CameraPipeline {
    capture: Arc<CaptureLoop>,
    fps: Arc<FpsCounter>,
    fps_sink: SinkHandle,
    options: Arc<TransformOptions>,
    watches: Mutex<Vec<WatchHandle<AppConfig>>>,
    closed: AtomicBool,
}

impl CameraPipeline {
    /// Start capturing and subscribe to the camera section of `config`.
    ///
    /// Both watches fire once during construction, so the device is opened
    /// and the transform options are populated before this returns. A device
    /// that cannot be opened is logged and retried on the next relevant
    /// config change; only a failure to spawn the capture thread is an error.
    pub fn new(
        config: &Arc<ConfigWatcher<AppConfig>>,
        backend: Arc<dyn CameraBackend>,
    ) -> Result<Self> {
        let capture = Arc::new(CaptureLoop::new("camera", backend));
        let fps = Arc::new(FpsCounter::new("fps"));
        let fps_sink: SinkHandle = fps.clone();
        if let Err(e) = capture.register_stream(Arc::clone(&fps_sink)) {
            warn!("failed to attach fps counter: {e}");
        }
        capture.start()?;

        let options = Arc::new(TransformOptions::new(TransformConfig::from(
            &config.current().camera,
        )));

        let device_watch = {
            let capture = Arc::downgrade(&capture);
            let fps = Arc::clone(&fps);
            config.watch(
                "camera-device",
                vec![
                    Projection::new("camera_id", |c: &AppConfig| c.camera.camera_id),
                    Projection::new("camera_name", |c: &AppConfig| c.camera.camera_name.clone()),
                    Projection::new("width", |c: &AppConfig| c.camera.width),
                    Projection::new("height", |c: &AppConfig| c.camera.height),
                ],
                true,
                move |c: &AppConfig| {
                    let Some(capture) = capture.upgrade() else {
                        return;
                    };
                    let request = DeviceConfig::from(&c.camera);
                    match capture.reconfigure(&request) {
                        // Rates from the previous device no longer apply.
                        Ok(_) => fps.reset(),
                        Err(e) => warn!(
                            "failed to recreate camera (id {}, name {:?}, {}x{}): {e}",
                            request.device_id, request.device_name, request.width, request.height
                        ),
                    }
                },
            )
        };

        let transform_watch = {
            let options = Arc::clone(&options);
            config.watch(
                "camera-transform",
                vec![
                    Projection::new("mirror_x", |c: &AppConfig| c.camera.mirror_x),
                    Projection::new("mirror_y", |c: &AppConfig| c.camera.mirror_y),
                    Projection::new("rotate_ninety", |c: &AppConfig| c.camera.rotate_ninety),
                ],
                true,
                move |c: &AppConfig| options.set(TransformConfig::from(&c.camera)),
            )
        };

        Ok(Self {
            capture,
            fps,
            fps_sink,
            options,
            watches: Mutex::new(vec![device_watch, transform_watch]),
            closed: AtomicBool::new(false),
        })
    }

    pub fn register_stream(&self, sink: SinkHandle) -> std::result::Result<bool, StreamError> {
        self.capture.register_stream(sink)
    }

    pub fn unregister_stream(&self, sink: &SinkHandle) -> bool {
        self.capture.unregister_stream(sink)
    }

    /// Current frame rate of the published stream.
    pub fn get_fps(&self) -> f64 {
        self.fps.fps()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.fps.snapshot()
    }

    pub fn processing_options(&self) -> &Arc<TransformOptions> {
        &self.options
    }

    /// Attach a new preview consumer that renders with the live transform
    /// options.
    pub fn create_preview(&self) -> std::result::Result<Arc<PreviewSink>, StreamError> {
        let preview = Arc::new(PreviewSink::new(
            "preview",
            PREVIEW_CAPACITY,
            Arc::clone(&self.options),
        ));
        self.capture.register_stream(preview.clone())?;
        Ok(preview)
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn active_device(&self) -> Option<u32> {
        self.capture.active_device()
    }

    pub fn active_resolution(&self) -> Option<Resolution> {
        self.capture.active_resolution()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        self.capture.hub()
    }

    /// Detach from the configuration, drop the counter, and shut the capture
    /// loop down. The device is released before this returns. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for watch in self.watches.lock().drain(..) {
            watch.unregister();
        }
        self.capture.unregister_stream(&self.fps_sink);
        self.capture.shutdown();
        info!("camera pipeline closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::dummy::DummyBackend;
    use crate::config::types::CameraConfig;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config_with(camera: CameraConfig) -> Arc<ConfigWatcher<AppConfig>> {
        ConfigWatcher::new(AppConfig { camera })
    }

    #[test]
    fn construction_opens_configured_device() {
        let backend = DummyBackend::with_devices(vec![(0, "Cam B"), (2, "Cam A")]);
        let config = config_with(CameraConfig {
            camera_name: "Cam A".to_string(),
            width: 320,
            height: 240,
            ..CameraConfig::default()
        });

        let pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();
        assert_eq!(pipeline.active_device(), Some(2));
        assert_eq!(pipeline.active_resolution(), Some(Resolution::new(320, 240)));
        assert_eq!(config.len(), 2);
        pipeline.close();
    }

    #[test]
    fn odd_configured_dimensions_are_rounded_down() {
        let backend = DummyBackend::new();
        let config = config_with(CameraConfig {
            width: 641,
            height: 481,
            ..CameraConfig::default()
        });
        let pipeline = CameraPipeline::new(&config, Arc::new(backend)).unwrap();
        assert_eq!(pipeline.active_resolution(), Some(Resolution::new(640, 480)));
    }

    #[test]
    fn failed_open_does_not_fail_construction() {
        let backend = DummyBackend::new();
        backend.set_unavailable(0, true);
        let config = config_with(CameraConfig::default());

        let pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();
        assert_eq!(pipeline.active_device(), None);
        assert_eq!(pipeline.capture_state(), CaptureState::Idle);

        backend.set_unavailable(0, false);
        config.modify(|c| c.camera.width = 320);
        assert_eq!(pipeline.active_device(), Some(0));
    }

    #[test]
    fn transform_edits_do_not_reopen_device() {
        let backend = DummyBackend::new();
        let config = config_with(CameraConfig::default());
        let pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();
        assert_eq!(backend.open_history(), vec![0]);

        config.modify(|c| {
            c.camera.mirror_x = true;
            c.camera.rotate_ninety = true;
        });
        let options = pipeline.processing_options().get();
        assert!(options.mirror_x && options.rotate_90 && !options.mirror_y);
        assert_eq!(backend.open_history(), vec![0]);
    }

    #[test]
    fn device_edits_reopen_once_per_update() {
        let backend = DummyBackend::with_devices(vec![(0, "Cam B"), (1, "Cam A")]);
        let config = config_with(CameraConfig::default());
        let pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();

        config.modify(|c| {
            c.camera.camera_id = 1;
            c.camera.width = 320;
            c.camera.height = 240;
        });
        assert_eq!(backend.open_history(), vec![0, 1]);
        assert_eq!(pipeline.active_device(), Some(1));
        assert_eq!(backend.live_handles(), 1);
    }

    #[test]
    fn transform_options_start_from_current_config() {
        let config = config_with(CameraConfig {
            mirror_y: true,
            ..CameraConfig::default()
        });
        let pipeline = CameraPipeline::new(&config, Arc::new(DummyBackend::new())).unwrap();
        let options = pipeline.processing_options().get();
        assert!(options.mirror_y && !options.mirror_x && !options.rotate_90);
    }

    #[test]
    fn device_edit_restarts_frame_statistics() {
        let backend = DummyBackend::new().with_fps(200);
        let config = config_with(CameraConfig::default());
        let pipeline = CameraPipeline::new(&config, Arc::new(backend)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.stats().frame_count < 50 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(pipeline.stats().frame_count >= 50);

        config.modify(|c| c.camera.width = 320);
        assert!(pipeline.stats().frame_count < 50);
    }

    #[test]
    fn close_is_idempotent_and_detaches_watches() {
        let backend = DummyBackend::new();
        let config = config_with(CameraConfig::default());
        let pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();

        pipeline.close();
        pipeline.close();
        assert!(pipeline.is_closed());
        assert!(config.is_empty());
        assert_eq!(backend.live_handles(), 0);
        assert_eq!(pipeline.capture_state(), CaptureState::Closed);

        config.modify(|c| c.camera.camera_id = 3);
        assert_eq!(backend.open_history(), vec![0]);
    }

    #[test]
    fn dropping_pipeline_releases_device() {
        let backend = DummyBackend::new();
        let config = config_with(CameraConfig::default());
        {
            let _pipeline = CameraPipeline::new(&config, Arc::new(backend.clone())).unwrap();
            assert_eq!(backend.live_handles(), 1);
        }
        assert_eq!(backend.live_handles(), 0);
        assert!(config.is_empty());
    }

    #[test]
    fn create_preview_fails_after_close() {
        let config = config_with(CameraConfig::default());
        let pipeline = CameraPipeline::new(&config, Arc::new(DummyBackend::new())).unwrap();
        assert!(pipeline.create_preview().is_ok());
        pipeline.close();
        assert!(matches!(pipeline.create_preview(), Err(StreamError::Closed)));
    }
}
