use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::camera::backend::{CameraBackend, CameraDevice};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::Resolution;
use crate::config::types::DeviceConfig;
use crate::stream::frame::FrameEnvelope;
use crate::stream::hub::{BroadcastHub, SinkHandle, StreamError};

/// Longest a single device read may block.
pub const READ_BUDGET: Duration = Duration::from_millis(100);

/// Sleep between attempts when there is no device or a read failed.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Consecutive read failures before the loop logs at `warn`.
const FAILURE_WARN_THRESHOLD: u32 = 50;

/// Lifecycle of a [`CaptureLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    /// No device handle is open.
    Idle,
    /// A first device is being opened, or is open but has not produced a frame.
    Opening,
    /// Frames are being read and published.
    Streaming,
    /// A previously open device is being swapped for another.
    Reopening,
    /// Terminal. The device is released and the hub is closed.
    Closed,
}

/// State shared between the controlling handle and the capture thread.
struct Shared {
    label: String,
    backend: Arc<dyn CameraBackend>,
    /// The only hardware handle. Read under this lock, published after it.
    device: Mutex<Option<Box<dyn CameraDevice>>>,
    state: Mutex<CaptureState>,
    active: Mutex<Option<(u32, Resolution)>>,
    /// Bumped under the `device` lock whenever the handle is swapped.
    generation: AtomicU64,
    shutdown: AtomicBool,
    hub: Arc<BroadcastHub>,
}

impl Shared {
    fn set_state(&self, next: CaptureState) {
        let mut state = self.state.lock();
        if *state != CaptureState::Closed && *state != next {
            debug!("capture '{}' {:?} -> {:?}", self.label, *state, next);
            *state = next;
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Dedicated capture thread that owns one hot-swappable device handle and
/// publishes every frame it reads into a [`BroadcastHub`].
pub struct CaptureLoop {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn new(label: impl Into<String>, backend: Arc<dyn CameraBackend>) -> Self {
        let label = label.into();
        Self {
            shared: Arc::new(Shared {
                hub: Arc::new(BroadcastHub::new(format!("{label}-hub"))),
                label,
                backend,
                device: Mutex::new(None),
                state: Mutex::new(CaptureState::Idle),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the capture thread and return immediately.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if self.shared.is_shut_down() {
            return Err(CameraError::Closed);
        }
        if thread.is_some() {
            return Err(CameraError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.shared.label))
            .spawn(move || {
                info!("capture thread starting for '{}'", shared.label);
                run_capture(&shared);
                info!("capture thread exiting for '{}'", shared.label);
            })?;
        *thread = Some(handle);

        let mut state = self.shared.state.lock();
        if *state == CaptureState::Idle {
            *state = CaptureState::Opening;
        }
        Ok(())
    }

    /// Swap the device handle for the one described by `request`.
    ///
    /// Invalid dimensions or a negative fallback id are rejected before the
    /// current device is touched. Otherwise the old handle is released first;
    /// if the new one cannot be opened the loop is left without a device.
    pub fn reconfigure(&self, request: &DeviceConfig) -> Result<Resolution> {
        if self.shared.is_shut_down() {
            return Err(CameraError::Closed);
        }
        let Some((width, height)) = request.dimensions() else {
            return Err(CameraError::InvalidParameter(format!(
                "width and height must be positive and even, got {}x{}",
                request.width, request.height
            )));
        };
        let index = self.resolve_index(request)?;

        let mut device = self.shared.device.lock();
        if self.shared.is_shut_down() {
            return Err(CameraError::Closed);
        }

        self.shared.set_state(if device.is_some() {
            CaptureState::Reopening
        } else {
            CaptureState::Opening
        });
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(mut old) = device.take() {
            let old_index = old.index();
            if let Err(e) = old.release() {
                warn!("failed to release device {old_index}: {e}");
            }
        }
        *self.shared.active.lock() = None;

        match self.open_device(index, width, height) {
            Ok((handle, applied)) => {
                *device = Some(handle);
                *self.shared.active.lock() = Some((index, applied));
                info!("opened device {index} at {applied} (requested {width}x{height})");
                Ok(applied)
            }
            Err(e) => {
                self.shared.set_state(CaptureState::Idle);
                warn!("failed to open device {index} at {width}x{height}: {e}");
                Err(e)
            }
        }
    }

    fn resolve_index(&self, request: &DeviceConfig) -> Result<u32> {
        if let Some(name) = &request.device_name {
            match self.shared.backend.resolve_device_by_name(name) {
                Ok(Some(index)) => return Ok(index),
                Ok(None) => warn!(
                    "camera '{name}' not found, falling back to device {}",
                    request.device_id
                ),
                Err(e) => warn!(
                    "resolving camera '{name}' failed ({e}), falling back to device {}",
                    request.device_id
                ),
            }
        }
        u32::try_from(request.device_id).map_err(|_| {
            CameraError::InvalidParameter(format!(
                "device id must be non-negative, got {}",
                request.device_id
            ))
        })
    }

    fn open_device(
        &self,
        index: u32,
        width: u32,
        height: u32,
    ) -> Result<(Box<dyn CameraDevice>, Resolution)> {
        let mut handle = self.shared.backend.open(index)?;
        match handle.set_resolution(width, height) {
            Ok(applied) => Ok((handle, applied)),
            Err(e) => {
                if let Err(release_err) = handle.release() {
                    warn!("failed to release device {index} after setup error: {release_err}");
                }
                Err(e)
            }
        }
    }

    /// Stop the thread, release the device and close the hub. Idempotent.
    ///
    /// A failing hardware release is logged; the hub is closed regardless.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut device) = self.shared.device.lock().take() {
            let index = device.index();
            if let Err(e) = device.release() {
                error!("failed to release device {index} during shutdown: {e}");
            }
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("capture thread for '{}' panicked", self.shared.label);
            }
        }

        *self.shared.active.lock() = None;
        *self.shared.state.lock() = CaptureState::Closed;
        self.shared.hub.close();
        info!("capture '{}' shut down", self.shared.label);
    }

    pub fn register_stream(&self, sink: SinkHandle) -> std::result::Result<bool, StreamError> {
        self.shared.hub.register(sink)
    }

    pub fn unregister_stream(&self, sink: &SinkHandle) -> bool {
        self.shared.hub.unregister(sink)
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.shared.hub
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    /// Size applied by the backend to the open device.
    pub fn active_resolution(&self) -> Option<Resolution> {
        self.shared.active.lock().map(|(_, resolution)| resolution)
    }

    /// Index of the open device.
    pub fn active_device(&self) -> Option<u32> {
        self.shared.active.lock().map(|(index, _)| index)
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some() && !self.shared.is_shut_down()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Consecutive read failures for the handle currently installed.
#[derive(Debug, Default)]
struct FailureStreak {
    count: u32,
    generation: u64,
}

impl FailureStreak {
    /// Forget the streak when the handle has been swapped since the last read.
    fn track(&mut self, generation: u64) {
        if generation != self.generation {
            self.generation = generation;
            self.count = 0;
        }
    }

    /// Count a failed read and return the new streak length.
    fn fail(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// End the streak; returns its length if it had crossed the warn threshold.
    fn recover(&mut self) -> Option<u32> {
        let count = std::mem::take(&mut self.count);
        (count >= FAILURE_WARN_THRESHOLD).then_some(count)
    }
}

fn run_capture(shared: &Shared) {
    let mut streak = FailureStreak {
        count: 0,
        generation: shared.generation.load(Ordering::Acquire),
    };

    while !shared.is_shut_down() {
        // State changes are decided under the device lock so a concurrent
        // `reconfigure` always has the last word.
        let outcome = {
            let mut device = shared.device.lock();
            streak.track(shared.generation.load(Ordering::Acquire));
            device.as_mut().map(|d| {
                let index = d.index();
                let read = d.read_frame(READ_BUDGET).map(FrameEnvelope::stamp);
                if read.is_ok() {
                    shared.set_state(CaptureState::Streaming);
                }
                (index, read)
            })
        };

        match outcome {
            Some((index, Ok(frame))) => {
                if let Some(failures) = streak.recover() {
                    info!("device {index} recovered after {failures} failed reads");
                }
                shared.hub.publish(Arc::new(frame));
            }
            Some((index, Err(e))) => {
                let failures = streak.fail();
                if failures == FAILURE_WARN_THRESHOLD {
                    warn!("device {index}: {failures} consecutive read failures, last: {e}");
                } else {
                    debug!("device {index} read failed: {e}");
                }
                std::thread::sleep(IDLE_BACKOFF);
            }
            None => std::thread::sleep(IDLE_BACKOFF),
        }
    }
}
