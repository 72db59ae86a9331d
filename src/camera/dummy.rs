use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::camera::backend::{CameraBackend, CameraDevice};
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{DeviceInfo, RawFrame, Resolution};

const DUMMY_DEVICE_NAME: &str = "Dummy Test Camera";
const DEFAULT_FPS: u32 = 30;
const CHANNELS: u32 = 3;

/// Shared between the backend and every handle it opens, so tests can
/// inject failures and observe handle lifetimes.
struct DummyInner {
    devices: Vec<DeviceInfo>,
    fps: u32,
    max_resolution: Resolution,
    unavailable: Mutex<HashSet<u32>>,
    fail_reads: AtomicBool,
    fail_release: AtomicBool,
    open_history: Mutex<Vec<u32>>,
    live_handles: AtomicUsize,
}

/// A fake camera backend for running without real hardware.
///
/// Produces synthetic packed 3-channel frames paced at a fixed rate. Each
/// frame's bytes all carry the low byte of the frame sequence number, so
/// consumers can tell frames apart.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
#[derive(Clone)]
pub struct DummyBackend {
    inner: Arc<DummyInner>,
}

impl DummyBackend {
    /// Create a backend with a single device at index 0.
    pub fn new() -> Self {
        Self::with_devices(vec![(0, DUMMY_DEVICE_NAME)])
    }

    /// Create a backend exposing the given `(index, name)` devices.
    pub fn with_devices<S: Into<String>>(devices: Vec<(u32, S)>) -> Self {
        let mut devices: Vec<DeviceInfo> = devices
            .into_iter()
            .map(|(index, name)| DeviceInfo {
                index,
                name: name.into(),
            })
            .collect();
        devices.sort_by_key(|d| d.index);
        Self::build(devices, DEFAULT_FPS, Resolution::new(1920, 1080))
    }

    /// Change the frame pacing. Must be called before any device is opened.
    pub fn with_fps(self, fps: u32) -> Self {
        let devices = self.inner.devices.clone();
        Self::build(devices, fps.max(1), self.inner.max_resolution)
    }

    /// Change the largest size the devices will deliver.
    pub fn with_max_resolution(self, max: Resolution) -> Self {
        let devices = self.inner.devices.clone();
        Self::build(devices, self.inner.fps, max)
    }

    fn build(devices: Vec<DeviceInfo>, fps: u32, max_resolution: Resolution) -> Self {
        Self {
            inner: Arc::new(DummyInner {
                devices,
                fps,
                max_resolution,
                unavailable: Mutex::new(HashSet::new()),
                fail_reads: AtomicBool::new(false),
                fail_release: AtomicBool::new(false),
                open_history: Mutex::new(Vec::new()),
                live_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether the dummy camera is enabled via environment variable.
    pub fn is_enabled() -> bool {
        std::env::var("DUMMY_CAMERA").is_ok_and(|v| v == "1" || v == "true")
    }

    /// Make `open(index)` fail as if the device were busy or unplugged.
    pub fn set_unavailable(&self, index: u32, unavailable: bool) {
        let mut set = self.inner.unavailable.lock();
        if unavailable {
            set.insert(index);
        } else {
            set.remove(&index);
        }
    }

    /// Make every read on open handles fail.
    pub fn set_read_failures(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make `release()` report an error (the handle is still released).
    pub fn set_release_failure(&self, fail: bool) {
        self.inner.fail_release.store(fail, Ordering::Relaxed);
    }

    /// Indices passed to successful `open` calls, in order.
    pub fn open_history(&self) -> Vec<u32> {
        self.inner.open_history.lock().clone()
    }

    /// Number of handles opened and not yet released.
    pub fn live_handles(&self) -> usize {
        self.inner.live_handles.load(Ordering::SeqCst)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.inner.devices.clone())
    }

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>> {
        if !self.inner.devices.iter().any(|d| d.index == index) {
            return Err(CameraError::DeviceNotFound(index.to_string()));
        }
        if self.inner.unavailable.lock().contains(&index) {
            return Err(CameraError::DeviceOpen {
                index,
                reason: "device is in use".to_string(),
            });
        }

        self.inner.open_history.lock().push(index);
        self.inner.live_handles.fetch_add(1, Ordering::SeqCst);

        let default = Resolution::new(640, 480).clamp_to(self.inner.max_resolution);
        Ok(Box::new(DummyDevice {
            index,
            resolution: default,
            frame_interval: Duration::from_secs(1) / self.inner.fps,
            next_due: Instant::now(),
            sequence: 0,
            released: false,
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Handle returned by `DummyBackend::open`.
struct DummyDevice {
    index: u32,
    resolution: Resolution,
    frame_interval: Duration,
    next_due: Instant,
    sequence: u64,
    released: bool,
    inner: Arc<DummyInner>,
}

impl DummyDevice {
    fn mark_released(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.live_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl CameraDevice for DummyDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<Resolution> {
        if self.released {
            return Err(CameraError::Closed);
        }
        self.resolution = Resolution::new(width, height).clamp_to(self.inner.max_resolution);
        Ok(self.resolution)
    }

    fn read_frame(&mut self, budget: Duration) -> Result<RawFrame> {
        if self.released {
            return Err(CameraError::Read("device released".to_string()));
        }
        if self.inner.fail_reads.load(Ordering::Relaxed) {
            std::thread::sleep(budget.min(Duration::from_millis(2)));
            return Err(CameraError::Read("injected read failure".to_string()));
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > budget {
                std::thread::sleep(budget);
                return Err(CameraError::Read("timed out waiting for frame".to_string()));
            }
            std::thread::sleep(wait);
        }
        self.next_due = Instant::now() + self.frame_interval;

        let Resolution { width, height } = self.resolution;
        let len = width as usize * height as usize * CHANNELS as usize;
        let frame = RawFrame {
            data: vec![self.sequence as u8; len],
            width,
            height,
            channels: CHANNELS,
        };
        self.sequence += 1;
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        let was_released = self.released;
        self.mark_released();
        if !was_released && self.inner.fail_release.load(Ordering::Relaxed) {
            return Err(CameraError::Release(format!(
                "device {} refused to release",
                self.index
            )));
        }
        Ok(())
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        self.mark_released();
    }
}
