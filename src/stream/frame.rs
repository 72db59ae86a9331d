use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::camera::types::RawFrame;

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed on a process-wide monotonic clock.
pub fn monotonic_ns() -> u64 {
    let origin = CLOCK_ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as u64
}

/// One captured image plus its capture timestamp.
///
/// Published frames travel as [`SharedFrame`], so every consumer reads the
/// same allocation and nobody can mutate it after publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEnvelope {
    /// Pixel payload (opaque to the capture and fan-out path).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel for packed payloads.
    pub channels: u32,
    /// Capture time from [`monotonic_ns`].
    pub captured_at_ns: u64,
}

/// Reference-counted frame handed to consumers.
pub type SharedFrame = Arc<FrameEnvelope>;

impl FrameEnvelope {
    /// Stamp a freshly read frame with the current monotonic time.
    pub fn stamp(raw: RawFrame) -> Self {
        Self {
            data: raw.data,
            width: raw.width,
            height: raw.height,
            channels: raw.channels,
            captured_at_ns: monotonic_ns(),
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload is a tightly packed `width * height * channels` image.
    pub fn is_packed(&self) -> bool {
        self.channels > 0
            && self.data.len() == self.width as usize * self.height as usize * self.channels as usize
    }
}
