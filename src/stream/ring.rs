use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::stream::frame::SharedFrame;
use crate::stream::hub::{FrameSink, SinkError};

/// Thread-safe ring buffer for published frames.
///
/// Stores up to `capacity` frames, overwriting the oldest when full. As a
/// [`FrameSink`] it never blocks the producer, which makes it the usual
/// adapter between the hub and a consumer that polls at its own pace.
pub struct FrameRing {
    label: String,
    slots: Mutex<RingSlots>,
    capacity: usize,
    /// Monotonic counter incremented on each push. Used for change
    /// detection even when frame timestamps repeat.
    sequence: AtomicU64,
    closed: AtomicBool,
}

struct RingSlots {
    frames: Vec<Option<SharedFrame>>,
    write_idx: usize,
}

impl FrameRing {
    /// Create a new ring buffer with the given capacity (at least one).
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            label: label.into(),
            slots: Mutex::new(RingSlots {
                frames: (0..capacity).map(|_| None).collect(),
                write_idx: 0,
            }),
            capacity,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a frame, overwriting the oldest if full.
    pub fn push(&self, frame: SharedFrame) {
        let mut slots = self.slots.lock();
        let idx = slots.write_idx;
        slots.frames[idx] = Some(frame);
        slots.write_idx = (idx + 1) % self.capacity;
        self.sequence.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the monotonic sequence number. Increases by 1 for each
    /// pushed frame.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Get the most recently pushed frame, if any.
    pub fn latest(&self) -> Option<SharedFrame> {
        let slots = self.slots.lock();
        let latest_idx = if slots.write_idx == 0 {
            self.capacity - 1
        } else {
            slots.write_idx - 1
        };
        slots.frames[latest_idx].clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every held frame.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.frames.iter_mut().for_each(|slot| *slot = None);
        slots.write_idx = 0;
    }
}

impl FrameSink for FrameRing {
    fn deliver(&self, frame: &SharedFrame) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        self.push(Arc::clone(frame));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }

    fn label(&self) -> &str {
        &self.label
    }
}
