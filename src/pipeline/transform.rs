use parking_lot::RwLock;

use crate::config::types::TransformConfig;
use crate::stream::frame::FrameEnvelope;

/// Presentation-time flags shared between the config watcher, which writes
/// them, and preview consumers, which read them per frame.
#[derive(Debug, Default)]
pub struct TransformOptions {
    current: RwLock<TransformConfig>,
}

impl TransformOptions {
    pub fn new(initial: TransformConfig) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> TransformConfig {
        *self.current.read()
    }

    pub fn set(&self, next: TransformConfig) {
        *self.current.write() = next;
    }
}

/// Apply `transform` to a packed frame.
///
/// Mirroring is applied first (`mirror_x` flips columns, `mirror_y` flips
/// rows), then `rotate_90` turns the image clockwise, swapping width and
/// height. Returns `None` when the payload is not a packed
/// `width * height * channels` image.
pub fn apply_transform(frame: &FrameEnvelope, transform: TransformConfig) -> Option<FrameEnvelope> {
    if !frame.is_packed() {
        return None;
    }
    if transform.is_identity() {
        return Some(frame.clone());
    }

    let w = frame.width as usize;
    let h = frame.height as usize;
    let c = frame.channels as usize;
    let (out_w, out_h) = if transform.rotate_90 { (h, w) } else { (w, h) };

    let mut data = Vec::with_capacity(frame.data.len());
    for oy in 0..out_h {
        for ox in 0..out_w {
            let (mx, my) = if transform.rotate_90 {
                (oy, h - 1 - ox)
            } else {
                (ox, oy)
            };
            let sx = if transform.mirror_x { w - 1 - mx } else { mx };
            let sy = if transform.mirror_y { h - 1 - my } else { my };
            let start = (sy * w + sx) * c;
            data.extend_from_slice(&frame.data[start..start + c]);
        }
    }

    Some(FrameEnvelope {
        data,
        width: out_w as u32,
        height: out_h as u32,
        channels: frame.channels,
        captured_at_ns: frame.captured_at_ns,
    })
}
