use std::sync::Arc;

use tracing::debug;

use crate::pipeline::transform::{apply_transform, TransformOptions};
use crate::stream::frame::{FrameEnvelope, SharedFrame};
use crate::stream::hub::{FrameSink, SinkError};
use crate::stream::ring::FrameRing;

/// Preview consumer: buffers the newest frames without blocking the hub and
/// hands them out with the current presentation transform applied.
pub struct PreviewSink {
    ring: FrameRing,
    options: Arc<TransformOptions>,
}

impl PreviewSink {
    pub fn new(label: impl Into<String>, capacity: usize, options: Arc<TransformOptions>) -> Self {
        Self {
            ring: FrameRing::new(label, capacity),
            options,
        }
    }

    /// The newest frame, transformed for display.
    pub fn latest(&self) -> Option<FrameEnvelope> {
        let frame = self.ring.latest()?;
        let transformed = apply_transform(&frame, self.options.get());
        if transformed.is_none() {
            debug!(
                "preview '{}' skipped unpacked {}x{} frame",
                self.ring.label(),
                frame.width,
                frame.height
            );
        }
        transformed
    }

    /// The newest frame exactly as published.
    pub fn latest_raw(&self) -> Option<SharedFrame> {
        self.ring.latest()
    }

    /// Number of frames received so far.
    pub fn sequence(&self) -> u64 {
        self.ring.sequence()
    }
}

impl FrameSink for PreviewSink {
    fn deliver(&self, frame: &SharedFrame) -> Result<(), SinkError> {
        self.ring.deliver(frame)
    }

    fn close(&self) {
        self.ring.close();
    }

    fn label(&self) -> &str {
        self.ring.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TransformConfig;

    fn frame() -> SharedFrame {
        Arc::new(FrameEnvelope {
            data: vec![1, 2, 3, 4],
            width: 2,
            height: 2,
            channels: 1,
            captured_at_ns: 0,
        })
    }

    #[test]
    fn latest_applies_current_options() {
        let options = Arc::new(TransformOptions::default());
        let preview = PreviewSink::new("preview", 2, Arc::clone(&options));
        preview.deliver(&frame()).unwrap();

        assert_eq!(preview.latest().unwrap().data, vec![1, 2, 3, 4]);

        options.set(TransformConfig {
            mirror_x: true,
            ..TransformConfig::default()
        });
        assert_eq!(preview.latest().unwrap().data, vec![2, 1, 4, 3]);
        assert_eq!(preview.latest_raw().unwrap().data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn empty_preview_has_no_frame() {
        let preview = PreviewSink::new("preview", 2, Arc::default());
        assert!(preview.latest().is_none());
        assert_eq!(preview.sequence(), 0);
    }

    #[test]
    fn closed_preview_refuses_frames() {
        let preview = PreviewSink::new("preview", 2, Arc::default());
        FrameSink::close(&preview);
        assert!(matches!(preview.deliver(&frame()), Err(SinkError::Closed)));
        assert!(preview.latest().is_none());
    }
}
