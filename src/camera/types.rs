use serde::Serialize;
use std::fmt;

/// Discovered camera device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Index passed to `CameraBackend::open`.
    pub index: u32,
    /// Human-readable device name, used for name-based selection.
    pub name: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.name)
    }
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamp to `max` on each axis, keeping both dimensions even.
    pub fn clamp_to(self, max: Resolution) -> Self {
        Self {
            width: self.width.min(max.width) & !1,
            height: self.height.min(max.height) & !1,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An undecorated frame as produced by a device read.
///
/// The capture loop stamps it into a `FrameEnvelope` before publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Pixel payload. Treated as opaque by the capture path.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel for packed payloads.
    pub channels: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_display() {
        let info = DeviceInfo {
            index: 2,
            name: "Cam A".to_string(),
        };
        assert_eq!(info.to_string(), "[2] Cam A");
    }

    #[test]
    fn device_info_serialises_to_camelcase() {
        let info = DeviceInfo {
            index: 0,
            name: "Built-in".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["index"], 0);
        assert_eq!(json["name"], "Built-in");
    }

    #[test]
    fn resolution_clamp_limits_and_keeps_even() {
        let max = Resolution::new(1279, 720);
        let clamped = Resolution::new(1920, 1080).clamp_to(max);
        assert_eq!(clamped, Resolution::new(1278, 720));

        let small = Resolution::new(640, 480).clamp_to(max);
        assert_eq!(small, Resolution::new(640, 480));
    }

    #[test]
    fn resolution_display() {
        assert_eq!(Resolution::new(640, 480).to_string(), "640x480");
    }
}
