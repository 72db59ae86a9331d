use std::time::Duration;

use crate::camera::error::Result;
use crate::camera::types::{DeviceInfo, RawFrame, Resolution};

/// Platform-agnostic camera backend trait.
///
/// Implemented per-platform or by the synthetic `DummyBackend`. Provides
/// device enumeration, name resolution and opening of device handles. Any
/// probing state a backend keeps (for example a latch that disables a
/// failing name lookup) belongs to the backend value itself.
pub trait CameraBackend: Send + Sync {
    /// Enumerate all currently connected devices, ordered by index.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Find the index of the device whose name matches exactly.
    fn resolve_device_by_name(&self, name: &str) -> Result<Option<u32>> {
        Ok(self
            .enumerate_devices()?
            .into_iter()
            .find(|d| d.name == name)
            .map(|d| d.index))
    }

    /// Open a handle to the device at `index`.
    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>>;
}

/// An open hardware handle.
///
/// Owned by exactly one capture loop at a time; callers serialise access.
pub trait CameraDevice: Send {
    /// Index this handle was opened with.
    fn index(&self) -> u32;

    /// Apply the requested frame size. Returns the size the device will
    /// actually deliver, which may be clamped.
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<Resolution>;

    /// Block for at most `budget` waiting for the next frame.
    fn read_frame(&mut self, budget: Duration) -> Result<RawFrame>;

    /// Release the hardware. Calling it again is a no-op.
    fn release(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::error::CameraError;

    /// Mock backend for testing trait contract.
    struct MockBackend {
        devices: Vec<DeviceInfo>,
    }

    impl CameraBackend for MockBackend {
        fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.devices.clone())
        }

        fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>> {
            Err(CameraError::DeviceNotFound(index.to_string()))
        }
    }

    struct FailingEnumeration;

    impl CameraBackend for FailingEnumeration {
        fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
            Err(CameraError::Enumeration("device manager unavailable".into()))
        }

        fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>> {
            Err(CameraError::DeviceNotFound(index.to_string()))
        }
    }

    fn mock() -> MockBackend {
        MockBackend {
            devices: vec![
                DeviceInfo {
                    index: 0,
                    name: "Integrated".to_string(),
                },
                DeviceInfo {
                    index: 2,
                    name: "Cam A".to_string(),
                },
            ],
        }
    }

    #[test]
    fn resolve_by_name_finds_matching_index() {
        let backend = mock();
        assert_eq!(backend.resolve_device_by_name("Cam A").unwrap(), Some(2));
        assert_eq!(backend.resolve_device_by_name("Integrated").unwrap(), Some(0));
    }

    #[test]
    fn resolve_by_name_requires_exact_match() {
        let backend = mock();
        assert_eq!(backend.resolve_device_by_name("cam a").unwrap(), None);
        assert_eq!(backend.resolve_device_by_name("Cam").unwrap(), None);
    }

    #[test]
    fn resolve_by_name_propagates_enumeration_failure() {
        let result = FailingEnumeration.resolve_device_by_name("Cam A");
        assert!(matches!(result, Err(CameraError::Enumeration(_))));
    }

    #[test]
    fn trait_object_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Box<dyn CameraBackend>>();
    }

    #[test]
    fn device_trait_object_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn CameraDevice>>();
    }
}
