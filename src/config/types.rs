use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Camera section of the application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: i32,
    pub height: i32,
    /// Fallback device index when `camera_name` is empty or not found.
    pub camera_id: i32,
    /// Preferred device selector.
    pub camera_name: String,
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub rotate_ninety: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            camera_id: 0,
            camera_name: String::new(),
            mirror_x: false,
            mirror_y: false,
            rotate_ninety: false,
        }
    }
}

/// Top-level configuration snapshot. Immutable once handed to a watcher;
/// edits produce a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, returning defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Device selection and frame size requested from the capture loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_id: i32,
    /// Takes priority over `device_id` when set and resolvable.
    pub device_name: Option<String>,
    pub width: i32,
    pub height: i32,
}

impl DeviceConfig {
    pub fn new(device_id: i32, width: i32, height: i32) -> Self {
        Self {
            device_id,
            device_name: None,
            width,
            height,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.device_name = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// Width and height converted for the backend, if both are positive
    /// and even.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let valid = |v: i32| v > 0 && v % 2 == 0;
        if valid(self.width) && valid(self.height) {
            Some((self.width as u32, self.height as u32))
        } else {
            None
        }
    }
}

/// Build a device request from the camera section, rounding odd
/// dimensions down to the nearest even number.
impl From<&CameraConfig> for DeviceConfig {
    fn from(camera: &CameraConfig) -> Self {
        Self::new(camera.camera_id, (camera.width / 2) * 2, (camera.height / 2) * 2)
            .with_name(camera.camera_name.clone())
    }
}

/// Presentation-time image flags. Independent of the device lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub rotate_90: bool,
}

impl TransformConfig {
    pub fn is_identity(&self) -> bool {
        !self.mirror_x && !self.mirror_y && !self.rotate_90
    }
}

impl From<&CameraConfig> for TransformConfig {
    fn from(camera: &CameraConfig) -> Self {
        Self {
            mirror_x: camera.mirror_x,
            mirror_y: camera.mirror_y,
            rotate_90: camera.rotate_ninety,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn camera_config_defaults() {
        let camera = CameraConfig::default();
        assert_eq!(camera.width, 640);
        assert_eq!(camera.height, 480);
        assert_eq!(camera.camera_id, 0);
        assert_eq!(camera.camera_name, "");
        assert!(!camera.mirror_x && !camera.mirror_y && !camera.rotate_ninety);
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let json = r#"{"camera": {"width": 1280, "camera_name": "Cam A"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 480);
        assert_eq!(config.camera.camera_name, "Cam A");
    }

    #[test]
    fn load_returns_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_parses_valid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let json = r#"{"camera":{"width":320,"height":240,"camera_id":1,"rotate_ninety":true}}"#;
        std::fs::write(&path, json).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.camera.width, 320);
        assert_eq!(config.camera.height, 240);
        assert_eq!(config.camera.camera_id, 1);
        assert!(config.camera.rotate_ninety);
    }

    #[test]
    fn load_returns_parse_error_for_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not valid json!!!").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn device_config_rounds_odd_dimensions_down() {
        let camera = CameraConfig {
            width: 639,
            height: 481,
            ..CameraConfig::default()
        };
        let device = DeviceConfig::from(&camera);
        assert_eq!(device.width, 638);
        assert_eq!(device.height, 480);
    }

    #[test]
    fn empty_camera_name_means_no_name() {
        let device = DeviceConfig::from(&CameraConfig::default());
        assert_eq!(device.device_name, None);

        let named = DeviceConfig::new(0, 640, 480).with_name("Cam A");
        assert_eq!(named.device_name.as_deref(), Some("Cam A"));
    }

    #[test]
    fn dimensions_require_positive_even_values() {
        assert_eq!(DeviceConfig::new(0, 640, 480).dimensions(), Some((640, 480)));
        assert_eq!(DeviceConfig::new(0, 639, 480).dimensions(), None);
        assert_eq!(DeviceConfig::new(0, 640, 0).dimensions(), None);
        assert_eq!(DeviceConfig::new(0, -2, 480).dimensions(), None);
    }

    #[test]
    fn transform_config_maps_rotate_ninety() {
        let camera = CameraConfig {
            rotate_ninety: true,
            ..CameraConfig::default()
        };
        let transform = TransformConfig::from(&camera);
        assert!(transform.rotate_90);
        assert!(!transform.is_identity());
        assert!(TransformConfig::default().is_identity());
    }
}
