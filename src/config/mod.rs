pub mod types;
pub mod watcher;

pub use types::{AppConfig, CameraConfig, ConfigError, DeviceConfig, TransformConfig};
pub use watcher::{ConfigWatcher, Projection, WatchHandle};
