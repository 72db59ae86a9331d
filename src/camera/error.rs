use thiserror::Error;

/// Camera subsystem errors.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to open device {index}: {reason}")]
    DeviceOpen { index: u32, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("device release failed: {0}")]
    Release(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("capture loop is already running")]
    AlreadyRunning,

    #[error("capture loop is closed")]
    Closed,

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_open_message_names_the_index() {
        let err = CameraError::DeviceOpen {
            index: 3,
            reason: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "failed to open device 3: busy");
    }

    #[test]
    fn spawn_error_converts_from_io_error() {
        let io = std::io::Error::other("no threads");
        let err: CameraError = io.into();
        assert!(matches!(err, CameraError::Spawn(_)));
        assert!(err.to_string().contains("no threads"));
    }
}
