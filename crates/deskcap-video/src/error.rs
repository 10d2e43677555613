//! Error types for the video pipeline.

use deskcap_core::CoreError;
use thiserror::Error;

/// Errors that can occur during video capture.
#[derive(Debug, Error)]
pub enum VideoError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The requested display or window does not exist.
    #[error("Capture target not found: {0}")]
    TargetNotFound(String),

    /// The target exists but has nothing to capture (minimised, off-screen).
    #[error("Capture target has no visible area: {0}")]
    EmptyTarget(String),

    /// No graphics device could be created.
    #[error("Failed to create graphics device: {0}")]
    DeviceCreation(String),

    /// Binding desktop duplication to the output failed.
    #[error("Failed to duplicate output: {0}")]
    Duplication(String),

    /// Reading back the staging surface failed.
    #[error("Staging surface error: {0}")]
    Staging(String),

    /// Frame compression failed.
    #[error("Frame encoding error: {0}")]
    Encode(String),

    /// The duplicated output went away (mode change, secure desktop, device removal).
    #[error("Capture source lost: {0}")]
    SourceLost(String),

    /// Pipeline already running.
    #[error("Video capture already started")]
    AlreadyStarted,

    /// Desktop duplication is not available on this platform.
    #[error("Desktop duplication not supported on this platform")]
    NotSupported,

    /// The loop thread could not enter the component runtime.
    #[error(transparent)]
    Runtime(#[from] CoreError),

    /// The loop thread could not be spawned or died during start-up.
    #[error("Video capture thread failed: {0}")]
    Thread(String),
}

impl VideoError {
    /// Fatal errors end the capture loop; everything else is reported and retried
    /// on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Runtime(_))
    }

    /// The source must be rebound before it can deliver again.
    pub fn is_source_lost(&self) -> bool {
        matches!(self, Self::SourceLost(_))
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for VideoError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_loss_is_recoverable() {
        let lost = VideoError::SourceLost("access lost".to_string());
        assert!(lost.is_source_lost());
        assert!(!lost.is_fatal());

        assert!(!VideoError::Staging("map failed".to_string()).is_source_lost());
        let runtime = CoreError::RuntimeUnavailable("no apartment".to_string());
        assert!(VideoError::Runtime(runtime).is_fatal());
    }
}
