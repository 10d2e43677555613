//! Error types for the audio pipeline.

use deskcap_core::CoreError;
use thiserror::Error;

/// Errors that can occur during audio capture.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Rejected channel count or sample rate.
    #[error("{0}")]
    InvalidConfig(String),

    /// No endpoint of the requested kind.
    #[error("Audio endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The endpoint's shared-mode format is not 32-bit float.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// Sample-rate converter construction or processing failed.
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Reading a packet from the endpoint failed.
    #[error("Audio packet error: {0}")]
    Packet(String),

    /// Waiting for the buffer-ready notification failed.
    #[error("Audio notification wait failed: {0}")]
    Notification(String),

    /// The endpoint was removed or invalidated.
    #[error("Audio device lost")]
    DeviceLost,

    /// Pipeline already running.
    #[error("Audio capture already started")]
    AlreadyStarted,

    /// WASAPI capture is not available on this platform.
    #[error("Audio capture not supported on this platform")]
    NotSupported,

    /// The loop thread could not enter the component runtime.
    #[error(transparent)]
    Runtime(#[from] CoreError),

    /// The loop thread could not be spawned or died during start-up.
    #[error("Audio capture thread failed: {0}")]
    Thread(String),
}

impl AudioError {
    /// Fatal errors end the capture loop; packet-level errors are reported and
    /// the loop goes back to waiting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Notification(_) | Self::FormatNotSupported(_) | Self::Runtime(_)
        )
    }

    /// The endpoint went away and has to be reopened before capture resumes.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for AudioError {
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
    fn test_device_loss_is_recoverable() {
        assert!(AudioError::DeviceLost.is_device_lost());
        assert!(!AudioError::DeviceLost.is_fatal());
        assert!(!AudioError::Packet("buffer unavailable".to_string()).is_fatal());
        assert!(AudioError::FormatNotSupported("16-bit pcm".to_string()).is_fatal());
        assert!(AudioError::Notification("wait failed".to_string()).is_fatal());
    }
}
