//! Error types for capture sessions.

use deskcap_audio::AudioError;
use deskcap_video::VideoError;
use thiserror::Error;

/// Errors returned synchronously by [`crate::CaptureSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Capture already in progress")]
    AlreadyCapturing,

    /// Neither a usable video request nor an audio callback was given.
    #[error("Nothing to capture: no video or audio pipeline was requested")]
    NothingToCapture,

    /// Every requested pipeline failed to start.
    #[error("Failed to start capture: {0}")]
    StartFailed(String),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Audio(#[from] AudioError),
}
