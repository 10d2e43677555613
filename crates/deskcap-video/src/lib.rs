//! Paced desktop capture with JPEG frame delivery.
//!
//! The [`VideoPipeline`] binds a [`FrameSource`] for a display or window on the
//! caller thread, then runs a loop thread that acquires, stages, compresses and
//! delivers frames at the configured rate. On Windows the source is backed by
//! DXGI desktop duplication.

mod encode;
mod error;
mod pacing;
mod pipeline;
mod pixels;
mod source;

#[cfg(windows)]
pub mod dxgi;

pub use encode::JpegCompressor;
pub use error::VideoError;
pub use pacing::{
    acquire_timeout, frame_interval, should_force_refresh, FramePacer, DEFAULT_FRAME_RATE,
};
pub use pipeline::VideoPipeline;
pub use pixels::{PixelBuffer, BYTES_PER_PIXEL};
pub use source::{with_driver_fallback, DriverKind, FrameSource, FrameSourceFactory, FrameStatus};

#[cfg(windows)]
pub use dxgi::{enumerate_targets, resolve_target, DuplicationFactory};

/// Result type for video operations.
pub type VideoResult<T> = Result<T, VideoError>;

#[cfg(not(windows))]
mod unsupported {
    use deskcap_core::{CaptureTarget, CaptureTargetInfo, TargetFilter, TargetSelector};

    use crate::error::VideoError;
    use crate::source::{FrameSource, FrameSourceFactory};
    use crate::VideoResult;

    /// Desktop duplication is Windows-only.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct DuplicationFactory;

    impl FrameSourceFactory for DuplicationFactory {
        fn open(&self, _target: &CaptureTarget) -> VideoResult<Box<dyn FrameSource>> {
            Err(VideoError::NotSupported)
        }
    }

    pub fn resolve_target(_selector: &TargetSelector) -> VideoResult<CaptureTarget> {
        Err(VideoError::NotSupported)
    }

    pub fn enumerate_targets(_filter: TargetFilter) -> VideoResult<Vec<CaptureTargetInfo>> {
        Err(VideoError::NotSupported)
    }
}

#[cfg(not(windows))]
pub use unsupported::{enumerate_targets, resolve_target, DuplicationFactory};
