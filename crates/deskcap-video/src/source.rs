//! Seams between the capture loop and the platform duplication backend.

use std::time::Duration;

use deskcap_core::CaptureTarget;
use tracing::{debug, warn};

use crate::pixels::PixelBuffer;
use crate::VideoResult;

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A new desktop image was copied into the staging surface.
    Acquired,

    /// Nothing changed on screen within the timeout.
    TimedOut,
}

/// A bound duplication source for one target.
///
/// Implementations own the graphics device, the duplication interface and the
/// CPU-readable staging surface. They are created on the caller thread and then
/// moved to the loop thread, which is the only thread that touches them.
pub trait FrameSource: Send {
    /// Size of the captured region.
    fn dimensions(&self) -> (u32, u32);

    /// Waits up to `timeout` for a new desktop image and, if one arrives, copies
    /// the target region into the staging surface and releases the image.
    fn acquire(&mut self, timeout: Duration) -> VideoResult<FrameStatus>;

    /// Maps the staging surface and copies its rows into `dst`.
    fn read_staging(&mut self, dst: &mut PixelBuffer) -> VideoResult<()>;

    /// Re-creates the duplication after [`VideoError::SourceLost`]. The staging
    /// surface keeps the last image. Called on the loop thread until it succeeds.
    ///
    /// [`VideoError::SourceLost`]: crate::VideoError::SourceLost
    fn rebind(&mut self) -> VideoResult<()>;
}

/// Opens frame sources. Runs on the thread that starts the pipeline.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, target: &CaptureTarget) -> VideoResult<Box<dyn FrameSource>>;
}

/// Graphics driver flavours, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Hardware,
    Software,
}

impl DriverKind {
    pub const PREFERENCE: [DriverKind; 2] = [DriverKind::Hardware, DriverKind::Software];

    pub fn name(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Software => "software",
        }
    }
}

/// Runs `create` for each driver kind in preference order and returns the first
/// success, or the last failure.
pub fn with_driver_fallback<T, F>(mut create: F) -> VideoResult<(T, DriverKind)>
where
    F: FnMut(DriverKind) -> VideoResult<T>,
{
    let mut last_error = None;
    for kind in DriverKind::PREFERENCE {
        match create(kind) {
            Ok(value) => {
                debug!(driver = kind.name(), "Created graphics device");
                return Ok((value, kind));
            }
            Err(e) => {
                warn!(driver = kind.name(), error = %e, "Graphics device creation failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or(crate::VideoError::NotSupported))
}
