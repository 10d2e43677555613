//! Seams between the audio loop and the platform endpoint backend.

use std::sync::Arc;
use std::time::Duration;

use deskcap_core::{AudioEndpointKind, CaptureTargetInfo};

use crate::format::NativeFormat;
use crate::AudioResult;

/// One packet read from the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub frames: usize,

    /// The endpoint flagged the packet as silence; no samples were copied.
    pub silent: bool,
}

/// Wakes a loop thread blocked in [`AudioSource::wait_ready`].
pub trait WakeHandle: Send + Sync {
    fn wake(&self);
}

/// An activated audio endpoint.
///
/// Created on the caller thread, then moved to the loop thread, which is the
/// only thread that touches it afterwards. Dropping the source releases the
/// endpoint.
pub trait AudioSource: Send {
    /// The endpoint's shared-mode mix format.
    fn format(&self) -> NativeFormat;

    /// Initialises the stream with buffer-ready notifications and starts it.
    fn start(&mut self) -> AudioResult<()>;

    /// Blocks until the endpoint signals buffered data or the waker fires.
    /// Returns `false` if `timeout` passed first.
    fn wait_ready(&mut self, timeout: Duration) -> AudioResult<bool>;

    /// Copies the next pending packet into `out` (interleaved, native channel
    /// count) and releases it back to the endpoint. `None` once drained.
    fn read_packet(&mut self, out: &mut Vec<f32>) -> AudioResult<Option<PacketInfo>>;

    /// Handle other threads use to interrupt [`AudioSource::wait_ready`].
    fn waker(&self) -> Arc<dyn WakeHandle>;

    /// Stops the stream. Safe to call more than once.
    fn stop(&mut self) -> AudioResult<()>;

    /// Activates the current default endpoint of the same kind and starts a new
    /// stream on it, after the previous one reported [`AudioError::DeviceLost`].
    /// [`AudioSource::format`] then describes the new endpoint; the waker stays valid.
    ///
    /// [`AudioError::DeviceLost`]: crate::AudioError::DeviceLost
    fn reopen(&mut self) -> AudioResult<()>;
}

/// Opens audio sources. Runs on the thread that starts the pipeline.
pub trait AudioSourceFactory: Send + Sync {
    fn open(&self, endpoint: AudioEndpointKind) -> AudioResult<Box<dyn AudioSource>>;
}

/// Enumeration entries for the two capturable endpoints.
pub fn endpoint_targets() -> Vec<CaptureTargetInfo> {
    [
        (AudioEndpointKind::SystemOutput, "System Audio Output", "Desktop Audio"),
        (AudioEndpointKind::Microphone, "Microphone Input", "Microphone"),
    ]
    .into_iter()
    .map(|(kind, title, app_name)| CaptureTargetInfo {
        is_display: false,
        is_window: false,
        id: kind.target_id(),
        width: 0,
        height: 0,
        title: title.to_string(),
        app_name: app_name.to_string(),
    })
    .collect()
}
