//! Audio capture pipeline.
//!
//! Captures the default render endpoint in loopback or the default microphone
//! through event-driven WASAPI, converts packets to the requested channel count
//! and sample rate, and delivers interleaved float PCM.

mod error;
mod format;
mod pipeline;
mod remix;
mod resample;
mod source;

#[cfg(windows)]
pub mod wasapi;

pub use error::AudioError;
pub use format::{NativeFormat, SampleEncoding};
pub use pipeline::AudioPipeline;
pub use remix::{downmix_to_mono, remix};
pub use resample::RateConverter;
pub use source::{endpoint_targets, AudioSource, AudioSourceFactory, PacketInfo, WakeHandle};

#[cfg(windows)]
pub use wasapi::WasapiFactory;

#[cfg(not(windows))]
pub use unsupported::WasapiFactory;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(not(windows))]
mod unsupported {
    use deskcap_core::AudioEndpointKind;

    use crate::source::{AudioSource, AudioSourceFactory};
    use crate::{AudioError, AudioResult};

    /// Audio endpoints are only reachable on Windows.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WasapiFactory;

    impl AudioSourceFactory for WasapiFactory {
        fn open(&self, _endpoint: AudioEndpointKind) -> AudioResult<Box<dyn AudioSource>> {
            Err(AudioError::NotSupported)
        }
    }
}
