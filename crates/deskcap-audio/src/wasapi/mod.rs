//! WASAPI backend.

mod capture;
mod device;

pub use capture::WasapiSource;
pub use device::default_endpoint;

use deskcap_core::AudioEndpointKind;

use crate::source::{AudioSource, AudioSourceFactory};
use crate::AudioResult;

/// Opens the default endpoint of each kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiFactory;

impl AudioSourceFactory for WasapiFactory {
    fn open(&self, endpoint: AudioEndpointKind) -> AudioResult<Box<dyn AudioSource>> {
        Ok(Box::new(WasapiSource::open(endpoint)?))
    }
}
