//! Endpoint mix formats.

use crate::error::AudioError;
use crate::AudioResult;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub(crate) const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const SUBTYPE_PCM: u128 = 0x00000001_0000_0010_8000_00aa00389b71;
const SUBTYPE_IEEE_FLOAT: u128 = 0x00000003_0000_0010_8000_00aa00389b71;

/// Sample encoding reported by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Float,
    Pcm,
    Unknown,
}

/// The shared-mode format an endpoint delivers packets in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,

    /// Raw format tag, kept for diagnostics.
    pub format_tag: u16,
}

impl SampleEncoding {
    /// Classifies a wave format tag. Extensible formats carry the real encoding
    /// in their sub-format GUID.
    pub fn from_wave_tag(format_tag: u16, sub_format: Option<u128>) -> Self {
        match (format_tag, sub_format) {
            (WAVE_FORMAT_IEEE_FLOAT, _) => Self::Float,
            (WAVE_FORMAT_PCM, _) => Self::Pcm,
            (WAVE_FORMAT_EXTENSIBLE, Some(SUBTYPE_IEEE_FLOAT)) => Self::Float,
            (WAVE_FORMAT_EXTENSIBLE, Some(SUBTYPE_PCM)) => Self::Pcm,
            _ => Self::Unknown,
        }
    }
}

impl NativeFormat {
    /// Interleaved 32-bit float at the given rate and channel count.
    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
            format_tag: WAVE_FORMAT_IEEE_FLOAT,
        }
    }

    /// Packets are only consumed as interleaved 32-bit float.
    pub fn ensure_float32(&self) -> AudioResult<()> {
        if self.encoding == SampleEncoding::Float && self.bits_per_sample == 32 {
            return Ok(());
        }
        Err(AudioError::FormatNotSupported(format!(
            "expected 32-bit float, endpoint uses {:?} with tag {:#06x} at {} bits",
            self.encoding, self.format_tag, self.bits_per_sample
        )))
    }
}
