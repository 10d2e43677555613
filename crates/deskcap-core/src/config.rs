//! Capture configuration shared by both pipelines.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::CoreResult;

/// Audio endpoint captured by the audio pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEndpointKind {
    /// Loopback capture of the default render endpoint.
    #[default]
    SystemOutput,

    /// Default capture endpoint.
    Microphone,
}

impl AudioEndpointKind {
    /// Stable identifier used by target enumeration.
    pub fn target_id(self) -> u64 {
        match self {
            Self::SystemOutput => 100,
            Self::Microphone => 101,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SystemOutput => "system_output",
            Self::Microphone => "microphone",
        }
    }
}

/// What the session captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum TargetSelector {
    /// A display output, 1-based. Zero selects the first output.
    Display(u32),

    /// A top-level window, identified by its native handle value.
    Window(u64),

    /// No visual target; audio only from the given endpoint.
    AudioEndpoint(AudioEndpointKind),
}

impl TargetSelector {
    /// Returns true if the selector names something the video pipeline can capture.
    pub fn is_visual(&self) -> bool {
        matches!(self, Self::Display(_) | Self::Window(_))
    }
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::Display(1)
    }
}

/// Compression quality tier for delivered frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    High,
    Medium,
    Low,
}

impl QualityTier {
    /// Encoder quality on a 0-100 scale.
    pub fn encoder_quality(self) -> u8 {
        match self {
            Self::High => 95,
            Self::Medium => 85,
            Self::Low => 75,
        }
    }

    /// Maps the ABI quality index (0 = high, 1 = medium, 2 = low).
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::High),
            1 => Some(Self::Medium),
            2 => Some(Self::Low),
            _ => None,
        }
    }
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Capture target.
    pub target: TargetSelector,

    /// Audio endpoint used when the target is visual.
    pub audio_endpoint: AudioEndpointKind,

    /// Frames per second. Zero disables video in a session.
    pub frame_rate: f32,

    /// Requested output channel count (1 or 2).
    pub audio_channels: u16,

    /// Requested output sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Frame compression quality.
    pub quality: QualityTier,

    /// The host has already set up the platform component runtime on its threads.
    pub host_owns_runtime: bool,
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            target: TargetSelector::default(),
            audio_endpoint: AudioEndpointKind::default(),
            frame_rate: 30.0,
            audio_channels: 2,
            audio_sample_rate: 48_000,
            quality: QualityTier::default(),
            host_owns_runtime: false,
        }
    }
}

impl CaptureConfiguration {
    /// Endpoint the audio pipeline should open.
    pub fn effective_audio_endpoint(&self) -> AudioEndpointKind {
        match self.target {
            TargetSelector::AudioEndpoint(kind) => kind,
            _ => self.audio_endpoint,
        }
    }

    /// Whether a session should start video for this configuration.
    pub fn wants_video(&self) -> bool {
        self.target.is_visual() && self.frame_rate.is_finite() && self.frame_rate > 0.0
    }

    /// Rejects audio settings the pipeline cannot produce.
    pub fn validate_audio(&self) -> CoreResult<()> {
        if !(1..=2).contains(&self.audio_channels) {
            return Err(CoreError::InvalidConfig(format!(
                "Unsupported value {} for audio channels, only 1-2 channels supported",
                self.audio_channels
            )));
        }
        if self.audio_sample_rate == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "Invalid sample rate: {}",
                self.audio_sample_rate
            )));
        }
        Ok(())
    }
}
