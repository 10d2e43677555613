//! Platform seams the session drives its pipelines through.

use deskcap_audio::{endpoint_targets, AudioSourceFactory, WasapiFactory};
use deskcap_core::{CaptureTarget, CaptureTargetInfo, TargetFilter, TargetSelector};
use deskcap_video::{DuplicationFactory, FrameSourceFactory, VideoResult};

/// Resolves targets and opens sources for a session.
pub trait CaptureBackend: Send + Sync {
    /// Maps a display or window selector to a concrete capture region.
    fn resolve_target(&self, selector: &TargetSelector) -> VideoResult<CaptureTarget>;

    fn video_factory(&self) -> &dyn FrameSourceFactory;

    fn audio_factory(&self) -> &dyn AudioSourceFactory;

    /// Lists capturable displays, windows and audio endpoints.
    fn enumerate_targets(&self, filter: TargetFilter) -> VideoResult<Vec<CaptureTargetInfo>>;
}

/// DXGI desktop duplication plus WASAPI. Every operation fails with
/// `NotSupported` off Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBackend {
    video: DuplicationFactory,
    audio: WasapiFactory,
}

impl CaptureBackend for PlatformBackend {
    fn resolve_target(&self, selector: &TargetSelector) -> VideoResult<CaptureTarget> {
        deskcap_video::resolve_target(selector)
    }

    fn video_factory(&self) -> &dyn FrameSourceFactory {
        &self.video
    }

    fn audio_factory(&self) -> &dyn AudioSourceFactory {
        &self.audio
    }

    fn enumerate_targets(&self, filter: TargetFilter) -> VideoResult<Vec<CaptureTargetInfo>> {
        let mut targets = deskcap_video::enumerate_targets(filter)?;
        if filter.includes_audio() {
            targets.extend(endpoint_targets());
        }
        Ok(targets)
    }
}
