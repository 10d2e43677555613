//! Windows desktop duplication backend.

mod device;
mod duplication;
mod output;
mod window;

use deskcap_core::{
    CaptureTarget, CaptureTargetInfo, Region, TargetFilter, TargetId, TargetSelector,
};
use tracing::{debug, instrument};

pub use duplication::DuplicationSource;
pub use output::{enumerate_outputs, find_output, OutputInfo};
pub use window::{enumerate_windows, WindowInfo};

use crate::error::VideoError;
use crate::source::{FrameSource, FrameSourceFactory};
use crate::VideoResult;

/// Opens [`DuplicationSource`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicationFactory;

impl FrameSourceFactory for DuplicationFactory {
    fn open(&self, target: &CaptureTarget) -> VideoResult<Box<dyn FrameSource>> {
        let output = enumerate_outputs()?
            .into_iter()
            .find(|o| o.index == target.output_index)
            .ok_or_else(|| {
                VideoError::TargetNotFound(format!("output {}", target.output_index))
            })?;
        Ok(Box::new(DuplicationSource::open(&output, target.region)?))
    }
}

/// Resolves a selector against the current desktop layout.
#[instrument(name = "resolve_target")]
pub fn resolve_target(selector: &TargetSelector) -> VideoResult<CaptureTarget> {
    let target = match *selector {
        TargetSelector::Display(id) => {
            let output = find_output(id)?;
            CaptureTarget {
                id: TargetId::Display(output.display_id()),
                output_index: output.index,
                region: Region::new(0, 0, output.width(), output.height()),
            }
        }
        TargetSelector::Window(handle) => {
            let rect = window::window_rect(handle)?;
            let center = ((rect.0 + rect.2) / 2, (rect.1 + rect.3) / 2);
            let output = enumerate_outputs()?
                .into_iter()
                .find(|o| o.contains(center.0, center.1))
                .ok_or_else(|| {
                    VideoError::EmptyTarget(format!("window {handle:#x} is off-screen"))
                })?;
            let region = Region::clip_to_output(rect, output.bounds);
            if region.is_empty() {
                return Err(VideoError::EmptyTarget(format!(
                    "window {handle:#x} has no visible area"
                )));
            }
            CaptureTarget {
                id: TargetId::Window(handle),
                output_index: output.index,
                region,
            }
        }
        TargetSelector::AudioEndpoint(kind) => {
            return Err(VideoError::TargetNotFound(format!(
                "{} is not a visual target",
                kind.name()
            )))
        }
    };

    debug!(?target, "Resolved capture target");
    Ok(target)
}

/// Lists displays and windows matching `filter`.
pub fn enumerate_targets(filter: TargetFilter) -> VideoResult<Vec<CaptureTargetInfo>> {
    let mut targets = Vec::new();
    if filter.includes_displays() {
        targets.extend(enumerate_outputs()?.iter().map(OutputInfo::to_target_info));
    }
    if filter.includes_windows() {
        targets.extend(enumerate_windows()?.iter().map(WindowInfo::to_target_info));
    }
    Ok(targets)
}
