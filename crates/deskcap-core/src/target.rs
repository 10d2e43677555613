//! Capture targets: resolved video regions and enumeration entries.

use serde::{Deserialize, Serialize};

/// Identity of a resolved visual target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetId {
    Display(u32),
    Window(u64),
}

/// A rectangle in output-local pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clips a desktop rectangle (left, top, right, bottom) against an output
    /// rectangle and returns it relative to the output origin.
    pub fn clip_to_output(rect: (i32, i32, i32, i32), output: (i32, i32, i32, i32)) -> Self {
        let left = rect.0.max(output.0);
        let top = rect.1.max(output.1);
        let right = rect.2.min(output.2);
        let bottom = rect.3.min(output.3);

        if right <= left || bottom <= top {
            return Self::default();
        }

        Self {
            x: (left - output.0) as u32,
            y: (top - output.1) as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }
}

/// A visual target resolved against the current desktop layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTarget {
    pub id: TargetId,

    /// Zero-based index of the output that shows the target.
    pub output_index: u32,

    /// Area of that output to capture.
    pub region: Region,
}

impl CaptureTarget {
    pub fn width(&self) -> u32 {
        self.region.width
    }

    pub fn height(&self) -> u32 {
        self.region.height
    }
}

/// Which kinds of targets to enumerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFilter {
    #[default]
    All,
    Displays,
    Windows,
}

impl TargetFilter {
    /// Maps the ABI filter value (0 = all, 1 = displays, 2 = windows).
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::All),
            1 => Some(Self::Displays),
            2 => Some(Self::Windows),
            _ => None,
        }
    }

    pub fn includes_displays(self) -> bool {
        matches!(self, Self::All | Self::Displays)
    }

    pub fn includes_windows(self) -> bool {
        matches!(self, Self::All | Self::Windows)
    }

    pub fn includes_audio(self) -> bool {
        matches!(self, Self::All)
    }
}

/// One entry reported by target enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTargetInfo {
    pub is_display: bool,
    pub is_window: bool,
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub app_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_window_inside_output() {
        let region = Region::clip_to_output((100, 50, 900, 650), (0, 0, 1920, 1080));
        assert_eq!(region, Region::new(100, 50, 800, 600));
    }

    #[test]
    fn test_clip_window_on_secondary_output() {
        // Output to the right of the primary, window hanging off its right edge.
        let region = Region::clip_to_output((3700, 100, 4000, 300), (1920, 0, 3840, 1080));
        assert_eq!(region, Region::new(1780, 100, 140, 200));
    }

    #[test]
    fn test_clip_disjoint_is_empty() {
        let region = Region::clip_to_output((-500, -500, -10, -10), (0, 0, 1920, 1080));
        assert!(region.is_empty());
    }

    #[test]
    fn test_filter_index() {
        assert_eq!(TargetFilter::from_index(2), Some(TargetFilter::Windows));
        assert!(TargetFilter::All.includes_audio());
        assert!(!TargetFilter::Displays.includes_windows());
        assert_eq!(TargetFilter::from_index(3), None);
    }
}
