//! Display output enumeration.

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIAdapter, IDXGIFactory1, IDXGIOutput,
};
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, HMONITOR, MONITORINFO};

use deskcap_core::CaptureTargetInfo;

use crate::error::VideoError;
use crate::VideoResult;

/// An output attached to the desktop.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    /// Zero-based index across all adapters. Display ids are this plus one.
    pub index: u32,

    /// Adapter that drives the output.
    pub adapter: IDXGIAdapter,

    pub output: IDXGIOutput,

    /// GDI device name, e.g. `\\.\DISPLAY1`.
    pub name: String,

    /// Desktop coordinates (left, top, right, bottom).
    pub bounds: (i32, i32, i32, i32),

    pub is_primary: bool,
}

impl OutputInfo {
    pub fn display_id(&self) -> u32 {
        self.index + 1
    }

    pub fn width(&self) -> u32 {
        (self.bounds.2 - self.bounds.0).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bounds.3 - self.bounds.1).max(0) as u32
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.bounds.0 && x < self.bounds.2 && y >= self.bounds.1 && y < self.bounds.3
    }

    pub fn to_target_info(&self) -> CaptureTargetInfo {
        CaptureTargetInfo {
            is_display: true,
            is_window: false,
            id: self.display_id() as u64,
            width: self.width(),
            height: self.height(),
            title: if self.is_primary {
                format!("Display {} (Primary)", self.display_id())
            } else {
                format!("Display {}", self.display_id())
            },
            app_name: "Screen".to_string(),
        }
    }
}

/// Enumerate outputs attached to the desktop, adapter by adapter.
#[instrument(name = "enumerate_outputs")]
pub fn enumerate_outputs() -> VideoResult<Vec<OutputInfo>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1()? };
    let mut outputs = Vec::new();

    let mut adapter_index = 0;
    while let Ok(adapter) = unsafe { factory.EnumAdapters1(adapter_index) } {
        adapter_index += 1;
        let adapter: IDXGIAdapter = adapter.cast()?;

        let mut output_index = 0;
        while let Ok(output) = unsafe { adapter.EnumOutputs(output_index) } {
            output_index += 1;

            let desc = unsafe { output.GetDesc()? };
            if !desc.AttachedToDesktop.as_bool() {
                continue;
            }

            let rect = desc.DesktopCoordinates;
            outputs.push(OutputInfo {
                index: outputs.len() as u32,
                adapter: adapter.clone(),
                output,
                name: wide_to_string(&desc.DeviceName),
                bounds: (rect.left, rect.top, rect.right, rect.bottom),
                is_primary: is_primary_monitor(desc.Monitor),
            });
        }
    }

    debug!(count = outputs.len(), "Enumerated outputs");
    Ok(outputs)
}

/// Find an output by display id. Zero selects the first output.
pub fn find_output(display_id: u32) -> VideoResult<OutputInfo> {
    let index = display_id.saturating_sub(1);
    enumerate_outputs()?
        .into_iter()
        .find(|o| o.index == index)
        .ok_or_else(|| VideoError::TargetNotFound(format!("display {display_id}")))
}

fn is_primary_monitor(monitor: HMONITOR) -> bool {
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    // MONITORINFOF_PRIMARY
    unsafe { GetMonitorInfoW(monitor, &mut info).as_bool() && (info.dwFlags & 1) != 0 }
}

pub(crate) fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}
