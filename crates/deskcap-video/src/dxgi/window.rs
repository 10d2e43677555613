//! Top-level window enumeration and resolution.

use std::ffi::c_void;
use std::path::Path;

use tracing::{debug, instrument};
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM, RECT};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowLongW, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, GWL_EXSTYLE,
    WS_EX_TOOLWINDOW,
};

use deskcap_core::CaptureTargetInfo;

use super::output::wide_to_string;
use crate::error::VideoError;
use crate::VideoResult;

/// Windows smaller than this in either dimension are not listed.
const MIN_WINDOW_SIZE: u32 = 50;

/// Window information for capture.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub handle: u64,
    pub title: String,
    pub app_name: String,

    /// Desktop coordinates (left, top, right, bottom).
    pub bounds: (i32, i32, i32, i32),
}

impl WindowInfo {
    pub fn width(&self) -> u32 {
        (self.bounds.2 - self.bounds.0).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bounds.3 - self.bounds.1).max(0) as u32
    }

    pub fn to_target_info(&self) -> CaptureTargetInfo {
        CaptureTargetInfo {
            is_display: false,
            is_window: true,
            id: self.handle,
            width: self.width(),
            height: self.height(),
            title: self.title.clone(),
            app_name: self.app_name.clone(),
        }
    }
}

/// Enumerate visible, titled, non-tool windows.
#[instrument(name = "enumerate_windows")]
pub fn enumerate_windows() -> VideoResult<Vec<WindowInfo>> {
    let mut windows: Vec<WindowInfo> = Vec::new();

    unsafe {
        EnumWindows(
            Some(enum_window_callback),
            LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
        )
        .map_err(|e| VideoError::WindowsApi {
            message: "Failed to enumerate windows".to_string(),
            source: Some(e),
        })?;
    }

    debug!(count = windows.len(), "Enumerated windows");
    Ok(windows)
}

unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL::from(true);
    }

    if (GetWindowLongW(hwnd, GWL_EXSTYLE) as u32) & WS_EX_TOOLWINDOW.0 != 0 {
        return BOOL::from(true);
    }

    let Some(title) = window_title(hwnd) else {
        return BOOL::from(true);
    };

    let Some(bounds) = window_bounds(hwnd) else {
        return BOOL::from(true);
    };

    let info = WindowInfo {
        handle: hwnd.0 as usize as u64,
        title,
        app_name: process_name(hwnd).unwrap_or_default(),
        bounds,
    };

    if info.width() < MIN_WINDOW_SIZE || info.height() < MIN_WINDOW_SIZE {
        return BOOL::from(true);
    }

    windows.push(info);
    BOOL::from(true)
}

/// Looks up a window by handle and reports its current desktop rectangle.
pub fn window_rect(handle: u64) -> VideoResult<(i32, i32, i32, i32)> {
    let hwnd = HWND(handle as usize as *mut c_void);
    unsafe {
        if handle == 0 || !IsWindow(hwnd).as_bool() {
            return Err(VideoError::TargetNotFound(format!("window {handle:#x}")));
        }
        if IsIconic(hwnd).as_bool() {
            return Err(VideoError::EmptyTarget(format!(
                "window {handle:#x} is minimised"
            )));
        }
        window_bounds(hwnd)
            .ok_or_else(|| VideoError::EmptyTarget(format!("window {handle:#x} has no area")))
    }
}

unsafe fn window_title(hwnd: HWND) -> Option<String> {
    let length = GetWindowTextLengthW(hwnd);
    if length == 0 {
        return None;
    }

    let mut buffer: Vec<u16> = vec![0; (length + 1) as usize];
    let copied = GetWindowTextW(hwnd, &mut buffer);
    if copied == 0 {
        return None;
    }

    let title = String::from_utf16_lossy(&buffer[..copied as usize]);
    if title.trim().is_empty() {
        None
    } else {
        Some(title)
    }
}

unsafe fn window_bounds(hwnd: HWND) -> Option<(i32, i32, i32, i32)> {
    let mut rect = RECT::default();
    GetWindowRect(hwnd, &mut rect).ok()?;
    if rect.right <= rect.left || rect.bottom <= rect.top {
        return None;
    }
    Some((rect.left, rect.top, rect.right, rect.bottom))
}

unsafe fn process_name(hwnd: HWND) -> Option<String> {
    let mut process_id: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut process_id));
    if process_id == 0 {
        return None;
    }

    let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), process_id).ok()?;
    let mut buffer = [0u16; 1024];
    let mut size = buffer.len() as u32;
    let queried = QueryFullProcessImageNameW(
        process,
        PROCESS_NAME_WIN32,
        PWSTR(buffer.as_mut_ptr()),
        &mut size,
    );
    let _ = CloseHandle(process);
    queried.ok()?;

    let path = wide_to_string(&buffer[..size as usize]);
    Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
