//! C ABI for native hosts.
//!
//! Every exported function catches panics; nothing unwinds into the host.
//! Callbacks run on the pipeline threads and receive the host's context
//! pointer unchanged.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use tracing::{error, info, warn};

use deskcap_core::{
    AudioChunk, AudioEndpointKind, CaptureConfiguration, CaptureTargetInfo, ChunkCallback,
    ExitCallback, FrameCallback, FrameFormat, QualityTier, TargetFilter, TargetSelector,
    VideoFrame,
};
use deskcap_session::{CaptureSession, SessionCallbacks};

use crate::init_logging;

/// `(data, width, height, stride, timestamp_ms, format_tag, byte_length, user)`
pub type VideoFrameCallbackC = Option<
    unsafe extern "C" fn(*const u8, i32, i32, i32, i64, *const c_char, usize, *mut c_void),
>;

/// `(channels, sample_rate, samples, frame_count, user)`
pub type AudioChunkCallbackC = Option<unsafe extern "C" fn(i32, i32, *const f32, i32, *mut c_void)>;

/// `(message, user)`
pub type ExitCallbackC = Option<unsafe extern "C" fn(*const c_char, *mut c_void)>;

/// `(user)`
pub type StoppedCallbackC = Option<unsafe extern "C" fn(*mut c_void)>;

/// `(targets, count, error, user)`; `error` is null on success.
pub type TargetsCallbackC =
    Option<unsafe extern "C" fn(*const CaptureTargetC, i32, *const c_char, *mut c_void)>;

/// Capture configuration as passed by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfigC {
    /// 1-based display; 100 and 101 select audio-only system output and
    /// microphone capture.
    pub display_id: u32,
    /// Native window handle; takes precedence over `display_id` when non-zero.
    pub window_id: u64,
    /// Audio endpoint for visual targets: 0 = system output, 1 = microphone.
    pub audio_source: i32,
    /// Zero disables video.
    pub frame_rate: f32,
    pub audio_channels: i32,
    pub audio_sample_rate: i32,
    /// 0 = high, 1 = medium, 2 = low.
    pub quality: i32,
    /// Non-zero when the host already initialised the component runtime.
    pub host_owns_runtime: i32,
}

impl CaptureConfigC {
    pub fn to_configuration(&self) -> CaptureConfiguration {
        let system = AudioEndpointKind::SystemOutput;
        let microphone = AudioEndpointKind::Microphone;

        let target = if self.window_id != 0 {
            TargetSelector::Window(self.window_id)
        } else if u64::from(self.display_id) == system.target_id() {
            TargetSelector::AudioEndpoint(system)
        } else if u64::from(self.display_id) == microphone.target_id() {
            TargetSelector::AudioEndpoint(microphone)
        } else {
            TargetSelector::Display(self.display_id)
        };

        let audio_endpoint = match self.audio_source {
            1 => microphone,
            _ => system,
        };

        let quality = QualityTier::from_index(self.quality).unwrap_or_else(|| {
            warn!(quality = self.quality, "Unknown quality index, using high");
            QualityTier::High
        });

        CaptureConfiguration {
            target,
            audio_endpoint,
            frame_rate: self.frame_rate,
            audio_channels: u16::try_from(self.audio_channels).unwrap_or(0),
            audio_sample_rate: u32::try_from(self.audio_sample_rate).unwrap_or(0),
            quality,
            host_owns_runtime: self.host_owns_runtime != 0,
        }
    }
}

/// One enumerated target. Strings stay valid for the duration of the callback.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CaptureTargetC {
    pub is_display: i32,
    pub is_window: i32,
    pub id: u64,
    pub width: i32,
    pub height: i32,
    pub title: *const c_char,
    pub app_name: *const c_char,
}

/// Owns the strings a batch of [`CaptureTargetC`] points into.
struct TargetBatch {
    _strings: Vec<CString>,
    entries: Vec<CaptureTargetC>,
}

impl TargetBatch {
    fn new(targets: &[CaptureTargetInfo]) -> Self {
        let mut strings = Vec::with_capacity(targets.len() * 2);
        let mut entries = Vec::with_capacity(targets.len());
        for target in targets {
            let title = c_string(&target.title);
            let app_name = c_string(&target.app_name);
            // The heap buffers do not move when the CStrings move into `strings`.
            entries.push(CaptureTargetC {
                is_display: target.is_display as i32,
                is_window: target.is_window as i32,
                id: target.id,
                width: target.width as i32,
                height: target.height as i32,
                title: title.as_ptr(),
                app_name: app_name.as_ptr(),
            });
            strings.push(title);
            strings.push(app_name);
        }
        Self {
            _strings: strings,
            entries,
        }
    }
}

/// Host context pointer, handed back verbatim on every callback.
#[derive(Clone, Copy)]
struct UserContext(*mut c_void);

// SAFETY: the pointer is never dereferenced here; the host is responsible for
// making its context usable from the pipeline threads.
unsafe impl Send for UserContext {}
unsafe impl Sync for UserContext {}

impl UserContext {
    // Closures calling this capture the whole wrapper, not the raw field.
    fn ptr(self) -> *mut c_void {
        self.0
    }
}

struct CaptureHandle {
    session: CaptureSession,
}

fn c_string(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

fn format_tag(format: FrameFormat) -> &'static CStr {
    match format {
        FrameFormat::Jpeg => c"jpeg",
    }
}

fn exit_callback(on_exit: ExitCallbackC, user: UserContext) -> ExitCallback {
    Arc::new(move |message: &str| {
        if let Some(callback) = on_exit {
            let message = c_string(message);
            unsafe { callback(message.as_ptr(), user.ptr()) };
        }
    })
}

fn frame_callback(on_frame: VideoFrameCallbackC, user: UserContext) -> Option<FrameCallback> {
    let callback = on_frame?;
    Some(Box::new(move |frame: &VideoFrame| unsafe {
        callback(
            frame.data.as_ptr(),
            frame.width as i32,
            frame.height as i32,
            frame.stride as i32,
            frame.timestamp.pts_ms() as i64,
            format_tag(frame.format).as_ptr(),
            frame.byte_length(),
            user.ptr(),
        )
    }))
}

fn chunk_callback(on_chunk: AudioChunkCallbackC, user: UserContext) -> Option<ChunkCallback> {
    let callback = on_chunk?;
    Some(Box::new(move |chunk: &AudioChunk| unsafe {
        callback(
            i32::from(chunk.channels),
            chunk.sample_rate as i32,
            chunk.samples.as_ptr(),
            chunk.frame_count as i32,
            user.ptr(),
        )
    }))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Creates a capture handle. Release it with [`destroyCapture`].
#[no_mangle]
pub extern "C" fn createCapture() -> *mut c_void {
    init_logging();
    match panic::catch_unwind(|| {
        Box::new(CaptureHandle {
            session: CaptureSession::new(),
        })
    }) {
        Ok(handle) => Box::into_raw(handle) as *mut c_void,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "createCapture panicked");
            ptr::null_mut()
        }
    }
}

/// Stops any running capture and frees the handle. Null is ignored.
///
/// # Safety
/// `handle` must come from [`createCapture`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn destroyCapture(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    let handle = Box::from_raw(handle as *mut CaptureHandle);
    if panic::catch_unwind(AssertUnwindSafe(move || drop(handle))).is_err() {
        error!("destroyCapture panicked");
    }
}

/// Starts capturing. On failure `on_exit` is called once with the reason and
/// `false` is returned.
///
/// # Safety
/// `handle` must come from [`createCapture`]. The callbacks must stay callable
/// with `user` until [`stopCapture`] or [`destroyCapture`] returns.
#[no_mangle]
pub unsafe extern "C" fn startCapture(
    handle: *mut c_void,
    config: CaptureConfigC,
    on_video: VideoFrameCallbackC,
    on_audio: AudioChunkCallbackC,
    on_exit: ExitCallbackC,
    user: *mut c_void,
) -> bool {
    let user = UserContext(user);
    let report = exit_callback(on_exit, user);

    let Some(handle) = (handle as *const CaptureHandle).as_ref() else {
        report("Invalid capture handle");
        return false;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let configuration = config.to_configuration();
        handle.session.start(
            &configuration,
            SessionCallbacks {
                on_video: frame_callback(on_video, user),
                on_audio: chunk_callback(on_audio, user),
                on_exit: Arc::clone(&report),
            },
        )
    }));

    match result {
        Ok(Ok(started)) => {
            info!(video = started.video, audio = started.audio, "Capture started");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Capture failed to start");
            report(&e.to_string());
            false
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "startCapture panicked");
            report(&format!("Capture start panicked: {message}"));
            false
        }
    }
}

/// Stops capturing and then calls `on_stopped` once, whether or not a capture
/// was running.
///
/// # Safety
/// `handle` must come from [`createCapture`] or be null.
#[no_mangle]
pub unsafe extern "C" fn stopCapture(
    handle: *mut c_void,
    on_stopped: StoppedCallbackC,
    user: *mut c_void,
) {
    if let Some(handle) = (handle as *const CaptureHandle).as_ref() {
        if panic::catch_unwind(AssertUnwindSafe(|| handle.session.stop(|| {}))).is_err() {
            error!("stopCapture panicked");
        }
    }
    if let Some(callback) = on_stopped {
        callback(user);
    }
}

/// Lists capture targets. `filter` is 0 (all), 1 (displays) or 2 (windows).
/// `on_result` is called exactly once.
///
/// # Safety
/// `on_result` must be callable with `user`.
#[no_mangle]
pub unsafe extern "C" fn enumerateCaptureTargets(
    filter: i32,
    on_result: TargetsCallbackC,
    user: *mut c_void,
) {
    init_logging();
    let Some(callback) = on_result else {
        return;
    };

    let result = panic::catch_unwind(|| {
        let filter = TargetFilter::from_index(filter)
            .ok_or_else(|| format!("Unknown target filter {filter}"))?;
        CaptureSession::new()
            .enumerate_targets(filter)
            .map_err(|e| e.to_string())
    });

    let targets = match result {
        Ok(targets) => targets,
        Err(payload) => Err(format!(
            "Target enumeration panicked: {}",
            panic_message(payload.as_ref())
        )),
    };

    match targets {
        Ok(targets) => {
            let batch = TargetBatch::new(&targets);
            callback(
                batch.entries.as_ptr(),
                batch.entries.len() as i32,
                ptr::null(),
                user,
            );
        }
        Err(message) => {
            warn!(%message, "Target enumeration failed");
            let message = c_string(&message);
            callback(ptr::null(), 0, message.as_ptr(), user);
        }
    }
}
