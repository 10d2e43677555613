//! deskcap application library.
//!
//! Exposes the capture session to native hosts through a C ABI and sets up
//! logging for both the ABI and the command-line front end.

mod ffi;

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use ffi::{
    createCapture, destroyCapture, enumerateCaptureTargets, startCapture, stopCapture,
    AudioChunkCallbackC, CaptureConfigC, CaptureTargetC, ExitCallbackC, StoppedCallbackC,
    TargetsCallbackC, VideoFrameCallbackC,
};

const DEFAULT_DIRECTIVES: &str =
    "deskcap=info,deskcap_lib=info,deskcap_core=info,deskcap_video=info,deskcap_audio=info,deskcap_session=info";

/// Installs the fmt subscriber, filtered by `RUST_LOG` when set. Runs at most
/// once per process and leaves an existing global subscriber in place.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
