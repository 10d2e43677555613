//! Capture session orchestration.
//!
//! A [`CaptureSession`] owns an optional video pipeline and an optional audio
//! pipeline, starts whichever the caller asked for and guarantees both threads
//! have joined once it stops or is dropped.

mod backend;
mod error;
mod metrics;
mod session;

pub use backend::{CaptureBackend, PlatformBackend};
pub use error::SessionError;
pub use metrics::{DeliveryMetrics, DeliverySnapshot};
pub use session::{CaptureSession, SessionCallbacks, StartedPipelines};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
