//! Shared types for the deskcap capture pipelines.
//!
//! This crate holds what the video pipeline, the audio pipeline and the
//! session orchestrator agree on: configuration, targets, delivered media,
//! pipeline states, delivery callbacks and the component runtime context.

mod config;
mod context;
mod error;
mod media;
mod runtime;
mod sink;
mod state;
mod target;

pub use config::{AudioEndpointKind, CaptureConfiguration, QualityTier, TargetSelector};
pub use context::PipelineContext;
pub use error::CoreError;
pub use media::{AudioChunk, CaptureTimestamp, FrameFormat, SessionClock, VideoFrame};
pub use runtime::{ApartmentMode, RuntimeContext, RuntimeGuard};
pub use sink::{
    chunk_channel, exit_channel, frame_channel, ChunkCallback, ExitCallback, FrameCallback,
    AUDIO_CHANNEL_CAPACITY, EXIT_CHANNEL_CAPACITY, FRAME_CHANNEL_CAPACITY,
};
pub use state::{PipelineState, SessionState, StateCell};
pub use target::{CaptureTarget, CaptureTargetInfo, Region, TargetFilter, TargetId};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
