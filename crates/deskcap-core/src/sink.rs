//! Delivery callbacks and channel-backed sinks.
//!
//! Pipelines invoke callbacks synchronously on their loop threads. Hosts that
//! prefer to consume on their own threads can use the bounded channel sinks,
//! which drop deliveries instead of blocking a loop thread when full.

use std::sync::Arc;

use crossbeam_channel::{Receiver, TrySendError};
use tracing::{debug, trace};

use crate::media::{AudioChunk, VideoFrame};

/// Receives each compressed frame on the video loop thread.
pub type FrameCallback = Box<dyn FnMut(&VideoFrame) + Send>;

/// Receives each PCM chunk on the audio loop thread.
pub type ChunkCallback = Box<dyn FnMut(&AudioChunk) + Send>;

/// Receives error reports. May be called from either loop thread.
pub type ExitCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Channel capacity for frame sinks (small to bound latency).
pub const FRAME_CHANNEL_CAPACITY: usize = 3;

/// Channel capacity for audio sinks.
pub const AUDIO_CHANNEL_CAPACITY: usize = 8;

/// Channel capacity for exit reports.
pub const EXIT_CHANNEL_CAPACITY: usize = 32;

/// Creates a frame callback that forwards clones into a bounded channel.
pub fn frame_channel(capacity: usize) -> (FrameCallback, Receiver<VideoFrame>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let callback: FrameCallback = Box::new(move |frame: &VideoFrame| {
        match tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                trace!(sequence = frame.sequence, "Frame channel full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Frame channel disconnected");
            }
        }
    });
    (callback, rx)
}

/// Creates a chunk callback that forwards clones into a bounded channel.
pub fn chunk_channel(capacity: usize) -> (ChunkCallback, Receiver<AudioChunk>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let callback: ChunkCallback = Box::new(move |chunk: &AudioChunk| {
        match tx.try_send(chunk.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                trace!(sequence = chunk.sequence, "Audio channel full, dropping chunk");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Audio channel disconnected");
            }
        }
    });
    (callback, rx)
}

/// Creates an exit callback that forwards messages into a bounded channel.
pub fn exit_channel(capacity: usize) -> (ExitCallback, Receiver<String>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let callback: ExitCallback = Arc::new(move |message: &str| {
        if let Err(TrySendError::Full(message)) = tx.try_send(message.to_string()) {
            trace!(%message, "Exit channel full, dropping report");
        }
    });
    (callback, rx)
}
