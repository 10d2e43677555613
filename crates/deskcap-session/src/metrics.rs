//! Delivery statistics for running sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use deskcap_core::{AudioChunk, VideoFrame};

/// Point-in-time view of [`DeliveryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliverySnapshot {
    pub frames: u64,
    pub frame_bytes: u64,
    /// Frames per second since the previous report.
    pub fps: f32,
    /// Mean interval between consecutive frames over the whole run.
    pub mean_frame_interval: Option<Duration>,
    pub chunks: u64,
    pub audio_frames: u64,
    pub uptime: Duration,
}

/// Counts deliveries from both pipeline threads.
pub struct DeliveryMetrics {
    start_time: Instant,
    frames: AtomicU64,
    frame_bytes: AtomicU64,
    chunks: AtomicU64,
    audio_frames: AtomicU64,
    first_frame: RwLock<Option<Instant>>,
    last_frame: RwLock<Option<Instant>>,
    last_report: RwLock<(Instant, u64)>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            frames: AtomicU64::new(0),
            frame_bytes: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            first_frame: RwLock::new(None),
            last_frame: RwLock::new(None),
            last_report: RwLock::new((now, 0)),
        }
    }

    pub fn record_frame(&self, frame: &VideoFrame) {
        self.record_frame_at(frame.byte_length(), frame.timestamp.capture_time);
    }

    fn record_frame_at(&self, bytes: usize, at: Instant) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.frame_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.first_frame.write().get_or_insert(at);
        *self.last_frame.write() = Some(at);
    }

    pub fn record_chunk(&self, chunk: &AudioChunk) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.audio_frames
            .fetch_add(chunk.frame_count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        let now = Instant::now();
        let frames = self.frames.load(Ordering::Relaxed);

        let (last_time, last_frames) = *self.last_report.read();
        let elapsed = now.duration_since(last_time).as_secs_f32();
        let fps = if elapsed > 0.0 {
            frames.saturating_sub(last_frames) as f32 / elapsed
        } else {
            0.0
        };

        let mean_frame_interval = match (*self.first_frame.read(), *self.last_frame.read()) {
            (Some(first), Some(last)) if frames > 1 => {
                let span = last.duration_since(first);
                Some(span / (frames - 1) as u32)
            }
            _ => None,
        };

        DeliverySnapshot {
            frames,
            frame_bytes: self.frame_bytes.load(Ordering::Relaxed),
            fps,
            mean_frame_interval,
            chunks: self.chunks.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            uptime: now.duration_since(self.start_time),
        }
    }

    /// Starts a new window for the `fps` figure.
    pub fn mark_reported(&self) {
        *self.last_report.write() = (Instant::now(), self.frames.load(Ordering::Relaxed));
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}
