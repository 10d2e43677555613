//! Media payloads delivered to the host.

use bytes::Bytes;
use std::time::Instant;

/// Timestamp for a delivered frame or audio chunk.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic time of capture.
    pub capture_time: Instant,

    /// Presentation timestamp in 100ns units, relative to the session clock.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// Monotonic origin shared by the pipelines of one session, so audio and video
/// timestamps are comparable.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn now(&self) -> CaptureTimestamp {
        self.at(Instant::now())
    }

    pub fn at(&self, capture_time: Instant) -> CaptureTimestamp {
        let elapsed = capture_time.saturating_duration_since(self.origin);
        CaptureTimestamp {
            capture_time,
            pts_100ns: (elapsed.as_nanos() / 100) as u64,
        }
    }
}

/// Encoding of a delivered video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
}

impl FrameFormat {
    /// Format tag reported to hosts.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
        }
    }
}

/// A compressed video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Compressed image bytes.
    pub data: Bytes,

    pub width: u32,
    pub height: u32,

    /// Row stride of the source pixel buffer, in bytes.
    pub stride: u32,

    pub format: FrameFormat,
    pub timestamp: CaptureTimestamp,

    /// Monotonically increasing per pipeline run.
    pub sequence: u64,
}

impl VideoFrame {
    pub fn byte_length(&self) -> usize {
        self.data.len()
    }
}

/// A block of interleaved 32-bit float PCM.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved samples, `frame_count * channels` long.
    pub samples: Vec<f32>,

    pub channels: u16,
    pub sample_rate: u32,
    pub frame_count: usize,
    pub timestamp: CaptureTimestamp,

    /// Monotonically increasing per pipeline run.
    pub sequence: u64,
}

impl AudioChunk {
    /// Duration covered by the chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }
}
