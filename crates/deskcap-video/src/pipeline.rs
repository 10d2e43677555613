//! Paced video capture loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use deskcap_core::{
    CaptureConfiguration, CaptureTarget, FrameCallback, FrameFormat, PipelineContext,
    PipelineState, StateCell, VideoFrame,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::encode::JpegCompressor;
use crate::error::VideoError;
use crate::pacing::{acquire_timeout, frame_interval, should_force_refresh, FramePacer};
use crate::pixels::PixelBuffer;
use crate::source::{FrameSource, FrameSourceFactory, FrameStatus};
use crate::VideoResult;

/// Captures a display or window at a fixed rate and delivers JPEG frames.
pub struct VideoPipeline {
    state: StateCell,
    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl VideoPipeline {
    pub fn new() -> Self {
        Self {
            state: StateCell::new("video"),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            thread: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Binds a frame source for `target` on the calling thread, then starts the
    /// loop thread. Setup failures are returned here and nothing keeps running.
    #[instrument(name = "video_pipeline_start", skip_all, fields(target = ?target.id))]
    pub fn start(
        &mut self,
        config: &CaptureConfiguration,
        target: &CaptureTarget,
        factory: &dyn FrameSourceFactory,
        ctx: PipelineContext,
        on_frame: FrameCallback,
    ) -> VideoResult<()> {
        if !self.state.get().can_start() {
            return Err(VideoError::AlreadyStarted);
        }
        self.state.transition_to(PipelineState::Initializing);

        // Held until the loop thread has entered the runtime too, so the
        // source never outlives every apartment it was created in.
        let _runtime = match ctx.runtime.enter() {
            Ok(guard) => guard,
            Err(e) => {
                self.state.transition_to(PipelineState::Error);
                return Err(e.into());
            }
        };
        let source = match factory.open(target) {
            Ok(source) => source,
            Err(e) => {
                self.state.transition_to(PipelineState::Error);
                return Err(e);
            }
        };

        let interval = frame_interval(config.frame_rate);
        let (width, height) = source.dimensions();
        info!(
            width,
            height,
            interval_ms = interval.as_secs_f64() * 1000.0,
            quality = config.quality.encoder_quality(),
            "Starting video capture"
        );

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        self.running.store(true, Ordering::SeqCst);

        let capture = CaptureLoop {
            pixels: PixelBuffer::new(width, height),
            compressor: JpegCompressor::new(config.quality),
            source,
            interval,
            running: Arc::clone(&self.running),
            shutdown: shutdown_rx,
            state: self.state.clone(),
            ctx,
            on_frame,
            sequence: 0,
        };

        let spawned = thread::Builder::new()
            .name("deskcap-video".to_string())
            .spawn(move || {
                let _runtime = match capture.ctx.runtime.enter() {
                    Ok(guard) => guard,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                capture.state.transition_to(PipelineState::Running);
                let _ = ready_tx.send(Ok(()));
                capture.run();
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.state.transition_to(PipelineState::Error);
                return Err(VideoError::Thread(e.to_string()));
            }
        };

        let failure = match ready_rx.recv() {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(VideoError::Runtime(e)),
            Err(_) => Some(VideoError::Thread("exited during start-up".to_string())),
        };

        if let Some(e) = failure {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            self.state.transition_to(PipelineState::Error);
            return Err(e);
        }

        self.shutdown = Some(shutdown_tx);
        self.thread = Some(handle);
        Ok(())
    }

    /// Stops the loop, releases the source and then calls `on_stopped`.
    /// Calling it on a pipeline that is not running only calls `on_stopped`.
    #[instrument(name = "video_pipeline_stop", skip_all)]
    pub fn stop<F: FnOnce()>(&mut self, on_stopped: F) {
        let current = self.state.get();
        if matches!(current, PipelineState::Idle | PipelineState::Stopped) {
            on_stopped();
            return;
        }

        info!(state = current.name(), "Stopping video capture");
        self.state.transition_to(PipelineState::Stopping);
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.take();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Video capture thread panicked");
            }
        }

        self.state.transition_to(PipelineState::Stopped);
        info!("Video capture stopped");
        on_stopped();
    }
}

impl Default for VideoPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop(|| {});
    }
}

struct CaptureLoop {
    source: Box<dyn FrameSource>,
    compressor: JpegCompressor,
    pixels: PixelBuffer,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown: Receiver<()>,
    state: StateCell,
    ctx: PipelineContext,
    on_frame: FrameCallback,
    sequence: u64,
}

impl CaptureLoop {
    fn run(mut self) {
        let timeout = acquire_timeout(self.interval);
        let mut pacer = FramePacer::new(self.interval, Instant::now());
        let mut last_success = Instant::now();
        let mut rebind_pending = false;

        while self.running.load(Ordering::SeqCst) {
            let wait = pacer.schedule(Instant::now());
            if !wait.is_zero() && self.interrupted_during(wait) {
                break;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if rebind_pending {
                match self.source.rebind() {
                    Ok(()) => {
                        info!("Capture source rebound");
                        rebind_pending = false;
                        last_success = Instant::now();
                    }
                    Err(e) => {
                        debug!(error = %e, "Capture source still unavailable");
                        continue;
                    }
                }
            }

            match self.source.acquire(timeout) {
                Ok(FrameStatus::Acquired) => last_success = Instant::now(),
                Ok(FrameStatus::TimedOut) => {
                    if !should_force_refresh(last_success.elapsed(), self.interval) {
                        continue;
                    }
                    trace!("Screen static, re-delivering staged frame");
                }
                Err(e) if e.is_source_lost() => {
                    self.report(&e);
                    rebind_pending = true;
                    continue;
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => {
                    self.report(&e);
                    continue;
                }
            }

            let captured_at = Instant::now();
            if let Err(e) = self.deliver(captured_at) {
                if e.is_fatal() {
                    return self.fail(e);
                }
                self.report(&e);
            }
        }

        debug!(frames = self.sequence, "Video capture loop exited");
    }

    /// Sleeps for `wait` unless stop is requested first.
    fn interrupted_during(&self, wait: Duration) -> bool {
        !matches!(
            self.shutdown.recv_timeout(wait),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn deliver(&mut self, captured_at: Instant) -> VideoResult<()> {
        self.source.read_staging(&mut self.pixels)?;
        let data = self.compressor.compress(&self.pixels)?;

        let frame = VideoFrame {
            data,
            width: self.pixels.width(),
            height: self.pixels.height(),
            stride: self.pixels.stride() as u32,
            format: FrameFormat::Jpeg,
            timestamp: self.ctx.clock.at(captured_at),
            sequence: self.sequence,
        };
        self.sequence += 1;

        trace!(
            sequence = frame.sequence,
            bytes = frame.byte_length(),
            "Delivering frame"
        );
        (self.on_frame)(&frame);
        Ok(())
    }

    fn report(&self, e: &VideoError) {
        warn!(error = %e, "Video capture cycle failed");
        self.ctx.report(&e.to_string());
    }

    fn fail(self, e: VideoError) {
        error!(error = %e, "Video capture failed");
        self.running.store(false, Ordering::SeqCst);
        self.state.transition_to(PipelineState::Error);
        self.ctx.report(&e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskcap_core::{
        exit_channel, frame_channel, ExitCallback, Region, RuntimeContext, SessionClock, TargetId,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy)]
    enum Step {
        Frame,
        Timeout,
        Transient,
        Lost,
        /// Blocks for the whole timeout, as duplication does on a static screen.
        Stall,
    }

    struct ScriptedSource {
        script: VecDeque<Step>,
        fallback: Step,
        reads: Arc<AtomicUsize>,
        rebinds: Arc<AtomicUsize>,
        rebind_failures: usize,
        bound: bool,
    }

    impl FrameSource for ScriptedSource {
        fn dimensions(&self) -> (u32, u32) {
            (32, 24)
        }

        fn acquire(&mut self, timeout: Duration) -> VideoResult<FrameStatus> {
            assert!(self.bound, "acquire on an unbound source");
            match self.script.pop_front().unwrap_or(self.fallback) {
                Step::Frame => Ok(FrameStatus::Acquired),
                Step::Timeout => Ok(FrameStatus::TimedOut),
                Step::Transient => Err(VideoError::Staging("copy failed".to_string())),
                Step::Lost => {
                    self.bound = false;
                    Err(VideoError::SourceLost("access lost".to_string()))
                }
                Step::Stall => {
                    thread::sleep(timeout);
                    Ok(FrameStatus::TimedOut)
                }
            }
        }

        fn read_staging(&mut self, dst: &mut PixelBuffer) -> VideoResult<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let pitch = dst.stride() + 64;
            let src = vec![0x80; pitch * dst.height() as usize];
            dst.copy_rows(&src, pitch)
        }

        fn rebind(&mut self) -> VideoResult<()> {
            self.rebinds.fetch_add(1, Ordering::SeqCst);
            if self.rebind_failures > 0 {
                self.rebind_failures -= 1;
                return Err(VideoError::Duplication("secure desktop active".to_string()));
            }
            self.bound = true;
            Ok(())
        }
    }

    struct ScriptedFactory {
        script: Mutex<Option<VecDeque<Step>>>,
        fallback: Step,
        reads: Arc<AtomicUsize>,
        rebinds: Arc<AtomicUsize>,
        rebind_failures: usize,
        fail_open: bool,
    }

    impl ScriptedFactory {
        fn new(script: Vec<Step>, fallback: Step) -> Self {
            Self {
                script: Mutex::new(Some(script.into())),
                fallback,
                reads: Arc::new(AtomicUsize::new(0)),
                rebinds: Arc::new(AtomicUsize::new(0)),
                rebind_failures: 0,
                fail_open: false,
            }
        }
    }

    impl FrameSourceFactory for ScriptedFactory {
        fn open(&self, _target: &CaptureTarget) -> VideoResult<Box<dyn FrameSource>> {
            if self.fail_open {
                return Err(VideoError::Duplication("not available".to_string()));
            }
            Ok(Box::new(ScriptedSource {
                script: self.script.lock().take().unwrap_or_default(),
                fallback: self.fallback,
                reads: Arc::clone(&self.reads),
                rebinds: Arc::clone(&self.rebinds),
                rebind_failures: self.rebind_failures,
                bound: true,
            }))
        }
    }

    fn target() -> CaptureTarget {
        CaptureTarget {
            id: TargetId::Display(1),
            output_index: 0,
            region: Region::new(0, 0, 32, 24),
        }
    }

    fn config(frame_rate: f32) -> CaptureConfiguration {
        CaptureConfiguration {
            frame_rate,
            ..Default::default()
        }
    }

    fn context(on_exit: ExitCallback) -> PipelineContext {
        PipelineContext::new(RuntimeContext::new(false), SessionClock::start(), on_exit)
    }

    #[test]
    fn test_cadence_matches_frame_rate() {
        let factory = ScriptedFactory::new(vec![], Step::Frame);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, _exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(50.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        thread::sleep(Duration::from_millis(1000));
        pipeline.stop(|| {});

        let received: Vec<VideoFrame> = frames.try_iter().collect();
        assert!(received.len() >= 20, "only {} frames", received.len());

        let first = received[0].timestamp.capture_time;
        let last = received[received.len() - 1].timestamp.capture_time;
        let mean = (last - first).as_secs_f64() / (received.len() - 1) as f64;
        assert!((0.014..=0.026).contains(&mean), "mean interval {mean}");

        for (i, frame) in received.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
            assert_eq!((frame.width, frame.height, frame.stride), (32, 24, 128));
            assert_eq!(frame.format.tag(), "jpeg");
            assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        }
    }

    #[test]
    fn test_static_screen_forces_refresh() {
        let factory = ScriptedFactory::new(vec![], Step::Timeout);
        let reads = Arc::clone(&factory.reads);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, exits) = exit_channel(16);
        let ctx = context(on_exit);
        let clock = ctx.clock;
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(50.0), &target(), &factory, ctx, on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(400));
        pipeline.stop(|| {});

        let received: Vec<VideoFrame> = frames.try_iter().collect();
        assert!(received.len() >= 5, "only {} frames", received.len());
        assert_eq!(reads.load(Ordering::SeqCst), received.len());
        assert!(received[0].timestamp.pts_ms() >= 40);
        assert!(clock.origin() <= received[0].timestamp.capture_time);
        assert!(exits.try_recv().is_err());
    }

    #[test]
    fn test_recent_timeout_delivers_nothing() {
        // One real frame, then a single timeout well inside the refresh window.
        let factory = ScriptedFactory::new(vec![Step::Frame, Step::Timeout], Step::Frame);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, _exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(20.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(175));
        pipeline.stop(|| {});

        // Ticks at 0, 50, 100, 150ms: the timeout at 50ms is skipped.
        let received: Vec<VideoFrame> = frames.try_iter().collect();
        assert_eq!(received.len(), 3);
    }

    #[test]
    fn test_transient_error_reported_and_loop_continues() {
        let factory = ScriptedFactory::new(vec![Step::Frame, Step::Transient], Step::Frame);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(50.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop(|| {});

        assert!(exits.try_recv().unwrap().contains("copy failed"));
        assert!(frames.try_iter().count() >= 3);
    }

    #[test]
    fn test_source_lost_rebinds_and_resumes() {
        let mut factory = ScriptedFactory::new(vec![Step::Frame, Step::Frame, Step::Lost], Step::Frame);
        factory.rebind_failures = 2;
        let rebinds = Arc::clone(&factory.rebinds);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(50.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(1000));
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.stop(|| {});

        let message = exits.try_recv().unwrap();
        assert!(message.contains("lost"), "{message}");
        // Failed rebind attempts are retried quietly.
        assert!(exits.try_recv().is_err());
        assert_eq!(rebinds.load(Ordering::SeqCst), 3);

        let received: Vec<VideoFrame> = frames.try_iter().collect();
        assert!(received.len() >= 35, "only {} frames", received.len());
        for (i, frame) in received.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
        }
    }

    #[test]
    fn test_static_screen_keeps_frame_rate() {
        let factory = ScriptedFactory::new(vec![Step::Frame], Step::Stall);
        let (on_frame, frames) = frame_channel(256);
        let (on_exit, _exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        pipeline
            .start(&config(30.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(2000));
        pipeline.stop(|| {});

        let received: Vec<VideoFrame> = frames.try_iter().collect();
        assert!(received.len() >= 40, "only {} frames", received.len());

        // Skip the frames around the refresh threshold.
        let settled = &received[3..];
        let first = settled[0].timestamp.capture_time;
        let last = settled[settled.len() - 1].timestamp.capture_time;
        let mean = (last - first).as_secs_f64() / (settled.len() - 1) as f64;
        let target = 1.0 / 30.0;
        assert!(
            (mean - target).abs() <= target * 0.3,
            "mean interval {:.1} ms",
            mean * 1000.0
        );
    }

    #[test]
    fn test_setup_failure_is_synchronous() {
        let mut factory = ScriptedFactory::new(vec![], Step::Frame);
        factory.fail_open = true;
        let (on_frame, _frames) = frame_channel(4);
        let (on_exit, exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        let err = pipeline
            .start(&config(30.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap_err();
        assert!(matches!(err, VideoError::Duplication(_)));
        assert_eq!(pipeline.state(), PipelineState::Error);
        assert!(exits.try_recv().is_err());

        pipeline.stop(|| {});
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_double_start_rejected() {
        let factory = ScriptedFactory::new(vec![], Step::Timeout);
        let (on_exit, _exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        let (on_frame, _frames) = frame_channel(4);
        pipeline
            .start(&config(30.0), &target(), &factory, context(on_exit.clone()), on_frame)
            .unwrap();

        let (on_frame, _frames) = frame_channel(4);
        let err = pipeline
            .start(&config(30.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap_err();
        assert!(matches!(err, VideoError::AlreadyStarted));
        pipeline.stop(|| {});
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let factory = ScriptedFactory::new(vec![], Step::Timeout);
        let (on_frame, _frames) = frame_channel(4);
        let (on_exit, _exits) = exit_channel(16);
        let mut pipeline = VideoPipeline::new();

        let calls = AtomicUsize::new(0);
        pipeline.stop(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

        // One frame per second: stop must not wait out the pacing sleep.
        pipeline
            .start(&config(1.0), &target(), &factory, context(on_exit), on_frame)
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        pipeline.stop(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert!(started.elapsed() < Duration::from_millis(500));

        pipeline.stop(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }
}
