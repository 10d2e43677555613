//! Capture session orchestration.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use deskcap_audio::AudioPipeline;
use deskcap_core::{
    CaptureConfiguration, CaptureTargetInfo, ChunkCallback, ExitCallback, FrameCallback,
    PipelineContext, PipelineState, RuntimeContext, SessionClock, SessionState, TargetFilter,
};
use deskcap_video::VideoPipeline;

use crate::backend::{CaptureBackend, PlatformBackend};
use crate::error::SessionError;
use crate::SessionResult;

/// Callbacks for one capture run.
pub struct SessionCallbacks {
    /// Video is only captured when this is set.
    pub on_video: Option<FrameCallback>,

    /// Audio is only captured when this is set.
    pub on_audio: Option<ChunkCallback>,

    pub on_exit: ExitCallback,
}

/// Which pipelines a successful start brought up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartedPipelines {
    pub video: bool,
    pub audio: bool,
}

#[derive(Default)]
struct SessionInner {
    video: Option<VideoPipeline>,
    audio: Option<AudioPipeline>,
    runtime: Option<RuntimeContext>,
}

/// Starts, supervises and tears down an optional video pipeline and an
/// optional audio pipeline.
///
/// All operations are serialised by one lock. Dropping a session that is still
/// capturing stops it synchronously without invoking any callback.
pub struct CaptureSession<B: CaptureBackend = PlatformBackend> {
    backend: B,
    inner: Mutex<SessionInner>,
    capturing: AtomicBool,
}

impl CaptureSession<PlatformBackend> {
    pub fn new() -> Self {
        Self::with_backend(PlatformBackend::default())
    }
}

impl Default for CaptureSession<PlatformBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CaptureBackend> CaptureSession<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            inner: Mutex::new(SessionInner::default()),
            capturing: AtomicBool::new(false),
        }
    }

    /// Starts every requested pipeline. Succeeds if at least one of them
    /// started; failures of the other are reported through `on_exit`.
    #[instrument(name = "session_start", skip_all, fields(target = ?config.target))]
    pub fn start(
        &self,
        config: &CaptureConfiguration,
        callbacks: SessionCallbacks,
    ) -> SessionResult<StartedPipelines> {
        let mut inner = self.inner.lock();
        if self.capturing.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyCapturing);
        }

        let SessionCallbacks {
            on_video,
            on_audio,
            on_exit,
        } = callbacks;

        let on_video = match on_video {
            Some(callback) if config.wants_video() => Some(callback),
            Some(_) => {
                debug!(
                    frame_rate = config.frame_rate,
                    "Video not requested for this target and frame rate"
                );
                None
            }
            None => None,
        };
        if on_video.is_none() && on_audio.is_none() {
            return Err(SessionError::NothingToCapture);
        }

        let runtime = RuntimeContext::new(config.host_owns_runtime);
        let ctx = PipelineContext::new(runtime.clone(), SessionClock::start(), on_exit);
        let mut failures = Vec::new();
        let mut started = StartedPipelines::default();

        if let Some(on_frame) = on_video {
            match self.start_video(config, ctx.clone(), on_frame) {
                Ok(pipeline) => {
                    inner.video = Some(pipeline);
                    started.video = true;
                }
                Err(e) => {
                    warn!(error = %e, "Video pipeline failed to start");
                    failures.push(format!("video: {e}"));
                }
            }
        }

        if let Some(on_chunk) = on_audio {
            let mut pipeline = AudioPipeline::new();
            match pipeline.start(config, self.backend.audio_factory(), ctx.clone(), on_chunk) {
                Ok(()) => {
                    inner.audio = Some(pipeline);
                    started.audio = true;
                }
                Err(e) => {
                    warn!(error = %e, "Audio pipeline failed to start");
                    failures.push(format!("audio: {e}"));
                }
            }
        }

        if !started.video && !started.audio {
            return Err(SessionError::StartFailed(failures.join("; ")));
        }
        for failure in &failures {
            ctx.report(failure);
        }

        inner.runtime = Some(runtime);
        self.capturing.store(true, Ordering::SeqCst);
        info!(video = started.video, audio = started.audio, "Capture session started");
        Ok(started)
    }

    fn start_video(
        &self,
        config: &CaptureConfiguration,
        ctx: PipelineContext,
        on_frame: FrameCallback,
    ) -> SessionResult<VideoPipeline> {
        let target = self.backend.resolve_target(&config.target)?;
        let mut pipeline = VideoPipeline::new();
        pipeline.start(config, &target, self.backend.video_factory(), ctx, on_frame)?;
        Ok(pipeline)
    }

    /// Stops whichever pipelines are active and then calls `on_stopped`, which
    /// runs once per call even if nothing was capturing. No delivery callback
    /// fires after this returns.
    #[instrument(name = "session_stop", skip_all)]
    pub fn stop<F: FnOnce()>(&self, on_stopped: F) {
        self.shutdown();
        on_stopped();
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if let Some(mut video) = inner.video.take() {
            video.stop(|| debug!("Video pipeline stopped"));
        }
        if let Some(mut audio) = inner.audio.take() {
            audio.stop(|| debug!("Audio pipeline stopped"));
        }
        if let Some(runtime) = inner.runtime.take() {
            debug!(live_guards = runtime.live_guards(), "Released session runtime");
        }
        if self.capturing.swap(false, Ordering::SeqCst) {
            info!("Capture session stopped");
        }
    }

    /// Lock-free.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        if self.is_capturing() {
            SessionState::Capturing
        } else {
            SessionState::Idle
        }
    }

    pub fn video_state(&self) -> Option<PipelineState> {
        self.inner.lock().video.as_ref().map(VideoPipeline::state)
    }

    pub fn audio_state(&self) -> Option<PipelineState> {
        self.inner.lock().audio.as_ref().map(AudioPipeline::state)
    }

    pub fn enumerate_targets(&self, filter: TargetFilter) -> SessionResult<Vec<CaptureTargetInfo>> {
        Ok(self.backend.enumerate_targets(filter)?)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        if self.is_capturing() {
            debug!("Session dropped while capturing, stopping");
        }
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskcap_audio::{
        AudioError, AudioResult, AudioSource, AudioSourceFactory, NativeFormat, PacketInfo,
        WakeHandle,
    };
    use deskcap_core::{
        chunk_channel, exit_channel, frame_channel, AudioEndpointKind, CaptureTarget, Region,
        TargetId, TargetSelector, VideoFrame,
    };
    use deskcap_video::{
        FrameSource, FrameSourceFactory, FrameStatus, PixelBuffer, VideoError, VideoResult,
    };
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct StillSource;

    impl FrameSource for StillSource {
        fn dimensions(&self) -> (u32, u32) {
            (8, 8)
        }

        fn acquire(&mut self, _timeout: Duration) -> VideoResult<FrameStatus> {
            Ok(FrameStatus::Acquired)
        }

        fn read_staging(&mut self, dst: &mut PixelBuffer) -> VideoResult<()> {
            let src = vec![0x40u8; 8 * 8 * 4];
            dst.copy_rows(&src, 32)
        }

        fn rebind(&mut self) -> VideoResult<()> {
            Ok(())
        }
    }

    struct TickingWaker;

    impl WakeHandle for TickingWaker {
        fn wake(&self) {}
    }

    /// Delivers one 10 ms packet per wait.
    struct TickingSource {
        format: NativeFormat,
        pending: bool,
    }

    impl AudioSource for TickingSource {
        fn format(&self) -> NativeFormat {
            self.format
        }

        fn start(&mut self) -> AudioResult<()> {
            Ok(())
        }

        fn wait_ready(&mut self, timeout: Duration) -> AudioResult<bool> {
            thread::sleep(timeout.min(Duration::from_millis(10)));
            self.pending = true;
            Ok(true)
        }

        fn read_packet(&mut self, out: &mut Vec<f32>) -> AudioResult<Option<PacketInfo>> {
            if !self.pending {
                return Ok(None);
            }
            self.pending = false;
            let frames = (self.format.sample_rate / 100) as usize;
            out.clear();
            out.resize(frames * self.format.channels as usize, 0.25);
            Ok(Some(PacketInfo {
                frames,
                silent: false,
            }))
        }

        fn waker(&self) -> Arc<dyn WakeHandle> {
            Arc::new(TickingWaker)
        }

        fn stop(&mut self) -> AudioResult<()> {
            Ok(())
        }

        fn reopen(&mut self) -> AudioResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        fail_resolve: bool,
        fail_audio: bool,
        audio_opens: AtomicUsize,
    }

    impl FrameSourceFactory for FakeBackend {
        fn open(&self, _target: &CaptureTarget) -> VideoResult<Box<dyn FrameSource>> {
            Ok(Box::new(StillSource))
        }
    }

    impl AudioSourceFactory for FakeBackend {
        fn open(&self, _endpoint: AudioEndpointKind) -> AudioResult<Box<dyn AudioSource>> {
            self.audio_opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_audio {
                return Err(AudioError::EndpointNotFound("no endpoint".to_string()));
            }
            Ok(Box::new(TickingSource {
                format: NativeFormat::float32(48_000, 2),
                pending: false,
            }))
        }
    }

    impl CaptureBackend for FakeBackend {
        fn resolve_target(&self, selector: &TargetSelector) -> VideoResult<CaptureTarget> {
            match selector {
                TargetSelector::Display(id) if !self.fail_resolve => Ok(CaptureTarget {
                    id: TargetId::Display(*id),
                    output_index: 0,
                    region: Region::new(0, 0, 8, 8),
                }),
                _ => Err(VideoError::TargetNotFound(format!("{selector:?}"))),
            }
        }

        fn video_factory(&self) -> &dyn FrameSourceFactory {
            self
        }

        fn audio_factory(&self) -> &dyn AudioSourceFactory {
            self
        }

        fn enumerate_targets(&self, _filter: TargetFilter) -> VideoResult<Vec<CaptureTargetInfo>> {
            Ok(Vec::new())
        }
    }

    fn config(frame_rate: f32) -> CaptureConfiguration {
        CaptureConfiguration {
            frame_rate,
            ..Default::default()
        }
    }

    #[test]
    fn test_audio_only_when_frame_rate_zero() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let (on_video, frames) = frame_channel(16);
        let (on_audio, chunks) = chunk_channel(64);
        let (on_exit, exits) = exit_channel(16);

        let started = session
            .start(
                &config(0.0),
                SessionCallbacks {
                    on_video: Some(on_video),
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap();
        assert_eq!(started, StartedPipelines { video: false, audio: true });

        thread::sleep(Duration::from_millis(150));
        session.stop(|| {});

        assert!(frames.try_recv().is_err());
        assert!(chunks.len() >= 5, "only {} chunks", chunks.len());
        assert!(exits.try_recv().is_err());
    }

    #[test]
    fn test_both_pipelines_and_stop() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let (on_video, frames) = frame_channel(64);
        let (on_audio, chunks) = chunk_channel(64);
        let (on_exit, _exits) = exit_channel(16);

        let started = session
            .start(
                &config(50.0),
                SessionCallbacks {
                    on_video: Some(on_video),
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap();
        assert_eq!(started, StartedPipelines { video: true, audio: true });
        assert_eq!(session.state(), SessionState::Capturing);
        assert_eq!(session.video_state(), Some(PipelineState::Running));
        assert_eq!(session.audio_state(), Some(PipelineState::Running));

        let frame = frames.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((frame.width, frame.height), (8, 8));
        let chunk = chunks.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(chunk.channels, 2);

        let stopped = AtomicUsize::new(0);
        session.stop(|| {
            stopped.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!session.is_capturing());
        assert_eq!(session.video_state(), None);

        while frames.try_recv().is_ok() {}
        while chunks.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(60));
        assert!(frames.try_recv().is_err());
        assert!(chunks.try_recv().is_err());
    }

    #[test]
    fn test_second_start_rejected() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let (on_audio, _chunks) = chunk_channel(64);
        let (on_exit, _exits) = exit_channel(16);
        session
            .start(
                &config(0.0),
                SessionCallbacks {
                    on_video: None,
                    on_audio: Some(on_audio),
                    on_exit: on_exit.clone(),
                },
            )
            .unwrap();

        let (on_audio, _chunks) = chunk_channel(64);
        let err = session
            .start(
                &config(0.0),
                SessionCallbacks {
                    on_video: None,
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyCapturing));
        assert_eq!(err.to_string(), "Capture already in progress");
        assert_eq!(session.backend().audio_opens.load(Ordering::SeqCst), 1);
        session.stop(|| {});
    }

    #[test]
    fn test_partial_start_reports_failure() {
        let backend = FakeBackend {
            fail_resolve: true,
            ..Default::default()
        };
        let session = CaptureSession::with_backend(backend);
        let (on_video, _frames) = frame_channel(16);
        let (on_audio, chunks) = chunk_channel(64);
        let (on_exit, exits) = exit_channel(16);

        let started = session
            .start(
                &config(30.0),
                SessionCallbacks {
                    on_video: Some(on_video),
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap();
        assert_eq!(started, StartedPipelines { video: false, audio: true });

        let message = exits.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(message.starts_with("video:"), "{message}");
        assert!(chunks.recv_timeout(Duration::from_secs(2)).is_ok());
        session.stop(|| {});
    }

    #[test]
    fn test_all_pipelines_failing_is_a_start_failure() {
        let backend = FakeBackend {
            fail_resolve: true,
            fail_audio: true,
            ..Default::default()
        };
        let session = CaptureSession::with_backend(backend);
        let (on_video, _frames) = frame_channel(16);
        let (on_audio, _chunks) = chunk_channel(64);
        let (on_exit, exits) = exit_channel(16);

        let err = session
            .start(
                &config(30.0),
                SessionCallbacks {
                    on_video: Some(on_video),
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("video:") && message.contains("audio:"), "{message}");
        assert!(!session.is_capturing());
        assert!(exits.try_recv().is_err());
    }

    #[test]
    fn test_invalid_audio_config_fails_synchronously() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let (on_audio, _chunks) = chunk_channel(64);
        let (on_exit, _exits) = exit_channel(16);
        let config = CaptureConfiguration {
            audio_channels: 3,
            ..config(0.0)
        };

        let err = session
            .start(
                &config,
                SessionCallbacks {
                    on_video: None,
                    on_audio: Some(on_audio),
                    on_exit,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("only 1-2 channels supported"));
        assert_eq!(session.backend().audio_opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nothing_to_capture() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let (on_video, _frames) = frame_channel(16);
        let (on_exit, _exits) = exit_channel(16);

        let err = session
            .start(
                &config(0.0),
                SessionCallbacks {
                    on_video: Some(on_video),
                    on_audio: None,
                    on_exit,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::NothingToCapture));
    }

    #[test]
    fn test_stop_without_start_is_idempotent() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        let calls = AtomicUsize::new(0);
        session.stop(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        session.stop(|| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_restart_after_stop() {
        let session = CaptureSession::with_backend(FakeBackend::default());
        for _ in 0..2 {
            let (on_audio, chunks) = chunk_channel(64);
            let (on_exit, _exits) = exit_channel(16);
            session
                .start(
                    &config(0.0),
                    SessionCallbacks {
                        on_video: None,
                        on_audio: Some(on_audio),
                        on_exit,
                    },
                )
                .unwrap();
            assert!(chunks.recv_timeout(Duration::from_secs(2)).is_ok());
            session.stop(|| {});
        }
        assert_eq!(session.backend().audio_opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_while_capturing_joins_pipelines() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let (on_exit, _exits) = exit_channel(16);

        let session = CaptureSession::with_backend(FakeBackend::default());
        session
            .start(
                &config(50.0),
                SessionCallbacks {
                    on_video: Some(Box::new(move |_: &VideoFrame| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                    on_audio: None,
                    on_exit,
                },
            )
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(session);

        let after_drop = delivered.load(Ordering::SeqCst);
        assert!(after_drop > 0);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(delivered.load(Ordering::SeqCst), after_drop);
    }
}
