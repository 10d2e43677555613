//! Event-driven audio capture loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use deskcap_core::{
    AudioChunk, CaptureConfiguration, ChunkCallback, PipelineContext, PipelineState, StateCell,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::AudioError;
use crate::format::NativeFormat;
use crate::remix::remix;
use crate::resample::RateConverter;
use crate::source::{AudioSource, AudioSourceFactory, WakeHandle};
use crate::AudioResult;

/// Upper bound on one notification wait. Loopback streams go quiet while nothing
/// plays, so the loop still polls the endpoint for invalidation.
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between attempts to reopen a lost endpoint.
const REOPEN_INTERVAL: Duration = Duration::from_millis(500);

/// Captures an audio endpoint and delivers float PCM in the requested layout.
pub struct AudioPipeline {
    state: StateCell,
    running: Arc<AtomicBool>,
    waker: Option<Arc<dyn WakeHandle>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    pub fn new() -> Self {
        Self {
            state: StateCell::new("audio"),
            running: Arc::new(AtomicBool::new(false)),
            waker: None,
            thread: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    /// Validates the configuration, activates the endpoint and starts the stream
    /// on the calling thread, then hands the stream to a loop thread.
    #[instrument(name = "audio_pipeline_start", skip_all, fields(endpoint = config.effective_audio_endpoint().name()))]
    pub fn start(
        &mut self,
        config: &CaptureConfiguration,
        factory: &dyn AudioSourceFactory,
        ctx: PipelineContext,
        on_chunk: ChunkCallback,
    ) -> AudioResult<()> {
        if !self.state.get().can_start() {
            return Err(AudioError::AlreadyStarted);
        }
        config
            .validate_audio()
            .map_err(|e| AudioError::InvalidConfig(e.to_string()))?;

        self.state.transition_to(PipelineState::Initializing);
        // Held until the loop thread has entered the runtime too.
        let _runtime = match ctx.runtime.enter() {
            Ok(guard) => guard,
            Err(e) => {
                self.state.transition_to(PipelineState::Error);
                return Err(e.into());
            }
        };
        let (source, converter) = match prepare(config, factory) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.state.transition_to(PipelineState::Error);
                return Err(e);
            }
        };

        let waker = source.waker();
        let native = source.format();
        let capture = CaptureLoop {
            native,
            channels: config.audio_channels,
            sample_rate: config.audio_sample_rate,
            source,
            converter,
            running: Arc::clone(&self.running),
            state: self.state.clone(),
            ctx,
            on_chunk,
            packet: Vec::new(),
            remixed: Vec::new(),
            converted: Vec::new(),
            sequence: 0,
        };

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("deskcap-audio".to_string())
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
                return Err(AudioError::Thread(e.to_string()));
            }
        };

        let failure = match ready_rx.recv() {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(AudioError::Runtime(e)),
            Err(_) => Some(AudioError::Thread("exited during start-up".to_string())),
        };

        if let Some(e) = failure {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            self.state.transition_to(PipelineState::Error);
            return Err(e);
        }

        self.waker = Some(waker);
        self.thread = Some(handle);
        Ok(())
    }

    /// Stops the loop, releases the endpoint and then calls `on_stopped`.
    /// Calling it on a pipeline that is not running only calls `on_stopped`.
    #[instrument(name = "audio_pipeline_stop", skip_all)]
    pub fn stop<F: FnOnce()>(&mut self, on_stopped: F) {
        let current = self.state.get();
        if matches!(current, PipelineState::Idle | PipelineState::Stopped) {
            on_stopped();
            return;
        }

        info!(state = current.name(), "Stopping audio capture");
        self.state.transition_to(PipelineState::Stopping);
        self.running.store(false, Ordering::SeqCst);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Audio capture thread panicked");
            }
        }

        self.state.transition_to(PipelineState::Stopped);
        info!("Audio capture stopped");
        on_stopped();
    }
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop(|| {});
    }
}

fn prepare(
    config: &CaptureConfiguration,
    factory: &dyn AudioSourceFactory,
) -> AudioResult<(Box<dyn AudioSource>, Option<RateConverter>)> {
    let mut source = factory.open(config.effective_audio_endpoint())?;
    let native = source.format();
    native.ensure_float32()?;

    let converter = if native.sample_rate != config.audio_sample_rate {
        Some(RateConverter::new(
            native.sample_rate,
            config.audio_sample_rate,
            config.audio_channels as usize,
        )?)
    } else {
        None
    };

    source.start()?;

    info!(
        native_rate = native.sample_rate,
        native_channels = native.channels,
        rate = config.audio_sample_rate,
        channels = config.audio_channels,
        resampling = converter.is_some(),
        "Starting audio capture"
    );
    Ok((source, converter))
}

struct CaptureLoop {
    // Dropped before `source` so the endpoint is released last.
    converter: Option<RateConverter>,
    source: Box<dyn AudioSource>,
    native: NativeFormat,
    channels: u16,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    state: StateCell,
    ctx: PipelineContext,
    on_chunk: ChunkCallback,
    packet: Vec<f32>,
    remixed: Vec<f32>,
    converted: Vec<f32>,
    sequence: u64,
}

impl CaptureLoop {
    fn run(mut self) {
        let mut lost = false;

        while self.running.load(Ordering::SeqCst) {
            let timeout = if lost {
                match self.reopen() {
                    Ok(()) => {
                        lost = false;
                        READY_TIMEOUT
                    }
                    Err(e) if e.is_fatal() => return self.fail(e),
                    Err(e) => {
                        debug!(error = %e, "Audio endpoint still unavailable");
                        REOPEN_INTERVAL
                    }
                }
            } else {
                READY_TIMEOUT
            };

            if let Err(e) = self.source.wait_ready(timeout) {
                if self.running.load(Ordering::SeqCst) {
                    return self.fail(e);
                }
                break;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if lost {
                continue;
            }

            match self.drain() {
                Ok(()) => {}
                Err(e) if e.is_device_lost() => {
                    warn!("Audio endpoint lost, reopening");
                    self.ctx.report(&e.to_string());
                    lost = true;
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => {
                    warn!(error = %e, "Audio packet failed");
                    self.ctx.report(&e.to_string());
                }
            }
        }

        self.release();
        debug!(chunks = self.sequence, "Audio capture loop exited");
    }

    /// Reopens the endpoint and rebuilds the converter if its mix format changed.
    fn reopen(&mut self) -> AudioResult<()> {
        self.source.reopen()?;
        let native = self.source.format();
        if native != self.native {
            native.ensure_float32()?;
            self.converter = if native.sample_rate != self.sample_rate {
                Some(RateConverter::new(
                    native.sample_rate,
                    self.sample_rate,
                    self.channels as usize,
                )?)
            } else {
                None
            };
            self.native = native;
        }
        info!(
            native_rate = native.sample_rate,
            native_channels = native.channels,
            "Audio endpoint reopened"
        );
        Ok(())
    }

    /// Delivers every packet currently queued on the endpoint.
    fn drain(&mut self) -> AudioResult<()> {
        while let Some(packet) = self.source.read_packet(&mut self.packet)? {
            if packet.silent || packet.frames == 0 {
                trace!(frames = packet.frames, "Skipping silent packet");
                continue;
            }
            if let Err(e) = self.deliver(packet.frames, Instant::now()) {
                warn!(error = %e, "Audio conversion failed");
                self.ctx.report(&e.to_string());
            }
        }
        Ok(())
    }

    fn deliver(&mut self, frames: usize, captured_at: Instant) -> AudioResult<()> {
        let native_channels = self.native.channels as usize;
        let samples = frames * native_channels;
        if self.packet.len() < samples {
            return Err(AudioError::Packet(format!(
                "packet holds {} samples, expected {samples}",
                self.packet.len()
            )));
        }

        remix(
            &self.packet[..samples],
            native_channels,
            self.channels as usize,
            &mut self.remixed,
        );

        let (buffer, frame_count, sample_rate) = match self.converter.as_mut() {
            Some(converter) => {
                let produced = converter.process(&self.remixed, frames, &mut self.converted)?;
                (&mut self.converted, produced, self.sample_rate)
            }
            None => (&mut self.remixed, frames, self.native.sample_rate),
        };
        if frame_count == 0 {
            return Ok(());
        }

        let chunk = AudioChunk {
            samples: std::mem::take(buffer),
            channels: self.channels,
            sample_rate,
            frame_count,
            timestamp: self.ctx.clock.at(captured_at),
            sequence: self.sequence,
        };
        self.sequence += 1;

        trace!(sequence = chunk.sequence, frames = frame_count, "Delivering audio chunk");
        (self.on_chunk)(&chunk);
        *buffer = chunk.samples;
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.source.stop() {
            warn!(error = %e, "Failed to stop audio stream");
        }
    }

    fn fail(mut self, e: AudioError) {
        error!(error = %e, "Audio capture failed");
        self.running.store(false, Ordering::SeqCst);
        self.release();
        self.state.transition_to(PipelineState::Error);
        self.ctx.report(&e.to_string());
    }
}
