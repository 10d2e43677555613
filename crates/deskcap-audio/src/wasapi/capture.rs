//! Event-driven shared-mode capture client.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDevice, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
    AUDCLNT_STREAMFLAGS_LOOPBACK, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};
use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};

use deskcap_core::AudioEndpointKind;

use crate::error::AudioError;
use crate::format::{NativeFormat, SampleEncoding, WAVE_FORMAT_EXTENSIBLE};
use crate::source::{AudioSource, PacketInfo, WakeHandle};
use crate::AudioResult;

use super::device::{default_endpoint, endpoint_name};

/// Requested shared-mode buffer, in 100 ns units (one second).
const BUFFER_DURATION: i64 = 10_000_000;

/// The endpoint's mix format, allocated by the audio client.
struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    fn describe(&self) -> NativeFormat {
        // SAFETY: the pointer came from GetMixFormat and is freed only on drop.
        // Both structs are packed, so read them unaligned.
        let base = unsafe { ptr::read_unaligned(self.0) };
        let sub_format = if base.wFormatTag == WAVE_FORMAT_EXTENSIBLE && base.cbSize >= 22 {
            let ext = unsafe { ptr::read_unaligned(self.0 as *const WAVEFORMATEXTENSIBLE) };
            Some(ext.SubFormat.to_u128())
        } else {
            None
        };

        NativeFormat {
            sample_rate: base.nSamplesPerSec,
            channels: base.nChannels,
            bits_per_sample: base.wBitsPerSample,
            encoding: SampleEncoding::from_wave_tag(base.wFormatTag, sub_format),
            format_tag: base.wFormatTag,
        }
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// Auto-reset event the audio client signals when a buffer is ready.
struct EventHandle(HANDLE);

// SAFETY: event handles are process-wide kernel objects, usable from any thread.
unsafe impl Send for EventHandle {}
unsafe impl Sync for EventHandle {}

impl EventHandle {
    fn new() -> AudioResult<Self> {
        let handle =
            unsafe { CreateEventW(None, BOOL::from(false), BOOL::from(false), PCWSTR::null())? };
        Ok(Self(handle))
    }
}

impl WakeHandle for EventHandle {
    fn wake(&self) {
        let _ = unsafe { SetEvent(self.0) };
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// An activated endpoint and its mix format.
struct Endpoint {
    client: IAudioClient,
    mix_format: MixFormat,
    format: NativeFormat,
    _device: IMMDevice,
}

impl Endpoint {
    fn activate(kind: AudioEndpointKind) -> AudioResult<Self> {
        let device = default_endpoint(kind)?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };
        let mix_format = MixFormat(unsafe { client.GetMixFormat()? });
        let format = mix_format.describe();

        info!(
            device = %endpoint_name(&device),
            sample_rate = format.sample_rate,
            channels = format.channels,
            bits = format.bits_per_sample,
            "Opened audio endpoint"
        );

        Ok(Self {
            client,
            mix_format,
            format,
            _device: device,
        })
    }
}

/// A default endpoint opened in shared mode.
pub struct WasapiSource {
    kind: AudioEndpointKind,
    capture: Option<IAudioCaptureClient>,
    endpoint: Endpoint,
    // Outlives every endpoint, so the waker handed out at start stays valid.
    event: Arc<EventHandle>,
    started: bool,
}

// SAFETY: the source is built on the starting thread and afterwards used only
// by the loop thread it is moved to. Both threads are in the same apartment
// policy for the session, and the audio interfaces are free-threaded.
unsafe impl Send for WasapiSource {}

impl WasapiSource {
    #[instrument(name = "wasapi_open", skip_all, fields(endpoint = kind.name()))]
    pub fn open(kind: AudioEndpointKind) -> AudioResult<Self> {
        Ok(Self {
            kind,
            capture: None,
            endpoint: Endpoint::activate(kind)?,
            event: Arc::new(EventHandle::new()?),
            started: false,
        })
    }

    fn capture_client(&self) -> AudioResult<&IAudioCaptureClient> {
        self.capture
            .as_ref()
            .ok_or_else(|| AudioError::Packet("stream not started".to_string()))
    }
}

impl AudioSource for WasapiSource {
    fn format(&self) -> NativeFormat {
        self.endpoint.format
    }

    fn start(&mut self) -> AudioResult<()> {
        let mut flags = AUDCLNT_STREAMFLAGS_EVENTCALLBACK;
        if self.kind == AudioEndpointKind::SystemOutput {
            flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
        }

        let client = &self.endpoint.client;
        unsafe {
            client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                flags,
                BUFFER_DURATION,
                0,
                self.endpoint.mix_format.as_ptr(),
                None,
            )?;
            client.SetEventHandle(self.event.0)?;
            self.capture = Some(client.GetService()?);
            client.Start()?;
        }
        self.started = true;
        debug!(endpoint = self.kind.name(), "Audio stream started");
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> AudioResult<bool> {
        let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
        let result = unsafe { WaitForSingleObject(self.event.0, millis) };
        if result == WAIT_OBJECT_0 {
            Ok(true)
        } else if result == WAIT_TIMEOUT {
            Ok(false)
        } else {
            Err(AudioError::Notification(format!(
                "wait returned {:#x}",
                result.0
            )))
        }
    }

    fn read_packet(&mut self, out: &mut Vec<f32>) -> AudioResult<Option<PacketInfo>> {
        let capture = self.capture_client()?;
        let pending = unsafe { capture.GetNextPacketSize() }.map_err(classify)?;
        if pending == 0 {
            return Ok(None);
        }

        let mut data = ptr::null_mut();
        let mut frames = 0u32;
        let mut flags = 0u32;
        unsafe { capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None) }
            .map_err(classify)?;

        let silent = flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0;
        out.clear();
        if !silent && frames > 0 && !data.is_null() {
            let samples = frames as usize * self.endpoint.format.channels as usize;
            // SAFETY: GetBuffer hands out `frames` frames of the float mix
            // format, valid until ReleaseBuffer.
            let packet = unsafe { std::slice::from_raw_parts(data as *const f32, samples) };
            out.extend_from_slice(packet);
        }

        unsafe { capture.ReleaseBuffer(frames) }.map_err(classify)?;

        Ok(Some(PacketInfo {
            frames: frames as usize,
            silent,
        }))
    }

    fn waker(&self) -> Arc<dyn WakeHandle> {
        Arc::clone(&self.event) as Arc<dyn WakeHandle>
    }

    fn stop(&mut self) -> AudioResult<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        unsafe { self.endpoint.client.Stop()? };
        debug!(endpoint = self.kind.name(), "Audio stream stopped");
        Ok(())
    }

    fn reopen(&mut self) -> AudioResult<()> {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop invalidated audio stream");
        }
        self.capture = None;
        self.endpoint = Endpoint::activate(self.kind)?;
        self.start()
    }
}

impl Drop for WasapiSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn classify(err: windows::core::Error) -> AudioError {
    if err.code() == AUDCLNT_E_DEVICE_INVALIDATED {
        AudioError::DeviceLost
    } else {
        AudioError::Packet(err.message().to_string())
    }
}
