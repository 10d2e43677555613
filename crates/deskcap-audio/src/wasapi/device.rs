//! Default endpoint lookup.

use tracing::{debug, instrument};
use windows::core::GUID;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, STGM_READ};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;

use deskcap_core::AudioEndpointKind;

use crate::error::AudioError;
use crate::AudioResult;

// PKEY_Device_FriendlyName
const FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

fn data_flow(kind: AudioEndpointKind) -> EDataFlow {
    match kind {
        AudioEndpointKind::SystemOutput => eRender,
        AudioEndpointKind::Microphone => eCapture,
    }
}

/// Returns the default console endpoint for `kind`. System output is the
/// default render device, captured in loopback.
#[instrument(name = "default_audio_endpoint", skip_all, fields(endpoint = kind.name()))]
pub fn default_endpoint(kind: AudioEndpointKind) -> AudioResult<IMMDevice> {
    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };

    let device = unsafe {
        enumerator
            .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
            .map_err(|e| AudioError::EndpointNotFound(format!("{}: {}", kind.name(), e.message())))?
    };

    debug!(name = %endpoint_name(&device), "Resolved default endpoint");
    Ok(device)
}

/// The endpoint's friendly name, for logs.
pub fn endpoint_name(device: &IMMDevice) -> String {
    let name = unsafe {
        device
            .OpenPropertyStore(STGM_READ)
            .and_then(|store| store.GetValue(&FRIENDLY_NAME))
            .map(|value| value.to_string())
    };
    match name {
        Ok(name) if !name.is_empty() => name,
        _ => "Unknown".to_string(),
    }
}
