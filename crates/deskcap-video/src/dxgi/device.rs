//! Direct3D 11 device creation with a software fallback.

use tracing::{debug, instrument};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_DRIVER_TYPE_WARP};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::IDXGIAdapter;

use crate::error::VideoError;
use crate::source::{with_driver_fallback, DriverKind};
use crate::VideoResult;

/// Direct3D 11 device and immediate context.
pub struct D3D11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3D11Device {
    /// Creates a device on `adapter`, falling back to the software rasterizer.
    #[instrument(name = "d3d11_create_device", skip_all)]
    pub fn create(adapter: &IDXGIAdapter) -> VideoResult<Self> {
        let ((device, context), driver) =
            with_driver_fallback(|kind| create_device(adapter, kind))?;
        debug!(driver = driver.name(), "Created D3D11 device for duplication");
        Ok(Self { device, context })
    }

    pub fn into_parts(self) -> (ID3D11Device, ID3D11DeviceContext) {
        (self.device, self.context)
    }
}

fn create_device(
    adapter: &IDXGIAdapter,
    kind: DriverKind,
) -> VideoResult<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device = None;
    let mut context = None;

    let created = unsafe {
        match kind {
            // An explicit adapter requires the unknown driver type.
            DriverKind::Hardware => D3D11CreateDevice(
                adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            ),
            DriverKind::Software => D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_WARP,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            ),
        }
    };
    created.map_err(|e| VideoError::DeviceCreation(e.message().to_string()))?;

    match (device, context) {
        (Some(device), Some(context)) => Ok((device, context)),
        _ => Err(VideoError::DeviceCreation(format!(
            "{} driver returned no device",
            kind.name()
        ))),
    }
}
