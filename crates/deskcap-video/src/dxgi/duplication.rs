//! Desktop duplication frame source.

use std::time::Duration;

use tracing::{debug, instrument, warn};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BOX, D3D11_CPU_ACCESS_READ,
    D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_MODE_ROTATION_ROTATE270, DXGI_MODE_ROTATION_ROTATE90,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource, DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_DESC, DXGI_OUTDUPL_FRAME_INFO,
};

use deskcap_core::Region;

use super::device::D3D11Device;
use super::output::OutputInfo;
use crate::error::VideoError;
use crate::pixels::PixelBuffer;
use crate::source::{FrameSource, FrameStatus};
use crate::VideoResult;

/// Duplicates one output and keeps the latest image of the target region in a
/// CPU-readable staging texture.
pub struct DuplicationSource {
    // Declaration order is release order: surface, duplication, context, device.
    staging: ID3D11Texture2D,
    // None between a lost duplication and a successful rebind.
    duplication: Option<IDXGIOutputDuplication>,
    output: IDXGIOutput1,
    context: ID3D11DeviceContext,
    device: ID3D11Device,
    region: Region,
}

// SAFETY: every interface here was created in the multithreaded apartment and the
// source is used by one thread at a time (created on the caller, then moved to
// the capture thread).
unsafe impl Send for DuplicationSource {}

impl DuplicationSource {
    #[instrument(name = "duplication_open", skip(output), fields(output = %output.name))]
    pub fn open(output: &OutputInfo, region: Region) -> VideoResult<Self> {
        let (device, context) = D3D11Device::create(&output.adapter)?.into_parts();

        let output1: IDXGIOutput1 = output.output.cast()?;
        let duplication = duplicate(&output1, &device, region)?;

        let staging = create_staging_texture(&device, region.width, region.height)?;

        debug!(
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            "Bound desktop duplication"
        );

        Ok(Self {
            staging,
            duplication: Some(duplication),
            output: output1,
            context,
            device,
            region,
        })
    }

    fn duplication(&self) -> VideoResult<&IDXGIOutputDuplication> {
        self.duplication
            .as_ref()
            .ok_or_else(|| VideoError::SourceLost("duplication not bound".to_string()))
    }

    /// Access loss drops the duplication so later acquisitions fail fast until
    /// the loop rebinds.
    fn classify(&mut self, e: windows::core::Error) -> VideoError {
        if e.code() == DXGI_ERROR_ACCESS_LOST {
            warn!("Desktop duplication access lost");
            self.duplication = None;
            VideoError::SourceLost(e.message().to_string())
        } else {
            e.into()
        }
    }

    fn copy_to_staging(&self, resource: Option<IDXGIResource>) -> VideoResult<()> {
        let resource = resource
            .ok_or_else(|| VideoError::Staging("duplication returned no image".to_string()))?;
        let texture: ID3D11Texture2D = resource.cast()?;

        let src_box = D3D11_BOX {
            left: self.region.x,
            top: self.region.y,
            front: 0,
            right: self.region.x + self.region.width,
            bottom: self.region.y + self.region.height,
            back: 1,
        };

        unsafe {
            self.context
                .CopySubresourceRegion(&self.staging, 0, 0, 0, 0, &texture, 0, Some(&src_box));
        }
        Ok(())
    }
}

impl FrameSource for DuplicationSource {
    fn dimensions(&self) -> (u32, u32) {
        (self.region.width, self.region.height)
    }

    fn acquire(&mut self, timeout: Duration) -> VideoResult<FrameStatus> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;

        let duplication = self.duplication()?.clone();
        let acquired = unsafe { duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) };
        match acquired {
            Ok(()) => {}
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(FrameStatus::TimedOut),
            Err(e) => return Err(self.classify(e)),
        }

        let copied = self.copy_to_staging(resource);
        let released = unsafe { duplication.ReleaseFrame() };
        copied?;
        released.map_err(|e| self.classify(e))?;

        Ok(FrameStatus::Acquired)
    }

    fn read_staging(&mut self, dst: &mut PixelBuffer) -> VideoResult<()> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(|e| VideoError::Staging(e.message().to_string()))?;
        }

        let pitch = mapped.RowPitch as usize;
        let copied = if mapped.pData.is_null() {
            Err(VideoError::Staging("mapped surface has no data".to_string()))
        } else {
            let src = unsafe {
                std::slice::from_raw_parts(
                    mapped.pData as *const u8,
                    pitch * self.region.height as usize,
                )
            };
            dst.copy_rows(src, pitch)
        };

        unsafe {
            self.context.Unmap(&self.staging, 0);
        }
        copied
    }

    fn rebind(&mut self) -> VideoResult<()> {
        // The old interface must be released before the output can be duplicated again.
        self.duplication = None;
        self.duplication = Some(duplicate(&self.output, &self.device, self.region)?);
        debug!("Desktop duplication re-created");
        Ok(())
    }
}

/// Duplicates `output` and checks the output still covers `region`, which a
/// display mode change can break.
fn duplicate(
    output: &IDXGIOutput1,
    device: &ID3D11Device,
    region: Region,
) -> VideoResult<IDXGIOutputDuplication> {
    let duplication = unsafe { output.DuplicateOutput(device) }
        .map_err(|e| VideoError::Duplication(e.message().to_string()))?;

    let mut desc = DXGI_OUTDUPL_DESC::default();
    unsafe { duplication.GetDesc(&mut desc) };
    let (mut width, mut height) = (desc.ModeDesc.Width, desc.ModeDesc.Height);
    if desc.Rotation == DXGI_MODE_ROTATION_ROTATE90 || desc.Rotation == DXGI_MODE_ROTATION_ROTATE270 {
        std::mem::swap(&mut width, &mut height);
    }
    if region.x + region.width > width || region.y + region.height > height {
        return Err(VideoError::Duplication(format!(
            "output is {width}x{height}, smaller than the capture region"
        )));
    }
    Ok(duplication)
}

fn create_staging_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> VideoResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: Default::default(),
    };

    let mut texture = None;
    unsafe {
        device.CreateTexture2D(&desc, None, Some(&mut texture))?;
    }

    texture.ok_or_else(|| VideoError::WindowsApi {
        message: "Failed to create staging texture".to_string(),
        source: None,
    })
}
