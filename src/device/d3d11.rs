//! Direct3D 11 render device
//!
//! Wraps an application-owned `ID3D11Device` and binds FFmpeg's D3D11VA
//! decoder to it, so decoded surfaces are directly usable by the renderer
//! sharing that device.

use std::ffi::c_void;

use ffmpeg_next::ffi;
use ffmpeg_next::frame;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BIND_SHADER_RESOURCE,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_420_OPAQUE, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8X8_UNORM,
    DXGI_FORMAT_NV12, DXGI_FORMAT_P010, DXGI_FORMAT_P016, DXGI_FORMAT_R8G8B8A8_UNORM,
};

use super::d3d11_ffi::{AVD3D11VADeviceContext, FRAME_SLICE_PLANE, FRAME_TEXTURE_PLANE};
use super::{DeviceError, NativeSurface, RenderDevice, SurfaceDesc, SurfaceFormat};
use crate::hwaccel::{BackendKind, HwDeviceContext};

/// Shareable `ID3D11Texture2D` reference
#[derive(Clone, Debug)]
pub struct D3d11Texture(ID3D11Texture2D);

// D3D11 resources are free-threaded
unsafe impl Send for D3d11Texture {}
unsafe impl Sync for D3d11Texture {}

impl D3d11Texture {
    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.0
    }

    pub fn desc(&self) -> D3D11_TEXTURE2D_DESC {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.0.GetDesc(&mut desc) };
        desc
    }
}

/// Render device backed by an existing `ID3D11Device`
pub struct D3d11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    hw_device: HwDeviceContext,
}

// ID3D11Device is free-threaded; the immediate context is only used from the
// thread driving the session, under FFmpeg's device lock
unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    /// Bind FFmpeg's D3D11VA device context to `device`
    ///
    /// The device should be created with `D3D11_CREATE_DEVICE_VIDEO_SUPPORT`.
    pub fn new(device: ID3D11Device) -> Result<Self, DeviceError> {
        crate::ensure_ffmpeg_initialized()?;

        unsafe {
            let mut buffer =
                ffi::av_hwdevice_ctx_alloc(ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA);
            if buffer.is_null() {
                return Err(DeviceError::Creation("av_hwdevice_ctx_alloc failed".to_string()));
            }

            let device_ctx = (*buffer).data as *mut ffi::AVHWDeviceContext;
            let hwctx = (*device_ctx).hwctx as *mut AVD3D11VADeviceContext;
            // FFmpeg releases this reference when the context is freed
            (*hwctx).device = device.clone().into_raw();

            let ret = ffi::av_hwdevice_ctx_init(buffer);
            if ret < 0 {
                ffi::av_buffer_unref(&mut buffer);
                return Err(DeviceError::Creation(format!(
                    "av_hwdevice_ctx_init: {}",
                    ffmpeg_next::Error::from(ret)
                )));
            }

            let context = ID3D11DeviceContext::from_raw_borrowed(&(*hwctx).device_context)
                .cloned()
                .ok_or_else(|| DeviceError::Creation("device has no immediate context".to_string()))?;

            tracing::info!("Bound D3D11VA decoding to existing D3D11 device");

            Ok(Self {
                device,
                context,
                hw_device: HwDeviceContext::from_raw(buffer, BackendKind::D3d11va),
            })
        }
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn immediate_context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    fn with_device_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        unsafe {
            let device_ctx = (*self.hw_device.as_ptr()).data as *mut ffi::AVHWDeviceContext;
            let hwctx = (*device_ctx).hwctx as *mut AVD3D11VADeviceContext;
            if let Some(lock) = (*hwctx).lock {
                lock((*hwctx).lock_ctx);
            }
            let result = f();
            if let Some(unlock) = (*hwctx).unlock {
                unlock((*hwctx).lock_ctx);
            }
            result
        }
    }
}

/// Map a DXGI format onto the crate's surface formats
pub fn surface_format_from_dxgi(format: DXGI_FORMAT) -> SurfaceFormat {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => SurfaceFormat::Bgra8,
        DXGI_FORMAT_R8G8B8A8_UNORM => SurfaceFormat::Rgba8,
        DXGI_FORMAT_B8G8R8X8_UNORM => SurfaceFormat::Bgrx8,
        DXGI_FORMAT_NV12 => SurfaceFormat::Nv12,
        DXGI_FORMAT_P010 => SurfaceFormat::P010,
        DXGI_FORMAT_P016 => SurfaceFormat::P016,
        DXGI_FORMAT_420_OPAQUE => SurfaceFormat::Opaque420,
        other => SurfaceFormat::Other(other.0 as u32),
    }
}

impl RenderDevice for D3d11Device {
    type Texture = D3d11Texture;

    fn backend(&self) -> BackendKind {
        BackendKind::D3d11va
    }

    fn label(&self) -> String {
        "d3d11 device".to_string()
    }

    fn create_hw_device(&self) -> Result<HwDeviceContext, DeviceError> {
        Ok(self.hw_device.try_clone()?)
    }

    fn surface_from_frame(&self, frame: &frame::Video) -> Result<NativeSurface<D3d11Texture>, DeviceError> {
        if frame.format() != ffmpeg_next::format::Pixel::D3D11 {
            return Err(DeviceError::UnsupportedFrame(format!(
                "expected a D3D11 frame, got {:?}",
                frame.format()
            )));
        }

        let (raw_texture, slice) = unsafe {
            let raw = frame.as_ptr();
            (
                (*raw).data[FRAME_TEXTURE_PLANE] as *mut c_void,
                (*raw).data[FRAME_SLICE_PLANE] as usize as u32,
            )
        };

        let texture = unsafe { ID3D11Texture2D::from_raw_borrowed(&raw_texture) }
            .cloned()
            .map(D3d11Texture)
            .ok_or_else(|| DeviceError::UnsupportedFrame("frame carries no texture".to_string()))?;

        if texture.desc().ArraySize > 1 {
            Ok(NativeSurface::ArraySlice { pool: texture, index: slice })
        } else {
            Ok(NativeSurface::Single(texture))
        }
    }

    fn describe(&self, texture: &D3d11Texture) -> Result<SurfaceDesc, DeviceError> {
        let desc = texture.desc();
        Ok(SurfaceDesc {
            width: desc.Width,
            height: desc.Height,
            format: surface_format_from_dxgi(desc.Format),
            array_size: desc.ArraySize,
        })
    }

    fn copy_slice(&self, pool: &D3d11Texture, index: u32) -> Result<D3d11Texture, DeviceError> {
        let pool_desc = pool.desc();
        if index >= pool_desc.ArraySize {
            return Err(DeviceError::Surface(format!(
                "slice {} outside pool of {}",
                index, pool_desc.ArraySize
            )));
        }

        let desc = D3D11_TEXTURE2D_DESC {
            MipLevels: 1,
            ArraySize: 1,
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
            ..pool_desc
        };

        let mut copy: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut copy)) }
            .map_err(|e| DeviceError::Surface(format!("CreateTexture2D: {}", e)))?;
        let copy = copy.ok_or_else(|| DeviceError::Surface("CreateTexture2D returned no texture".to_string()))?;

        let subresource = index * pool_desc.MipLevels.max(1);
        self.with_device_lock(|| unsafe {
            self.context
                .CopySubresourceRegion(&copy, 0, 0, 0, 0, pool.texture(), subresource, None);
        });

        Ok(D3d11Texture(copy))
    }
}
