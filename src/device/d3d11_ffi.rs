//! FFI layout of FFmpeg's D3D11VA device context.
//!
//! Mirrors `AVD3D11VADeviceContext` from `libavutil/hwcontext_d3d11va.h`,
//! which the generated FFmpeg bindings do not carry.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::ffi::c_void;

// =============================================================================
// Device Context
// =============================================================================

/// `AVHWDeviceContext.hwctx` for `AV_HWDEVICE_TYPE_D3D11VA`.
///
/// Every interface pointer holds one reference owned by FFmpeg, released
/// when the device context is freed. Fields left null are filled in by
/// `av_hwdevice_ctx_init`.
#[repr(C)]
pub struct AVD3D11VADeviceContext {
    /// `ID3D11Device*`
    pub device: *mut c_void,
    /// `ID3D11DeviceContext*`
    pub device_context: *mut c_void,
    /// `ID3D11VideoDevice*`
    pub video_device: *mut c_void,
    /// `ID3D11VideoContext*`
    pub video_context: *mut c_void,
    /// Guards `device_context`; FFmpeg installs a mutex when left null.
    pub lock: Option<unsafe extern "C" fn(lock_ctx: *mut c_void)>,
    pub unlock: Option<unsafe extern "C" fn(lock_ctx: *mut c_void)>,
    pub lock_ctx: *mut c_void,
}

// =============================================================================
// Frame Layout
// =============================================================================

/// `AVFrame.data` slot holding the `ID3D11Texture2D*`.
pub const FRAME_TEXTURE_PLANE: usize = 0;

/// `AVFrame.data` slot holding the array slice index, stored as `intptr_t`.
pub const FRAME_SLICE_PLANE: usize = 1;
