//! DRM ioctl definitions
//!
//! This module defines the DRM ioctl command numbers and request structures
//! following the Linux ABI (`include/uapi/drm/drm.h`, `drm_mode.h`). Only the
//! requests needed for the dumb buffer path, plane enumeration, property
//! lookup and atomic commits are described here.
//!
//! Every structure is `#[repr(C)]` and pinned to its kernel size at compile
//! time; a mismatch would make the kernel read or write past our buffers.

use core::mem::size_of;

use static_assertions::const_assert_eq;

use super::mode::DisplayMode;

/// DRM ioctl base (from Linux)
const GFX_IOCTL_BASE: u8 = b'd';

const fn gfx_iow<T>(nr: u8) -> u64 {
    // _IOW('d', nr, type) - direction bit 1 (write to kernel)
    let size = size_of::<T>() as u64;
    (1 << 30) | ((GFX_IOCTL_BASE as u64) << 8) | (nr as u64) | (size << 16)
}

const fn gfx_iowr<T>(nr: u8) -> u64 {
    // _IOWR('d', nr, type) - direction bits 3 (read/write)
    let size = size_of::<T>() as u64;
    (3 << 30) | ((GFX_IOCTL_BASE as u64) << 8) | (nr as u64) | (size << 16)
}

// DRM ioctl command numbers (Linux ABI)

/// Get driver version
pub const GFX_IOCTL_VERSION: u64 = gfx_iowr::<GfxVersion>(0x00);

/// Get capabilities
pub const GFX_IOCTL_GET_CAP: u64 = gfx_iowr::<GfxGetCap>(0x0c);

/// Set client capabilities
pub const GFX_IOCTL_SET_CLIENT_CAP: u64 = gfx_iow::<GfxSetClientCap>(0x0d);

/// Get mode resources
pub const GFX_IOCTL_MODE_GETRESOURCES: u64 = gfx_iowr::<GfxModeCardRes>(0xa0);

/// Set CRTC
pub const GFX_IOCTL_MODE_SETCRTC: u64 = gfx_iowr::<GfxModeCrtc>(0xa2);

/// Get property metadata
pub const GFX_IOCTL_MODE_GETPROPERTY: u64 = gfx_iowr::<GfxModeGetProperty>(0xaa);

/// Get encoder info
pub const GFX_IOCTL_MODE_GETENCODER: u64 = gfx_iowr::<GfxModeGetEncoder>(0xa6);

/// Get connector info
pub const GFX_IOCTL_MODE_GETCONNECTOR: u64 = gfx_iowr::<GfxModeGetConnector>(0xa7);

/// Add framebuffer
pub const GFX_IOCTL_MODE_ADDFB: u64 = gfx_iowr::<GfxModeFbCmd>(0xae);

/// Remove framebuffer
pub const GFX_IOCTL_MODE_RMFB: u64 = gfx_iowr::<u32>(0xaf);

/// Create dumb buffer
pub const GFX_IOCTL_MODE_CREATE_DUMB: u64 = gfx_iowr::<GfxModeCreateDumb>(0xb2);

/// Map dumb buffer
pub const GFX_IOCTL_MODE_MAP_DUMB: u64 = gfx_iowr::<GfxModeMapDumb>(0xb3);

/// Destroy dumb buffer
pub const GFX_IOCTL_MODE_DESTROY_DUMB: u64 = gfx_iowr::<GfxModeDestroyDumb>(0xb4);

/// Get plane resources
pub const GFX_IOCTL_MODE_GETPLANERESOURCES: u64 = gfx_iowr::<GfxModeGetPlaneRes>(0xb5);

/// Get plane info
pub const GFX_IOCTL_MODE_GETPLANE: u64 = gfx_iowr::<GfxModeGetPlane>(0xb6);

/// Get the property ids and values of a mode object
pub const GFX_IOCTL_MODE_OBJ_GETPROPERTIES: u64 = gfx_iowr::<GfxModeObjGetProperties>(0xb9);

/// Atomic commit
pub const GFX_IOCTL_MODE_ATOMIC: u64 = gfx_iowr::<GfxModeAtomic>(0xbc);

// Capability constants
pub const GFX_CAP_DUMB_BUFFER: u64 = 0x1;

// Client capability constants
pub const GFX_CLIENT_CAP_UNIVERSAL_PLANES: u64 = 2;
pub const GFX_CLIENT_CAP_ATOMIC: u64 = 3;

// Connector status
pub const GFX_MODE_CONNECTED: u32 = 1;
pub const GFX_MODE_DISCONNECTED: u32 = 2;
pub const GFX_MODE_UNKNOWNCONNECTION: u32 = 3;

// Connector and encoder types used by the virtual device
pub const GFX_MODE_CONNECTOR_VIRTUAL: u32 = 15;
pub const GFX_MODE_ENCODER_VIRTUAL: u32 = 5;

// Mode object type tags
pub const GFX_MODE_OBJECT_CRTC: u32 = 0xcccc_cccc;
pub const GFX_MODE_OBJECT_CONNECTOR: u32 = 0xc0c0_c0c0;
pub const GFX_MODE_OBJECT_ENCODER: u32 = 0xe0e0_e0e0;
pub const GFX_MODE_OBJECT_PLANE: u32 = 0xeeee_eeee;

// Values of the enum-typed "type" plane property
pub const GFX_PLANE_TYPE_OVERLAY: u64 = 0;
pub const GFX_PLANE_TYPE_PRIMARY: u64 = 1;
pub const GFX_PLANE_TYPE_CURSOR: u64 = 2;

/// Length of the fixed name buffers in mode and property structures
pub const GFX_NAME_LEN: usize = 32;

/// fourcc 'XR24': 32bpp, 8 bits unused then 8:8:8 RGB
pub const GFX_FORMAT_XRGB8888: u32 = 0x3432_5258;

/// fourcc 'AR24'
pub const GFX_FORMAT_ARGB8888: u32 = 0x3432_5241;

/// DRM version structure (matches Linux ABI)
///
/// The length fields are `size_t` and the name fields are user pointers,
/// so both follow the native pointer width.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxVersion {
    pub version_major: i32,
    pub version_minor: i32,
    pub version_patchlevel: i32,
    pub name_len: usize,
    pub name: usize, // pointer
    pub date_len: usize,
    pub date: usize, // pointer
    pub desc_len: usize,
    pub desc: usize, // pointer
}

/// DRM get capability structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxGetCap {
    pub capability: u64,
    pub value: u64,
}

/// DRM set client capability structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxSetClientCap {
    pub capability: u64,
    pub value: u64,
}

/// Mode info structure (matches Linux drm_mode_modeinfo)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeModeinfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub type_: u32,
    pub name: [u8; GFX_NAME_LEN],
}

impl From<&DisplayMode> for GfxModeModeinfo {
    fn from(m: &DisplayMode) -> Self {
        let mut name = [0u8; GFX_NAME_LEN];
        let name_bytes = m.name.as_bytes();
        let copy_len = name_bytes.len().min(GFX_NAME_LEN - 1);
        name[..copy_len].copy_from_slice(&name_bytes[..copy_len]);

        Self {
            clock: m.clock,
            hdisplay: m.hdisplay,
            hsync_start: m.hsync_start,
            hsync_end: m.hsync_end,
            htotal: m.htotal,
            hskew: m.hskew,
            vdisplay: m.vdisplay,
            vsync_start: m.vsync_start,
            vsync_end: m.vsync_end,
            vtotal: m.vtotal,
            vscan: m.vscan,
            vrefresh: m.vrefresh,
            flags: m.flags,
            type_: m.type_,
            name,
        }
    }
}

impl From<&GfxModeModeinfo> for DisplayMode {
    fn from(info: &GfxModeModeinfo) -> Self {
        Self {
            clock: info.clock,
            hdisplay: info.hdisplay,
            hsync_start: info.hsync_start,
            hsync_end: info.hsync_end,
            htotal: info.htotal,
            hskew: info.hskew,
            vdisplay: info.vdisplay,
            vsync_start: info.vsync_start,
            vsync_end: info.vsync_end,
            vtotal: info.vtotal,
            vscan: info.vscan,
            vrefresh: info.vrefresh,
            flags: info.flags,
            type_: info.type_,
            name: c_name(&info.name),
        }
    }
}

/// Decode a NUL-padded name buffer
pub fn c_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Mode card resources structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeCardRes {
    pub fb_id_ptr: u64,
    pub crtc_id_ptr: u64,
    pub connector_id_ptr: u64,
    pub encoder_id_ptr: u64,
    pub count_fbs: u32,
    pub count_crtcs: u32,
    pub count_connectors: u32,
    pub count_encoders: u32,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

/// Mode CRTC structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeCrtc {
    pub set_connectors_ptr: u64,
    pub count_connectors: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub x: u32,
    pub y: u32,
    pub gamma_size: u32,
    pub mode_valid: u32,
    pub mode: GfxModeModeinfo,
}

/// Mode get encoder structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeGetEncoder {
    pub encoder_id: u32,
    pub encoder_type: u32,
    pub crtc_id: u32,
    pub possible_crtcs: u32,
    pub possible_clones: u32,
}

/// Mode get connector structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeGetConnector {
    pub encoders_ptr: u64,
    pub modes_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_modes: u32,
    pub count_props: u32,
    pub count_encoders: u32,
    pub encoder_id: u32,
    pub connector_id: u32,
    pub connector_type: u32,
    pub connector_type_id: u32,
    pub connection: u32,
    pub mm_width: u32,
    pub mm_height: u32,
    pub subpixel: u32,
    pub pad: u32,
}

/// Property metadata structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeGetProperty {
    pub values_ptr: u64,
    pub enum_blob_ptr: u64,
    pub prop_id: u32,
    pub flags: u32,
    pub name: [u8; GFX_NAME_LEN],
    pub count_values: u32,
    pub count_enum_blobs: u32,
}

/// Object property list structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeObjGetProperties {
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub count_props: u32,
    pub obj_id: u32,
    pub obj_type: u32,
}

/// Framebuffer command structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeFbCmd {
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
    pub depth: u32,
    pub handle: u32,
}

/// Create dumb buffer structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeCreateDumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

/// Map dumb buffer structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeMapDumb {
    pub handle: u32,
    pub pad: u32,
    pub offset: u64,
}

/// Destroy dumb buffer structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeDestroyDumb {
    pub handle: u32,
}

/// Plane resources structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeGetPlaneRes {
    pub plane_id_ptr: u64,
    pub count_planes: u32,
}

/// Plane info structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeGetPlane {
    pub plane_id: u32,
    pub crtc_id: u32,
    pub fb_id: u32,
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    pub count_format_types: u32,
    pub format_type_ptr: u64,
}

/// Atomic commit structure
///
/// `objs_ptr` and `count_props_ptr` are parallel arrays of `count_objs`
/// entries; `props_ptr` and `prop_values_ptr` hold the properties of every
/// object back to back, in object order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct GfxModeAtomic {
    pub flags: u32,
    pub count_objs: u32,
    pub objs_ptr: u64,
    pub count_props_ptr: u64,
    pub props_ptr: u64,
    pub prop_values_ptr: u64,
    pub reserved: u64,
    pub user_data: u64,
}

const_assert_eq!(size_of::<GfxGetCap>(), 16);
const_assert_eq!(size_of::<GfxSetClientCap>(), 16);
const_assert_eq!(size_of::<GfxModeModeinfo>(), 68);
const_assert_eq!(size_of::<GfxModeCardRes>(), 64);
const_assert_eq!(size_of::<GfxModeCrtc>(), 104);
const_assert_eq!(size_of::<GfxModeGetEncoder>(), 20);
const_assert_eq!(size_of::<GfxModeGetConnector>(), 80);
const_assert_eq!(size_of::<GfxModeGetProperty>(), 64);
const_assert_eq!(size_of::<GfxModeObjGetProperties>(), 32);
const_assert_eq!(size_of::<GfxModeFbCmd>(), 28);
const_assert_eq!(size_of::<GfxModeCreateDumb>(), 32);
const_assert_eq!(size_of::<GfxModeMapDumb>(), 16);
const_assert_eq!(size_of::<GfxModeDestroyDumb>(), 4);
const_assert_eq!(size_of::<GfxModeGetPlaneRes>(), 16);
const_assert_eq!(size_of::<GfxModeGetPlane>(), 32);
const_assert_eq!(size_of::<GfxModeAtomic>(), 56);

#[cfg(target_pointer_width = "64")]
const_assert_eq!(size_of::<GfxVersion>(), 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_numbers_match_linux() {
        // Values from libdrm's generated headers on x86_64 / aarch64
        assert_eq!(GFX_IOCTL_GET_CAP, 0xc010_640c);
        assert_eq!(GFX_IOCTL_SET_CLIENT_CAP, 0x4010_640d);
        assert_eq!(GFX_IOCTL_MODE_GETRESOURCES, 0xc040_64a0);
        assert_eq!(GFX_IOCTL_MODE_SETCRTC, 0xc068_64a2);
        assert_eq!(GFX_IOCTL_MODE_GETPROPERTY, 0xc040_64aa);
        assert_eq!(GFX_IOCTL_MODE_GETENCODER, 0xc014_64a6);
        assert_eq!(GFX_IOCTL_MODE_GETCONNECTOR, 0xc050_64a7);
        assert_eq!(GFX_IOCTL_MODE_ADDFB, 0xc01c_64ae);
        assert_eq!(GFX_IOCTL_MODE_RMFB, 0xc004_64af);
        assert_eq!(GFX_IOCTL_MODE_CREATE_DUMB, 0xc020_64b2);
        assert_eq!(GFX_IOCTL_MODE_MAP_DUMB, 0xc010_64b3);
        assert_eq!(GFX_IOCTL_MODE_DESTROY_DUMB, 0xc004_64b4);
        assert_eq!(GFX_IOCTL_MODE_GETPLANERESOURCES, 0xc010_64b5);
        assert_eq!(GFX_IOCTL_MODE_GETPLANE, 0xc020_64b6);
        assert_eq!(GFX_IOCTL_MODE_OBJ_GETPROPERTIES, 0xc020_64b9);
        assert_eq!(GFX_IOCTL_MODE_ATOMIC, 0xc038_64bc);
    }

    #[test]
    fn test_modeinfo_name_is_truncated_and_terminated() {
        let mut mode = DisplayMode::new(1920, 1080, 60);
        mode.name = "x".repeat(40);
        let raw = GfxModeModeinfo::from(&mode);
        assert_eq!(raw.name[GFX_NAME_LEN - 1], 0);
        assert_eq!(c_name(&raw.name).len(), GFX_NAME_LEN - 1);
    }

    #[test]
    fn test_modeinfo_conversion_keeps_timings() {
        let mode = DisplayMode::new(1280, 720, 60);
        let back = DisplayMode::from(&GfxModeModeinfo::from(&mode));
        assert_eq!(back, mode);
    }
}
