//! Direct Rendering Manager (DRM) client
//!
//! This module drives a KMS display controller from userspace through the
//! Linux DRM ioctl ABI: it discovers display objects, allocates dumb
//! buffers, resolves object properties and submits atomic updates.
//!
//! ## Architecture
//!
//! ```text
//! /dev/dri/cardX ──► Card ─┐
//!                          ├─► KmsDevice ──► discover / dumb / props / atomic
//!   in-memory ──► SimpleGfx┘
//! ```
//!
//! ## ioctls used
//!
//! - GFX_IOCTL_VERSION
//! - GFX_IOCTL_GET_CAP / GFX_IOCTL_SET_CLIENT_CAP
//! - GFX_IOCTL_MODE_GETRESOURCES
//! - GFX_IOCTL_MODE_GETCONNECTOR
//! - GFX_IOCTL_MODE_GETENCODER
//! - GFX_IOCTL_MODE_SETCRTC
//! - GFX_IOCTL_MODE_ADDFB / GFX_IOCTL_MODE_RMFB
//! - GFX_IOCTL_MODE_CREATE_DUMB / MAP_DUMB / DESTROY_DUMB
//! - GFX_IOCTL_MODE_GETPLANERESOURCES / GETPLANE
//! - GFX_IOCTL_MODE_OBJ_GETPROPERTIES / GETPROPERTY
//! - GFX_IOCTL_MODE_ATOMIC

pub mod atomic;
pub mod card;
pub mod discover;
pub mod draw;
pub mod dumb;
pub mod ioctl;
pub mod mode;
pub mod props;
pub mod simplegfx;

use log::debug;

use atomic::{AtomicFlags, AtomicRequest};
use dumb::{DumbBuffer, Mapping};
use ioctl::{GFX_CAP_DUMB_BUFFER, GFX_CLIENT_CAP_ATOMIC, GFX_CLIENT_CAP_UNIVERSAL_PLANES};
use mode::{Connector, DisplayMode, Encoder, ModeResources, ObjectType, Plane};

/// Bits per pixel of every surface (32bpp XRGB8888)
pub const BPP: u32 = 32;

/// Effective color depth registered with each framebuffer
pub const DEPTH: u32 = 24;

/// Bytes per pixel of every surface
pub const BYTES_PER_PIXEL: u32 = BPP / 8;

/// DRM driver error types
///
/// Each variant corresponds to the errno a DRM ioctl reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GfxError {
    /// Invalid argument (EINVAL)
    #[error("invalid argument")]
    InvalidArg,
    /// Out of memory (ENOMEM)
    #[error("out of memory")]
    NoMemory,
    /// Operation not supported (EOPNOTSUPP)
    #[error("operation not supported")]
    NotSupported,
    /// Device busy (EBUSY)
    #[error("device busy")]
    Busy,
    /// Permission denied (EACCES, EPERM)
    #[error("permission denied")]
    PermissionDenied,
    /// Invalid ioctl (ENOTTY)
    #[error("ioctl not supported by device")]
    InvalidIoctl,
    /// No such connector/crtc/encoder/plane/framebuffer (ENOENT)
    #[error("no such object")]
    NoSuchObject,
    /// I/O error (EIO)
    #[error("I/O error")]
    Io,
    /// Any other errno
    #[error("errno {0}")]
    Other(i32),
}

impl GfxError {
    /// Classify an errno returned by an ioctl or mmap
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINVAL => GfxError::InvalidArg,
            libc::ENOMEM => GfxError::NoMemory,
            libc::EOPNOTSUPP => GfxError::NotSupported,
            libc::EBUSY => GfxError::Busy,
            libc::EACCES | libc::EPERM => GfxError::PermissionDenied,
            libc::ENOTTY => GfxError::InvalidIoctl,
            libc::ENOENT => GfxError::NoSuchObject,
            libc::EIO => GfxError::Io,
            other => GfxError::Other(other),
        }
    }

    /// Errno value for this error
    pub fn errno(self) -> i32 {
        match self {
            GfxError::InvalidArg => libc::EINVAL,
            GfxError::NoMemory => libc::ENOMEM,
            GfxError::NotSupported => libc::EOPNOTSUPP,
            GfxError::Busy => libc::EBUSY,
            GfxError::PermissionDenied => libc::EACCES,
            GfxError::InvalidIoctl => libc::ENOTTY,
            GfxError::NoSuchObject => libc::ENOENT,
            GfxError::Io => libc::EIO,
            GfxError::Other(errno) => errno,
        }
    }
}

impl From<GfxError> for std::io::Error {
    fn from(e: GfxError) -> Self {
        std::io::Error::from_raw_os_error(e.errno())
    }
}

/// Kernel mode-setting device
///
/// The operations the display pipeline consumes from a DRM device. `Card`
/// implements them with ioctls on a device node; `SimpleGfx` implements them
/// in memory. Object ids are the raw kernel ids.
pub trait KmsDevice {
    /// Device name for diagnostics (e.g., "/dev/dri/card0")
    fn name(&self) -> &str;

    /// Get a device capability
    fn get_cap(&self, cap: u64) -> Result<u64, GfxError>;

    /// Enable a client capability
    fn set_client_cap(&self, cap: u64, value: u64) -> Result<(), GfxError>;

    /// Get mode resources (connectors, crtcs, encoders, framebuffers)
    fn get_resources(&self) -> Result<ModeResources, GfxError>;

    /// Get connector info by ID
    fn get_connector(&self, id: u32) -> Result<Connector, GfxError>;

    /// Get encoder info by ID
    fn get_encoder(&self, id: u32) -> Result<Encoder, GfxError>;

    /// Get the IDs of all planes
    fn get_plane_ids(&self) -> Result<Vec<u32>, GfxError>;

    /// Get plane info by ID
    fn get_plane(&self, id: u32) -> Result<Plane, GfxError>;

    /// Set CRTC mode and framebuffer (legacy, non-atomic)
    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[u32],
        mode: Option<&DisplayMode>,
    ) -> Result<(), GfxError>;

    /// Create a dumb buffer
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, GfxError>;

    /// Add a framebuffer backed by a dumb buffer handle
    fn add_fb(
        &self,
        width: u32,
        height: u32,
        pitch: u32,
        bpp: u32,
        depth: u32,
        handle: u32,
    ) -> Result<u32, GfxError>;

    /// Remove a framebuffer
    fn rm_fb(&self, fb_id: u32) -> Result<(), GfxError>;

    /// Map a dumb buffer (returns offset for mmap)
    fn map_dumb(&self, handle: u32) -> Result<u64, GfxError>;

    /// Map `len` bytes at a `map_dumb` offset into process memory
    fn mmap(&self, offset: u64, len: usize) -> Result<Mapping, GfxError>;

    /// Destroy a dumb buffer
    fn destroy_dumb(&self, handle: u32) -> Result<(), GfxError>;

    /// Get the (property id, current value) pairs of a mode object
    fn object_properties(&self, obj_id: u32, obj_type: ObjectType)
        -> Result<Vec<(u32, u64)>, GfxError>;

    /// Get the name of a property
    fn property_name(&self, prop_id: u32) -> Result<String, GfxError>;

    /// Submit an atomic request
    fn atomic_commit(&self, req: &AtomicRequest, flags: AtomicFlags) -> Result<(), GfxError>;
}

/// Check for dumb buffer support and switch on atomic mode setting
///
/// Universal planes must be enabled for primary and cursor planes to be
/// listed and for every plane to expose its `type` property.
pub fn negotiate_caps(device: &dyn KmsDevice) -> Result<(), GfxError> {
    if device.get_cap(GFX_CAP_DUMB_BUFFER)? == 0 {
        return Err(GfxError::NotSupported);
    }
    device.set_client_cap(GFX_CLIENT_CAP_UNIVERSAL_PLANES, 1)?;
    device.set_client_cap(GFX_CLIENT_CAP_ATOMIC, 1)?;
    debug!("{}: universal planes and atomic enabled", device.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplegfx::SimpleGfx;

    #[test]
    fn test_errno_classification_preserves_errno() {
        for errno in [
            libc::EINVAL,
            libc::ENOMEM,
            libc::EBUSY,
            libc::ENOTTY,
            libc::ENOENT,
            libc::EIO,
            libc::ENOSPC,
        ] {
            assert_eq!(GfxError::from_errno(errno).errno(), errno);
        }
    }

    #[test]
    fn test_eperm_and_eacces_are_permission_denied() {
        assert_eq!(GfxError::from_errno(libc::EPERM), GfxError::PermissionDenied);
        assert_eq!(GfxError::from_errno(libc::EACCES), GfxError::PermissionDenied);
    }

    #[test]
    fn test_negotiate_enables_atomic() {
        let dev = SimpleGfx::new(640, 480);
        negotiate_caps(&dev).unwrap();
        assert_eq!(dev.client_cap(GFX_CLIENT_CAP_UNIVERSAL_PLANES), Some(1));
        assert_eq!(dev.client_cap(GFX_CLIENT_CAP_ATOMIC), Some(1));
    }
}
