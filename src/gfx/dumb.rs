//! DRM Dumb Buffer Management
//!
//! Dumb buffers are simple, CPU-accessible pixel buffers used for
//! basic display operations. They don't require GPU acceleration
//! and are the minimum required for basic KMS functionality.
//!
//! A [`Surface`] is one dumb buffer that has been registered as a
//! framebuffer and mapped into process memory. It holds all three
//! resources and gives them back in reverse order when dropped:
//! unmap, remove framebuffer, destroy buffer.

use core::ptr::{self, NonNull};
use core::slice;

use log::{debug, warn};

use super::{GfxError, KmsDevice, BPP, BYTES_PER_PIXEL, DEPTH};
use crate::error::OverlayError;

/// Dumb buffer descriptor returned from CREATE_DUMB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbBuffer {
    /// Handle for this buffer (used in subsequent operations)
    pub handle: u32,
    /// Pitch (bytes per scanline) - may be larger than width * bpp/8
    pub pitch: u32,
    /// Total buffer size in bytes
    pub size: u64,
}

impl DumbBuffer {
    /// Descriptor for a `width` x `height` buffer with a 64-byte aligned
    /// pitch, or `None` when the pitch doesn't fit in 32 bits
    pub fn new(handle: u32, width: u32, height: u32, bpp: u32) -> Option<Self> {
        let min_pitch = width.checked_mul(bpp.div_ceil(8))?;
        let pitch = min_pitch.checked_add(63)? & !63;
        let size = (pitch as u64) * (height as u64);

        Some(Self {
            handle,
            pitch,
            size,
        })
    }
}

enum MappingKind {
    /// `mmap`ed from a device; unmapped on drop
    Shared,
    /// Heap memory standing in for device memory
    Owned,
}

/// A region of device memory mapped into the process
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
    kind: MappingKind,
}

impl Mapping {
    /// Wrap a region returned by `mmap(2)`
    ///
    /// # Safety
    /// `ptr` must be the start of a live shared mapping of exactly `len`
    /// bytes that nothing else will unmap.
    pub unsafe fn from_raw_shared(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            kind: MappingKind::Shared,
        }
    }

    /// Zeroed heap memory of `len` bytes
    pub fn anonymous(len: usize) -> Self {
        let raw = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        // Box never hands out a null pointer, even for empty slices
        let ptr = NonNull::new(raw).unwrap_or(NonNull::dangling());
        Self {
            ptr,
            len,
            kind: MappingKind::Owned,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and we hold the only reference
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        match self.kind {
            MappingKind::Shared => {
                // SAFETY: from_raw_shared's contract makes this the only owner of
                // a live mapping of exactly len bytes
                let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
                if ret != 0 {
                    warn!(
                        "munmap of {} bytes failed: {}",
                        self.len,
                        std::io::Error::last_os_error()
                    );
                }
            }
            MappingKind::Owned => {
                // SAFETY: produced by Box::into_raw in anonymous() with this len
                drop(unsafe {
                    Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len))
                });
            }
        }
    }
}

/// Runs a release step on drop unless cancelled
struct Cleanup<F: FnOnce()> {
    f: Option<F>,
}

impl<F: FnOnce()> Cleanup<F> {
    fn new(f: F) -> Self {
        Self { f: Some(f) }
    }

    fn cancel(&mut self) {
        self.f = None;
    }
}

impl<F: FnOnce()> Drop for Cleanup<F> {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// An allocated, registered and mapped 32bpp pixel buffer
///
/// Only valid while the owning device is open; the borrow of the device
/// enforces that.
pub struct Surface<'d> {
    device: &'d dyn KmsDevice,
    width: u32,
    height: u32,
    pitch: u32,
    size: u64,
    handle: u32,
    fb_id: u32,
    map: Option<Mapping>,
    live: bool,
}

impl<'d> Surface<'d> {
    /// Allocate a `width` x `height` XRGB8888 surface
    ///
    /// Creates the dumb buffer, registers it as a framebuffer (depth 24,
    /// 32 bits per pixel) and maps it read/write. Resources acquired before
    /// a failing step are released before the error is returned.
    pub fn allocate(
        device: &'d dyn KmsDevice,
        width: u32,
        height: u32,
    ) -> Result<Self, OverlayError> {
        let dumb = device
            .create_dumb(width, height, BPP)
            .map_err(|source| OverlayError::Allocation {
                width,
                height,
                source,
            })?;
        let handle = dumb.handle;
        let mut destroy = Cleanup::new(|| {
            if let Err(e) = device.destroy_dumb(handle) {
                warn!("{}: destroying dumb buffer {} failed: {}", device.name(), handle, e);
            }
        });

        // Never trust the pitch to be width * 4, but it can't be less
        let min_pitch = width as u64 * BYTES_PER_PIXEL as u64;
        if (dumb.pitch as u64) < min_pitch || dumb.size < dumb.pitch as u64 * height as u64 {
            return Err(OverlayError::Allocation {
                width,
                height,
                source: GfxError::InvalidArg,
            });
        }

        let fb_id = device
            .add_fb(width, height, dumb.pitch, BPP, DEPTH, handle)
            .map_err(|source| OverlayError::Registration { handle, source })?;
        let mut remove = Cleanup::new(|| {
            if let Err(e) = device.rm_fb(fb_id) {
                warn!("{}: removing framebuffer {} failed: {}", device.name(), fb_id, e);
            }
        });

        let len = usize::try_from(dumb.size).map_err(|_| OverlayError::Mapping {
            handle,
            source: GfxError::NoMemory,
        })?;
        let map = device
            .map_dumb(handle)
            .and_then(|offset| device.mmap(offset, len))
            .map_err(|source| OverlayError::Mapping { handle, source })?;

        remove.cancel();
        destroy.cancel();

        debug!(
            "{}: surface {}x{} handle {} fb {} pitch {} size {}",
            device.name(),
            width,
            height,
            handle,
            fb_id,
            dumb.pitch,
            dumb.size
        );

        Ok(Self {
            device,
            width,
            height,
            pitch: dumb.pitch,
            size: dumb.size,
            handle,
            fb_id,
            map: Some(map),
            live: true,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bits per pixel, always 32
    pub fn bpp(&self) -> u32 {
        BPP
    }

    /// Bytes per scanline, as assigned by the kernel
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Total buffer size in bytes, as assigned by the kernel
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Dumb buffer handle
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Framebuffer ID usable by CRTC and plane configuration
    pub fn fb_id(&self) -> u32 {
        self.fb_id
    }

    /// Mapped pixel memory
    pub fn pixels(&self) -> &[u8] {
        self.map.as_ref().map_or(&[], Mapping::as_slice)
    }

    /// Mapped pixel memory, writable
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.map.as_mut().map_or(&mut [], Mapping::as_mut_slice)
    }

    fn offset_of(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.pitch as usize + (x * BYTES_PER_PIXEL) as usize)
    }

    /// Read the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        let offset = self.offset_of(x, y)?;
        let bytes = self.pixels().get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a single pixel at (x, y); out-of-bounds writes are ignored
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: u32) {
        let Some(offset) = self.offset_of(x, y) else {
            return;
        };
        if let Some(dst) = self.pixels_mut().get_mut(offset..offset + 4) {
            dst.copy_from_slice(&pixel.to_le_bytes());
        }
    }

    /// Fill a rectangle with the given pixel value, clipped to the surface
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, pixel: u32) {
        let bytes = pixel.to_le_bytes();
        let pitch = self.pitch as usize;
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        if x >= x_end {
            return;
        }
        let span = (x as usize * 4)..(x_end as usize * 4);

        let mem = self.pixels_mut();
        for row in y..y_end {
            let row_offset = row as usize * pitch;
            let Some(line) = mem.get_mut(row_offset + span.start..row_offset + span.end) else {
                break;
            };
            for px in line.chunks_exact_mut(4) {
                px.copy_from_slice(&bytes);
            }
        }
    }

    /// Set every byte of the buffer, padding included
    pub fn fill_bytes(&mut self, byte: u8) {
        self.pixels_mut().fill(byte);
    }

    /// Unmap, remove the framebuffer and destroy the buffer
    ///
    /// Reports the first failure; later steps still run.
    pub fn release(mut self) -> Result<(), GfxError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), GfxError> {
        if !self.live {
            return Ok(());
        }
        self.live = false;

        drop(self.map.take());
        let fb = self.device.rm_fb(self.fb_id);
        let dumb = self.device.destroy_dumb(self.handle);
        debug!(
            "{}: released surface fb {} handle {}",
            self.device.name(),
            self.fb_id,
            self.handle
        );
        fb.and(dumb)
    }
}

impl Drop for Surface<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(
                "{}: releasing surface fb {} failed: {}",
                self.device.name(),
                self.fb_id,
                e
            );
        }
    }
}

impl core::fmt::Debug for Surface<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pitch", &self.pitch)
            .field("size", &self.size)
            .field("handle", &self.handle)
            .field("fb_id", &self.fb_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::simplegfx::{Failure, SimpleGfx};

    #[test]
    fn test_dumb_pitch_is_aligned() {
        let dumb = DumbBuffer::new(1, 100, 100, 32).unwrap();
        assert_eq!(dumb.pitch, 448);
        assert_eq!(dumb.size, 448 * 100);
    }

    #[test]
    fn test_dumb_pitch_overflow() {
        assert_eq!(DumbBuffer::new(1, 1_100_000_000, 1, 32), None);
        // Fits before alignment, overflows when rounded up
        assert_eq!(DumbBuffer::new(1, u32::MAX / 4, 1, 32), None);
    }

    #[test]
    fn test_allocate_maps_kernel_size() {
        let dev = SimpleGfx::new(1920, 1080);
        let surface = Surface::allocate(&dev, 100, 100).unwrap();

        assert!(surface.pitch() >= 100 * 4);
        assert_eq!(surface.pixels().len() as u64, surface.size());
        assert_ne!(surface.fb_id(), 0);
        assert_eq!(dev.live_framebuffers(), 1);
        assert_eq!(dev.live_dumb_buffers(), 1);
    }

    #[test]
    fn test_drop_releases_everything() {
        let dev = SimpleGfx::new(640, 480);
        {
            let _surface = Surface::allocate(&dev, 64, 64).unwrap();
        }
        assert_eq!(dev.live_framebuffers(), 0);
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_explicit_release() {
        let dev = SimpleGfx::new(640, 480);
        let surface = Surface::allocate(&dev, 64, 64).unwrap();
        surface.release().unwrap();
        assert_eq!(dev.live_framebuffers(), 0);
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_registration_failure_destroys_buffer() {
        let dev = SimpleGfx::builder().fail(Failure::AddFb).build();
        let err = Surface::allocate(&dev, 64, 64).unwrap_err();

        assert!(matches!(err, OverlayError::Registration { .. }));
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_mapping_failure_unwinds_framebuffer_and_buffer() {
        let dev = SimpleGfx::builder().fail(Failure::Mmap).build();
        let err = Surface::allocate(&dev, 64, 64).unwrap_err();

        assert!(matches!(err, OverlayError::Mapping { .. }));
        assert_eq!(dev.live_framebuffers(), 0);
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_map_dumb_failure_unwinds_framebuffer_and_buffer() {
        let dev = SimpleGfx::builder().fail(Failure::MapDumb).build();
        let err = Surface::allocate(&dev, 64, 64).unwrap_err();

        match err {
            OverlayError::Mapping { handle, source } => {
                assert_ne!(handle, 0);
                assert_eq!(source, GfxError::InvalidArg);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(dev.live_framebuffers(), 0);
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_oversized_allocation_fails_cleanly() {
        let dev = SimpleGfx::new(640, 480);
        let err = Surface::allocate(&dev, 1_100_000_000, 1).unwrap_err();

        assert!(matches!(
            err,
            OverlayError::Allocation {
                source: GfxError::InvalidArg,
                ..
            }
        ));
        assert_eq!(dev.live_dumb_buffers(), 0);
    }

    #[test]
    fn test_allocation_failure() {
        let dev = SimpleGfx::builder().fail(Failure::CreateDumb).build();
        let err = Surface::allocate(&dev, 64, 64).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::Allocation {
                width: 64,
                height: 64,
                ..
            }
        ));
    }

    #[test]
    fn test_pixel_math_uses_pitch() {
        let dev = SimpleGfx::new(640, 480);
        let mut surface = Surface::allocate(&dev, 10, 3).unwrap();
        let pitch = surface.pitch() as usize;
        assert!(pitch > 40);

        surface.put_pixel(0, 1, 0xAABB_CCDD);
        assert_eq!(&surface.pixels()[pitch..pitch + 4], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(surface.pixel(0, 1), Some(0xAABB_CCDD));

        // Out of bounds is ignored
        surface.put_pixel(10, 0, 0xFFFF_FFFF);
        assert_eq!(surface.pixel(10, 0), None);
        assert_eq!(surface.pixels()[40], 0);
    }

    #[test]
    fn test_fill_rect_clips() {
        let dev = SimpleGfx::new(640, 480);
        let mut surface = Surface::allocate(&dev, 8, 8).unwrap();
        surface.fill_rect(6, 6, 10, 10, 0x0012_3456);

        assert_eq!(surface.pixel(7, 7), Some(0x0012_3456));
        assert_eq!(surface.pixel(6, 6), Some(0x0012_3456));
        assert_eq!(surface.pixel(5, 6), Some(0));
    }
}
