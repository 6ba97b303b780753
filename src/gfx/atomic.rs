//! Atomic mode-setting requests
//!
//! An [`AtomicRequest`] collects (object, property, value) assignments that
//! the kernel validates and applies as one unit: either every assignment
//! takes effect or none does.

use bitflags::bitflags;
use log::{debug, info};

use super::props::{PlaneProps, PropertyId};
use super::KmsDevice;
use crate::error::OverlayError;

bitflags! {
    /// `DRM_MODE_ATOMIC_*` / `DRM_MODE_PAGE_FLIP_*` commit flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtomicFlags: u32 {
        const PAGE_FLIP_EVENT = 0x01;
        const PAGE_FLIP_ASYNC = 0x02;
        /// Validate only, change nothing
        const TEST_ONLY = 0x0100;
        /// Return once queued instead of waiting for the hardware
        const NONBLOCK = 0x0200;
        const ALLOW_MODESET = 0x0400;
    }
}

/// One property assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicEntry {
    pub object_id: u32,
    pub property: PropertyId,
    pub value: u64,
}

/// Parallel arrays in the layout `DRM_IOCTL_MODE_ATOMIC` expects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicPayload {
    pub objs: Vec<u32>,
    pub count_props: Vec<u32>,
    pub props: Vec<u32>,
    pub values: Vec<u64>,
}

/// Batch of property assignments submitted in one commit
#[derive(Debug, Clone, Default)]
pub struct AtomicRequest {
    entries: Vec<AtomicEntry>,
}

impl AtomicRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `property = value` on `object_id`
    ///
    /// Rejects object id 0 and a second assignment to the same property of
    /// the same object.
    pub fn add_property(
        &mut self,
        object_id: u32,
        property: PropertyId,
        value: u64,
    ) -> Result<(), OverlayError> {
        if object_id == 0 {
            return Err(OverlayError::PropertyAdd {
                object_id,
                property_id: property.raw(),
                reason: "object id 0",
            });
        }
        if self
            .entries
            .iter()
            .any(|e| e.object_id == object_id && e.property == property)
        {
            return Err(OverlayError::PropertyAdd {
                object_id,
                property_id: property.raw(),
                reason: "property already set in this request",
            });
        }

        self.entries.push(AtomicEntry {
            object_id,
            property,
            value,
        });
        Ok(())
    }

    /// Assignments in insertion order
    pub fn entries(&self) -> &[AtomicEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Group the assignments per object for the ioctl
    ///
    /// Objects appear in order of first use; each object's properties keep
    /// their insertion order.
    pub fn payload(&self) -> AtomicPayload {
        let mut payload = AtomicPayload::default();

        for entry in &self.entries {
            if payload.objs.contains(&entry.object_id) {
                continue;
            }
            payload.objs.push(entry.object_id);

            let mut count = 0;
            for e in self.entries.iter().filter(|e| e.object_id == entry.object_id) {
                payload.props.push(e.property.raw());
                payload.values.push(e.value);
                count += 1;
            }
            payload.count_props.push(count);
        }

        payload
    }
}

/// Submit `req` as a single commit
pub fn commit(
    device: &dyn KmsDevice,
    req: &AtomicRequest,
    flags: AtomicFlags,
) -> Result<(), OverlayError> {
    debug!(
        "{}: atomic commit of {} properties, flags {:?}",
        device.name(),
        req.len(),
        flags
    );
    device
        .atomic_commit(req, flags)
        .map_err(|source| OverlayError::Commit {
            entries: req.len(),
            source,
        })
}

/// Pixel value in 16.16 fixed point, as plane source coordinates use
pub const fn fixed_16_16(px: u32) -> u64 {
    (px as u64) << 16
}

/// Encode a signed value for a 64-bit property slot
pub const fn signed_value(v: i32) -> u64 {
    v as i64 as u64
}

/// Where a framebuffer is cropped from and shown on a CRTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPlacement {
    pub fb_id: u32,
    pub crtc_id: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub dst_x: i32,
    pub dst_y: i32,
    pub dst_width: u32,
    pub dst_height: u32,
}

impl OverlayPlacement {
    /// Show the whole `width` x `height` framebuffer centred on the screen
    ///
    /// The overlay is expected to fit the screen; a larger one gets
    /// negative coordinates and the kernel decides whether to accept it.
    pub fn centered(
        fb_id: u32,
        crtc_id: u32,
        screen: (u32, u32),
        width: u32,
        height: u32,
    ) -> Self {
        let center = |screen: u32, size: u32| ((screen as i64 - size as i64) / 2) as i32;

        Self {
            fb_id,
            crtc_id,
            src_width: width,
            src_height: height,
            dst_x: center(screen.0, width),
            dst_y: center(screen.1, height),
            dst_width: width,
            dst_height: height,
        }
    }
}

/// Build the ten-property request that puts the overlay on `plane_id`
pub fn overlay_request(
    plane_id: u32,
    props: &PlaneProps,
    placement: &OverlayPlacement,
) -> Result<AtomicRequest, OverlayError> {
    let mut req = AtomicRequest::new();

    req.add_property(plane_id, props.fb_id, placement.fb_id as u64)?;
    req.add_property(plane_id, props.crtc_id, placement.crtc_id as u64)?;
    req.add_property(plane_id, props.src_x, 0)?;
    req.add_property(plane_id, props.src_y, 0)?;
    req.add_property(plane_id, props.src_w, fixed_16_16(placement.src_width))?;
    req.add_property(plane_id, props.src_h, fixed_16_16(placement.src_height))?;
    req.add_property(plane_id, props.crtc_x, signed_value(placement.dst_x))?;
    req.add_property(plane_id, props.crtc_y, signed_value(placement.dst_y))?;
    req.add_property(plane_id, props.crtc_w, placement.dst_width as u64)?;
    req.add_property(plane_id, props.crtc_h, placement.dst_height as u64)?;

    info!(
        "overlay fb {} on plane {}: {}x{} at ({}, {})",
        placement.fb_id,
        plane_id,
        placement.dst_width,
        placement.dst_height,
        placement.dst_x,
        placement.dst_y
    );
    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: u32) -> PropertyId {
        PropertyId::new(raw).unwrap()
    }

    fn test_props() -> PlaneProps {
        PlaneProps {
            fb_id: pid(10),
            crtc_id: pid(11),
            src_x: pid(12),
            src_y: pid(13),
            src_w: pid(14),
            src_h: pid(15),
            crtc_x: pid(16),
            crtc_y: pid(17),
            crtc_w: pid(18),
            crtc_h: pid(19),
        }
    }

    #[test]
    fn test_centered_full_hd() {
        let p = OverlayPlacement::centered(5, 3, (1920, 1080), 100, 100);
        assert_eq!((p.dst_x, p.dst_y), (910, 490));
        assert_eq!((p.dst_width, p.dst_height), (100, 100));
    }

    #[test]
    fn test_oversized_overlay_goes_negative() {
        let p = OverlayPlacement::centered(5, 3, (640, 480), 800, 600);
        assert_eq!((p.dst_x, p.dst_y), (-80, -60));
        assert_eq!(signed_value(p.dst_x), (-80i64) as u64);
    }

    #[test]
    fn test_fixed_point_source_size() {
        assert_eq!(fixed_16_16(100), 6_553_600);
        assert_eq!(fixed_16_16(100) >> 16, 100);
    }

    #[test]
    fn test_overlay_request_has_ten_entries() {
        let placement = OverlayPlacement::centered(42, 7, (1920, 1080), 100, 100);
        let req = overlay_request(30, &test_props(), &placement).unwrap();

        assert_eq!(req.len(), 10);
        assert!(req.entries().iter().all(|e| e.object_id == 30));

        let value_of = |prop: u32| {
            req.entries()
                .iter()
                .find(|e| e.property.raw() == prop)
                .map(|e| e.value)
        };
        assert_eq!(value_of(10), Some(42));
        assert_eq!(value_of(11), Some(7));
        assert_eq!(value_of(12), Some(0));
        assert_eq!(value_of(14), Some(100 << 16));
        assert_eq!(value_of(15), Some(100 << 16));
        assert_eq!(value_of(16), Some(910));
        assert_eq!(value_of(17), Some(490));
        assert_eq!(value_of(18), Some(100));
    }

    #[test]
    fn test_add_rejects_object_zero() {
        let mut req = AtomicRequest::new();
        let err = req.add_property(0, pid(1), 0).unwrap_err();
        assert!(matches!(err, OverlayError::PropertyAdd { object_id: 0, .. }));
        assert!(req.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicate_assignment() {
        let mut req = AtomicRequest::new();
        req.add_property(30, pid(1), 5).unwrap();
        assert!(req.add_property(30, pid(1), 6).is_err());
        // Same property on another object is fine
        req.add_property(31, pid(1), 6).unwrap();
        assert_eq!(req.len(), 2);
    }

    #[test]
    fn test_payload_groups_by_object() {
        let mut req = AtomicRequest::new();
        req.add_property(30, pid(1), 100).unwrap();
        req.add_property(40, pid(2), 200).unwrap();
        req.add_property(30, pid(3), 300).unwrap();

        let payload = req.payload();
        assert_eq!(payload.objs, vec![30, 40]);
        assert_eq!(payload.count_props, vec![2, 1]);
        assert_eq!(payload.props, vec![1, 3, 2]);
        assert_eq!(payload.values, vec![100, 300, 200]);
    }

    #[test]
    fn test_flags_match_kernel_values() {
        assert_eq!(AtomicFlags::NONBLOCK.bits(), 0x200);
        assert_eq!(
            (AtomicFlags::PAGE_FLIP_EVENT | AtomicFlags::PAGE_FLIP_ASYNC).bits(),
            0x3
        );
        assert_eq!(
            (AtomicFlags::TEST_ONLY | AtomicFlags::ALLOW_MODESET).bits(),
            0x500
        );
    }
}
