//! Mode object property lookup
//!
//! Property IDs are assigned by the kernel at runtime and differ between
//! drivers and even between boots, so they are always resolved by name.
//! Nothing here caches: each lookup re-reads the object's property list.

use core::fmt;

use log::debug;

use super::mode::ObjectType;
use super::{GfxError, KmsDevice};
use crate::error::OverlayError;

/// Kernel-assigned property identifier
///
/// Never zero; a missing property is `None`, not a zero id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId(u32);

impl PropertyId {
    /// Wrap a raw id, rejecting zero
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One property of a mode object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    pub id: PropertyId,
    pub name: String,
    /// Value at the time the table was fetched
    pub value: u64,
}

/// Name to ID mapping of one object's properties
#[derive(Debug, Clone)]
pub struct PropertyTable {
    object_id: u32,
    object_type: ObjectType,
    entries: Vec<PropertyEntry>,
}

impl PropertyTable {
    /// Read every property of an object, with names
    ///
    /// Properties whose metadata can't be read are skipped.
    pub fn fetch(
        device: &dyn KmsDevice,
        object_id: u32,
        object_type: ObjectType,
    ) -> Result<Self, GfxError> {
        let raw = device.object_properties(object_id, object_type)?;
        let mut entries = Vec::with_capacity(raw.len());

        for (prop_id, value) in raw {
            let Some(id) = PropertyId::new(prop_id) else {
                continue;
            };
            match device.property_name(prop_id) {
                Ok(name) => entries.push(PropertyEntry { id, name, value }),
                Err(e) => debug!("{}: property {} unreadable: {}", device.name(), prop_id, e),
            }
        }

        Ok(Self {
            object_id,
            object_type,
            entries,
        })
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn entries(&self) -> &[PropertyEntry] {
        &self.entries
    }

    /// First property with exactly this name
    pub fn find(&self, name: &str) -> Option<&PropertyEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn id(&self, name: &str) -> Option<PropertyId> {
        self.find(name).map(|e| e.id)
    }

    pub fn value(&self, name: &str) -> Option<u64> {
        self.find(name).map(|e| e.value)
    }
}

/// Resolve a property name on one object
///
/// Scans the object's property list in kernel order and returns the first
/// property whose name matches exactly, or `None` if the object has no
/// such property. Failing to read the list itself is an error.
pub fn resolve(
    device: &dyn KmsDevice,
    object_id: u32,
    object_type: ObjectType,
    name: &str,
) -> Result<Option<PropertyId>, OverlayError> {
    let props = device
        .object_properties(object_id, object_type)
        .map_err(|source| OverlayError::ResourceQuery {
            what: "object properties",
            source,
        })?;

    for (prop_id, _) in props {
        let Some(id) = PropertyId::new(prop_id) else {
            continue;
        };
        // Unreadable metadata just means this entry can't be the match
        let Ok(prop_name) = device.property_name(prop_id) else {
            continue;
        };
        if prop_name == name {
            debug!("{} {}: {} = property {}", object_type, object_id, name, id);
            return Ok(Some(id));
        }
    }

    debug!("{} {}: no property {}", object_type, object_id, name);
    Ok(None)
}

/// Resolve a property that must exist
pub fn require(
    device: &dyn KmsDevice,
    object_id: u32,
    object_type: ObjectType,
    name: &str,
) -> Result<PropertyId, OverlayError> {
    resolve(device, object_id, object_type, name)?.ok_or_else(|| {
        OverlayError::PropertyNotFound {
            object_id,
            object_type,
            name: name.to_string(),
        }
    })
}

/// The ten plane properties that place a framebuffer on a CRTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneProps {
    pub fb_id: PropertyId,
    pub crtc_id: PropertyId,
    pub src_x: PropertyId,
    pub src_y: PropertyId,
    pub src_w: PropertyId,
    pub src_h: PropertyId,
    pub crtc_x: PropertyId,
    pub crtc_y: PropertyId,
    pub crtc_w: PropertyId,
    pub crtc_h: PropertyId,
}

impl PlaneProps {
    pub const NAMES: [&'static str; 10] = [
        "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W",
        "CRTC_H",
    ];

    /// Resolve all ten properties on `plane_id`
    ///
    /// Fails with `PropertyNotFound` naming the first missing property.
    pub fn resolve(device: &dyn KmsDevice, plane_id: u32) -> Result<Self, OverlayError> {
        let get = |name| require(device, plane_id, ObjectType::Plane, name);

        Ok(Self {
            fb_id: get("FB_ID")?,
            crtc_id: get("CRTC_ID")?,
            src_x: get("SRC_X")?,
            src_y: get("SRC_Y")?,
            src_w: get("SRC_W")?,
            src_h: get("SRC_H")?,
            crtc_x: get("CRTC_X")?,
            crtc_y: get("CRTC_Y")?,
            crtc_w: get("CRTC_W")?,
            crtc_h: get("CRTC_H")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::simplegfx::SimpleGfx;

    #[test]
    fn test_zero_is_not_a_property_id() {
        assert_eq!(PropertyId::new(0), None);
        assert_eq!(PropertyId::new(7).map(PropertyId::raw), Some(7));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let dev = SimpleGfx::new(1920, 1080);
        let plane = dev.overlay_plane_id();

        let first = resolve(&dev, plane, ObjectType::Plane, "CRTC_X").unwrap();
        let second = resolve(&dev, plane, ObjectType::Plane, "CRTC_X").unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_matches_exact_name() {
        let dev = SimpleGfx::new(1920, 1080);
        let plane = dev.overlay_plane_id();

        assert_eq!(resolve(&dev, plane, ObjectType::Plane, "crtc_x").unwrap(), None);
        assert_eq!(resolve(&dev, plane, ObjectType::Plane, "CRTC").unwrap(), None);
        assert_eq!(
            resolve(&dev, plane, ObjectType::Plane, "SRC_W").unwrap(),
            dev.property_id("SRC_W")
        );
    }

    #[test]
    fn test_require_reports_missing_property() {
        let dev = SimpleGfx::builder().omit_plane_property("SRC_H").build();
        let plane = dev.overlay_plane_id();

        let err = require(&dev, plane, ObjectType::Plane, "SRC_H").unwrap_err();
        match err {
            OverlayError::PropertyNotFound {
                object_id,
                object_type,
                name,
            } => {
                assert_eq!(object_id, plane);
                assert_eq!(object_type, ObjectType::Plane);
                assert_eq!(name, "SRC_H");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unknown_object_is_query_error() {
        let dev = SimpleGfx::new(1920, 1080);
        let err = resolve(&dev, 9999, ObjectType::Plane, "FB_ID").unwrap_err();
        assert!(matches!(err, OverlayError::ResourceQuery { .. }));
    }

    #[test]
    fn test_plane_props_resolve_all_ten() {
        let dev = SimpleGfx::new(1920, 1080);
        let props = PlaneProps::resolve(&dev, dev.overlay_plane_id()).unwrap();

        assert_eq!(Some(props.fb_id), dev.property_id("FB_ID"));
        assert_eq!(Some(props.crtc_h), dev.property_id("CRTC_H"));
        assert_ne!(props.src_x, props.src_y);
    }

    #[test]
    fn test_plane_props_stop_at_first_missing() {
        let dev = SimpleGfx::builder().omit_plane_property("CRTC_W").build();
        let err = PlaneProps::resolve(&dev, dev.overlay_plane_id()).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::PropertyNotFound { ref name, .. } if name == "CRTC_W"
        ));
    }

    #[test]
    fn test_table_reads_type_value() {
        let dev = SimpleGfx::new(1920, 1080);
        let table = PropertyTable::fetch(&dev, dev.overlay_plane_id(), ObjectType::Plane).unwrap();

        assert_eq!(table.value("type"), Some(crate::gfx::ioctl::GFX_PLANE_TYPE_OVERLAY));
        assert_eq!(table.id("FB_ID"), dev.property_id("FB_ID"));
        assert!(table.find("nonexistent").is_none());
    }
}
