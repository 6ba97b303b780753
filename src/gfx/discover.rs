//! Display topology discovery
//!
//! Finds the first connected connector with a mode, follows it through its
//! encoder to the driving CRTC, and lists the planes that can be composited
//! onto that CRTC.

use log::{debug, info};

use super::ioctl::GFX_PLANE_TYPE_OVERLAY;
use super::mode::{Connector, Crtc, DisplayMode, ObjectType, Plane};
use super::props::PropertyTable;
use super::KmsDevice;
use crate::error::OverlayError;

/// Connector, mode, CRTC and compatible planes of one display
#[derive(Debug, Clone)]
pub struct Topology {
    pub connector: Connector,
    /// First mode of the connector's list
    pub mode: DisplayMode,
    pub crtc: Crtc,
    /// Planes whose `possible_crtcs` includes `crtc`, in device order
    pub planes: Vec<Plane>,
}

/// Discover the display to drive
pub fn discover(device: &dyn KmsDevice) -> Result<Topology, OverlayError> {
    let resources = device
        .get_resources()
        .map_err(|source| OverlayError::ResourceQuery {
            what: "mode resources",
            source,
        })?;

    let connector = resources
        .connector_ids
        .iter()
        .filter_map(|&id| match device.get_connector(id) {
            Ok(conn) => Some(conn),
            Err(e) => {
                debug!("{}: connector {} unreadable: {}", device.name(), id, e);
                None
            }
        })
        .find(Connector::is_usable)
        .ok_or(OverlayError::NoDisplay)?;

    // No preference scoring: the first mode is the one we drive
    let mode = connector.modes[0].clone();
    info!(
        "{}: connector {} using mode {}",
        device.name(),
        connector.id,
        mode
    );

    if connector.encoder_id == 0 {
        return Err(OverlayError::NoCrtc {
            connector_id: connector.id,
        });
    }
    let encoder = device
        .get_encoder(connector.encoder_id)
        .map_err(|source| OverlayError::ResourceQuery {
            what: "encoder",
            source,
        })?;

    // The index comes from the CRTC's position in the resource list
    let crtc = resources
        .crtc(encoder.crtc_id)
        .filter(|c| c.id != 0)
        .ok_or(OverlayError::NoCrtc {
            connector_id: connector.id,
        })?;
    info!(
        "{}: encoder {} drives crtc {} (index {})",
        device.name(),
        encoder.id,
        crtc.id,
        crtc.index
    );

    let planes = compatible_planes(device, &crtc)?;
    if planes.is_empty() {
        return Err(OverlayError::NoPlane { crtc_id: crtc.id });
    }

    Ok(Topology {
        connector,
        mode,
        crtc,
        planes,
    })
}

/// Planes that can be attached to `crtc`
pub fn compatible_planes(device: &dyn KmsDevice, crtc: &Crtc) -> Result<Vec<Plane>, OverlayError> {
    let plane_ids = device
        .get_plane_ids()
        .map_err(|source| OverlayError::ResourceQuery {
            what: "plane resources",
            source,
        })?;

    let planes: Vec<Plane> = plane_ids
        .into_iter()
        .filter_map(|id| match device.get_plane(id) {
            Ok(plane) => Some(plane),
            Err(e) => {
                debug!("{}: plane {} unreadable: {}", device.name(), id, e);
                None
            }
        })
        .filter(|plane| plane.supports(crtc))
        .collect();

    debug!(
        "{}: {} plane(s) compatible with crtc {}",
        device.name(),
        planes.len(),
        crtc.id
    );
    Ok(planes)
}

/// Pick the plane to carry the overlay
///
/// Prefers the first plane whose `type` property says overlay. When no
/// plane reports a type at all, falls back to the first plane that isn't
/// scanning out a framebuffer.
pub fn select_overlay_plane<'t>(
    device: &dyn KmsDevice,
    topology: &'t Topology,
) -> Result<&'t Plane, OverlayError> {
    let mut any_typed = false;

    for plane in &topology.planes {
        let plane_type = PropertyTable::fetch(device, plane.id, ObjectType::Plane)
            .ok()
            .and_then(|table| table.value("type"));

        match plane_type {
            Some(GFX_PLANE_TYPE_OVERLAY) => {
                info!("{}: using overlay plane {}", device.name(), plane.id);
                return Ok(plane);
            }
            Some(_) => any_typed = true,
            None => {}
        }
    }

    if !any_typed {
        if let Some(plane) = topology.planes.iter().find(|p| p.fb_id == 0) {
            info!("{}: using untyped plane {}", device.name(), plane.id);
            return Ok(plane);
        }
    }

    Err(OverlayError::NoPlane {
        crtc_id: topology.crtc.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::ioctl::{GFX_MODE_DISCONNECTED, GFX_MODE_UNKNOWNCONNECTION};
    use crate::gfx::simplegfx::SimpleGfx;

    #[test]
    fn test_discover_default_topology() {
        let dev = SimpleGfx::new(1920, 1080);
        let topo = discover(&dev).unwrap();

        assert_eq!(topo.mode.width(), 1920);
        assert_eq!(topo.mode.height(), 1080);
        assert_eq!(topo.crtc.index, 0);
        assert_eq!(topo.planes.len(), 2);
    }

    #[test]
    fn test_no_connected_connector() {
        let dev = SimpleGfx::builder().connection(GFX_MODE_DISCONNECTED).build();
        assert!(matches!(discover(&dev), Err(OverlayError::NoDisplay)));
    }

    #[test]
    fn test_unknown_connection_is_not_usable() {
        let dev = SimpleGfx::builder()
            .connection(GFX_MODE_UNKNOWNCONNECTION)
            .build();
        assert!(matches!(discover(&dev), Err(OverlayError::NoDisplay)));
    }

    #[test]
    fn test_connected_without_modes_is_no_display() {
        let dev = SimpleGfx::builder().without_modes().build();
        assert!(matches!(discover(&dev), Err(OverlayError::NoDisplay)));
    }

    #[test]
    fn test_encoder_without_crtc() {
        let dev = SimpleGfx::builder().inactive().build();
        assert!(matches!(discover(&dev), Err(OverlayError::NoCrtc { .. })));
    }

    #[test]
    fn test_crtc_index_drives_plane_filter() {
        // Display on the second CRTC; the overlay plane only fits index 1
        let dev = SimpleGfx::builder()
            .crtcs(3)
            .active_crtc(1)
            .overlay_possible_crtcs(0b010)
            .primary_possible_crtcs(0b001)
            .build();
        let topo = discover(&dev).unwrap();

        assert_eq!(topo.crtc.index, 1);
        assert_eq!(topo.crtc.id, dev.crtc_id(1));
        assert_eq!(topo.planes.len(), 1);
        assert_eq!(topo.planes[0].id, dev.overlay_plane_id());
    }

    #[test]
    fn test_no_compatible_plane() {
        let dev = SimpleGfx::builder()
            .crtcs(2)
            .active_crtc(1)
            .overlay_possible_crtcs(0b001)
            .primary_possible_crtcs(0b001)
            .build();
        assert!(matches!(discover(&dev), Err(OverlayError::NoPlane { .. })));
    }

    #[test]
    fn test_select_prefers_overlay_type() {
        let dev = SimpleGfx::new(1920, 1080);
        let topo = discover(&dev).unwrap();
        // The primary plane is listed first
        assert_eq!(topo.planes[0].id, dev.primary_plane_id());

        let plane = select_overlay_plane(&dev, &topo).unwrap();
        assert_eq!(plane.id, dev.overlay_plane_id());
    }

    #[test]
    fn test_select_without_overlay_type_fails() {
        let dev = SimpleGfx::builder().without_overlay_plane().build();
        let topo = discover(&dev).unwrap();
        assert!(matches!(
            select_overlay_plane(&dev, &topo),
            Err(OverlayError::NoPlane { .. })
        ));
    }

    #[test]
    fn test_select_untyped_plane_that_is_idle() {
        let dev = SimpleGfx::builder().omit_plane_property("type").build();
        let topo = discover(&dev).unwrap();
        let plane = select_overlay_plane(&dev, &topo).unwrap();

        // The primary plane is scanning out, so the idle one is chosen
        assert_eq!(plane.id, dev.overlay_plane_id());
    }
}
