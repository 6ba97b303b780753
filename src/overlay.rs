//! Overlay presentation
//!
//! Puts a full-screen primary surface on the display with a legacy CRTC
//! update, then an overlay surface on a hardware plane with one atomic
//! commit. The call sequence:
//!
//! 1. discover connector, mode, CRTC and compatible planes
//! 2. allocate and fill the primary surface, set the CRTC to it
//! 3. allocate the overlay surface, draw the crosshair into it
//! 4. pick the overlay plane and resolve its ten placement properties
//! 5. build the atomic request and commit it, non-blocking
//!
//! Any failure releases what was acquired so far and is returned as is.

use std::path::PathBuf;

use log::info;

use crate::cmdline::{Config, DeviceSelect};
use crate::error::{OverlayError, OverlayResult};
use crate::gfx::atomic::{self, AtomicFlags, OverlayPlacement};
use crate::gfx::card::Card;
use crate::gfx::discover::{discover, select_overlay_plane, Topology};
use crate::gfx::draw;
use crate::gfx::dumb::Surface;
use crate::gfx::props::PlaneProps;
use crate::gfx::simplegfx::SimpleGfx;
use crate::gfx::{negotiate_caps, GfxError, KmsDevice};

/// Open the configured device
pub fn open_device(config: &Config) -> OverlayResult<Box<dyn KmsDevice>> {
    match &config.device {
        DeviceSelect::Path(path) => Ok(Box::new(Card::open(path)?)),
        DeviceSelect::Virtual => {
            let (width, height) = config.virtual_mode;
            let dev = SimpleGfx::new(width, height);
            negotiate_caps(&dev).map_err(|e| OverlayError::DeviceOpen {
                path: PathBuf::from("virtual"),
                source: e.into(),
            })?;
            info!("using virtual device with a {}x{} display", width, height);
            Ok(Box::new(dev))
        }
    }
}

/// The primary and overlay surfaces while they are on screen
///
/// Dropping it releases the overlay surface first, then the primary one.
pub struct Presentation<'d> {
    // Field order is drop order
    overlay: Surface<'d>,
    primary: Surface<'d>,
    topology: Topology,
    plane_id: u32,
    placement: OverlayPlacement,
}

impl<'d> Presentation<'d> {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Plane carrying the overlay
    pub fn plane_id(&self) -> u32 {
        self.plane_id
    }

    pub fn placement(&self) -> &OverlayPlacement {
        &self.placement
    }

    pub fn primary(&self) -> &Surface<'d> {
        &self.primary
    }

    pub fn overlay(&self) -> &Surface<'d> {
        &self.overlay
    }

    /// Release both surfaces, overlay first
    ///
    /// Both are always released; the first failure is reported.
    pub fn release(self) -> Result<(), GfxError> {
        let overlay = self.overlay.release();
        let primary = self.primary.release();
        overlay.and(primary)
    }
}

/// Show the configured overlay centred on the first connected display
pub fn present<'d>(device: &'d dyn KmsDevice, config: &Config) -> OverlayResult<Presentation<'d>> {
    let topology = discover(device)?;
    let (width, height) = (topology.mode.width(), topology.mode.height());

    let mut primary = Surface::allocate(device, width, height)?;
    draw::fill_background(&mut primary, config.background);

    device
        .set_crtc(
            topology.crtc.id,
            primary.fb_id(),
            0,
            0,
            &[topology.connector.id],
            Some(&topology.mode),
        )
        .map_err(|source| OverlayError::CrtcConfig {
            crtc_id: topology.crtc.id,
            fb_id: primary.fb_id(),
            source,
        })?;
    info!(
        "{}: crtc {} showing primary fb {}",
        device.name(),
        topology.crtc.id,
        primary.fb_id()
    );

    let mut overlay = Surface::allocate(device, config.overlay_width, config.overlay_height)?;
    draw::clear(&mut overlay);
    let center = config.cross.unwrap_or_else(|| draw::center_of(&overlay));
    draw::draw_cross(&mut overlay, center, config.thickness, config.color);

    let plane_id = select_overlay_plane(device, &topology)?.id;
    let props = PlaneProps::resolve(device, plane_id)?;

    let placement = OverlayPlacement::centered(
        overlay.fb_id(),
        topology.crtc.id,
        (width, height),
        overlay.width(),
        overlay.height(),
    );
    let req = atomic::overlay_request(plane_id, &props, &placement)?;
    atomic::commit(device, &req, AtomicFlags::NONBLOCK)?;

    Ok(Presentation {
        overlay,
        primary,
        topology,
        plane_id,
        placement,
    })
}
