//! DRM Mode Setting Objects
//!
//! Owned snapshots of the KMS (Kernel Mode Setting) objects read back from
//! a device:
//! - Connector: physical display output (HDMI, DP, eDP, etc.)
//! - Encoder: converts pixel stream to connector-specific signal
//! - CRTC: scanout engine that reads framebuffer and drives encoder
//! - Plane: a scanout source composited onto a CRTC
//!
//! Snapshots are not kept in sync with the hardware; re-query to observe
//! changes.

use core::fmt;

use super::ioctl::{
    GFX_MODE_CONNECTED, GFX_MODE_DISCONNECTED, GFX_MODE_OBJECT_CONNECTOR, GFX_MODE_OBJECT_CRTC,
    GFX_MODE_OBJECT_ENCODER, GFX_MODE_OBJECT_PLANE,
};

/// Display mode information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    /// Pixel clock in kHz
    pub clock: u32,
    /// Horizontal display size
    pub hdisplay: u16,
    /// Horizontal sync start
    pub hsync_start: u16,
    /// Horizontal sync end
    pub hsync_end: u16,
    /// Horizontal total (including blanking)
    pub htotal: u16,
    pub hskew: u16,
    /// Vertical display size
    pub vdisplay: u16,
    /// Vertical sync start
    pub vsync_start: u16,
    /// Vertical sync end
    pub vsync_end: u16,
    /// Vertical total (including blanking)
    pub vtotal: u16,
    pub vscan: u16,
    /// Refresh rate in Hz
    pub vrefresh: u32,
    /// Mode flags (interlace, doublescan, etc.)
    pub flags: u32,
    /// Mode type (preferred, driver, etc.)
    pub type_: u32,
    /// Mode name (e.g., "1920x1080")
    pub name: String,
}

impl DisplayMode {
    /// Create a new mode from basic parameters
    pub fn new(width: u16, height: u16, refresh: u32) -> Self {
        // Simple blanking estimates (not accurate for real hardware)
        let hdisplay = width;
        let vdisplay = height;
        let htotal = hdisplay.saturating_add(hdisplay / 10);
        let vtotal = vdisplay.saturating_add(vdisplay / 20);

        let hsync_start = hdisplay.saturating_add(10);
        let hsync_end = hsync_start.saturating_add(40);
        let vsync_start = vdisplay.saturating_add(3);
        let vsync_end = vsync_start.saturating_add(6);

        // Pixel clock: pixels * refresh, in kHz
        let clock = (htotal as u64 * vtotal as u64 * refresh as u64 / 1000) as u32;

        Self {
            clock,
            hdisplay,
            hsync_start,
            hsync_end,
            htotal,
            hskew: 0,
            vdisplay,
            vsync_start,
            vsync_end,
            vtotal,
            vscan: 0,
            vrefresh: refresh,
            flags: 0,
            type_: 1 << 3, // DRM_MODE_TYPE_PREFERRED
            name: format!("{}x{}", width, height),
        }
    }

    /// Active width in pixels
    pub fn width(&self) -> u32 {
        self.hdisplay as u32
    }

    /// Active height in pixels
    pub fn height(&self) -> u32 {
        self.vdisplay as u32
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}@{})",
            self.name, self.hdisplay, self.vdisplay, self.vrefresh
        )
    }
}

/// Mode object type tag, as passed to property queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Crtc,
    Connector,
    Encoder,
    Plane,
}

impl ObjectType {
    /// Raw `DRM_MODE_OBJECT_*` value
    pub const fn raw(self) -> u32 {
        match self {
            ObjectType::Crtc => GFX_MODE_OBJECT_CRTC,
            ObjectType::Connector => GFX_MODE_OBJECT_CONNECTOR,
            ObjectType::Encoder => GFX_MODE_OBJECT_ENCODER,
            ObjectType::Plane => GFX_MODE_OBJECT_PLANE,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Crtc => "crtc",
            ObjectType::Connector => "connector",
            ObjectType::Encoder => "encoder",
            ObjectType::Plane => "plane",
        };
        f.write_str(name)
    }
}

/// DRM Connector - represents a physical display output
#[derive(Debug, Clone)]
pub struct Connector {
    /// Unique connector ID
    pub id: u32,
    /// Connector type (VGA, HDMI, DP, etc.)
    pub connector_type: u32,
    /// Connector type ID (for multiple connectors of same type)
    pub connector_type_id: u32,
    /// Connection status
    pub connection: u32,
    /// Currently attached encoder ID (0 if none)
    pub encoder_id: u32,
    /// List of compatible encoder IDs
    pub encoder_ids: Vec<u32>,
    /// Available display modes
    pub modes: Vec<DisplayMode>,
    /// Physical width in mm
    pub mm_width: u32,
    /// Physical height in mm
    pub mm_height: u32,
    /// Subpixel order
    pub subpixel: u32,
}

impl Connector {
    /// Create a new connector
    pub fn new(id: u32, connector_type: u32, connector_type_id: u32) -> Self {
        Self {
            id,
            connector_type,
            connector_type_id,
            connection: GFX_MODE_DISCONNECTED,
            encoder_id: 0,
            encoder_ids: Vec::new(),
            modes: Vec::new(),
            mm_width: 0,
            mm_height: 0,
            subpixel: 0, // DRM_MODE_SUBPIXEL_UNKNOWN
        }
    }

    /// Set connection status to connected with the given mode
    pub fn set_connected(&mut self, mode: DisplayMode) {
        self.connection = GFX_MODE_CONNECTED;
        self.modes.clear();
        self.modes.push(mode);
    }

    /// Add a compatible encoder
    pub fn add_encoder(&mut self, encoder_id: u32) {
        if !self.encoder_ids.contains(&encoder_id) {
            self.encoder_ids.push(encoder_id);
        }
    }

    /// Connected and advertising at least one mode
    pub fn is_usable(&self) -> bool {
        self.connection == GFX_MODE_CONNECTED && !self.modes.is_empty()
    }
}

/// DRM Encoder - converts pixel data to connector-specific format
#[derive(Debug, Clone)]
pub struct Encoder {
    /// Unique encoder ID
    pub id: u32,
    /// Encoder type (DAC, TMDS, LVDS, etc.)
    pub encoder_type: u32,
    /// Currently attached CRTC ID (0 if none)
    pub crtc_id: u32,
    /// Bitmask of possible CRTCs
    pub possible_crtcs: u32,
    /// Bitmask of possible clone encoders
    pub possible_clones: u32,
}

impl Encoder {
    /// Create a new encoder
    pub fn new(id: u32, encoder_type: u32) -> Self {
        Self {
            id,
            encoder_type,
            crtc_id: 0,
            possible_crtcs: 0,
            possible_clones: 0,
        }
    }
}

/// DRM CRTC handle
///
/// `index` is the CRTC's position in the device's resource list; bit
/// `index` of a plane's or encoder's `possible_crtcs` mask refers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crtc {
    pub id: u32,
    pub index: usize,
}

impl Crtc {
    /// Bit of this CRTC in a `possible_crtcs` mask, `0` past bit 31
    pub fn mask(&self) -> u32 {
        1u32.checked_shl(self.index as u32).unwrap_or(0)
    }
}

/// DRM Plane - a scanout source composited onto a CRTC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub id: u32,
    /// CRTC currently fed by this plane (0 if none)
    pub crtc_id: u32,
    /// Framebuffer currently scanned out (0 if none)
    pub fb_id: u32,
    /// Bitmask of CRTC indices this plane can be attached to
    pub possible_crtcs: u32,
    pub gamma_size: u32,
    /// Supported fourcc pixel formats
    pub formats: Vec<u32>,
}

impl Plane {
    /// Whether this plane can be composited onto `crtc`
    pub fn supports(&self, crtc: &Crtc) -> bool {
        self.possible_crtcs & crtc.mask() != 0
    }
}

/// Mode resources - collection of all mode objects
#[derive(Debug, Clone, Default)]
pub struct ModeResources {
    /// List of connector IDs
    pub connector_ids: Vec<u32>,
    /// List of encoder IDs
    pub encoder_ids: Vec<u32>,
    /// List of CRTC IDs, in hardware index order
    pub crtc_ids: Vec<u32>,
    /// List of framebuffer IDs
    pub fb_ids: Vec<u32>,
    /// Minimum supported width
    pub min_width: u32,
    /// Maximum supported width
    pub max_width: u32,
    /// Minimum supported height
    pub min_height: u32,
    /// Maximum supported height
    pub max_height: u32,
}

impl ModeResources {
    /// Create new empty mode resources
    pub fn new() -> Self {
        Self {
            connector_ids: Vec::new(),
            encoder_ids: Vec::new(),
            crtc_ids: Vec::new(),
            fb_ids: Vec::new(),
            min_width: 0,
            max_width: 8192,
            min_height: 0,
            max_height: 8192,
        }
    }

    /// Look up a CRTC by id, resolving its hardware index
    pub fn crtc(&self, crtc_id: u32) -> Option<Crtc> {
        self.crtc_ids
            .iter()
            .position(|&id| id == crtc_id)
            .map(|index| Crtc { id: crtc_id, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crtc_index_from_resource_order() {
        let mut res = ModeResources::new();
        res.crtc_ids = vec![31, 47, 63];

        assert_eq!(res.crtc(47), Some(Crtc { id: 47, index: 1 }));
        assert_eq!(res.crtc(99), None);
    }

    #[test]
    fn test_plane_supports_uses_crtc_index_bit() {
        let plane = Plane {
            id: 10,
            crtc_id: 0,
            fb_id: 0,
            possible_crtcs: 0b010,
            gamma_size: 0,
            formats: Vec::new(),
        };

        assert!(!plane.supports(&Crtc { id: 31, index: 0 }));
        assert!(plane.supports(&Crtc { id: 47, index: 1 }));
        assert!(!plane.supports(&Crtc { id: 99, index: 40 }));
    }

    #[test]
    fn test_connector_usable_needs_connection_and_modes() {
        let mut conn = Connector::new(1, 11, 1);
        assert!(!conn.is_usable());

        conn.connection = GFX_MODE_CONNECTED;
        assert!(!conn.is_usable());

        conn.set_connected(DisplayMode::new(640, 480, 60));
        assert!(conn.is_usable());
    }

    #[test]
    fn test_mode_new_names_by_size() {
        let mode = DisplayMode::new(1920, 1080, 60);
        assert_eq!(mode.name, "1920x1080");
        assert_eq!(mode.width(), 1920);
        assert_eq!(mode.height(), 1080);
        assert!(mode.htotal > mode.hdisplay);
    }
}
