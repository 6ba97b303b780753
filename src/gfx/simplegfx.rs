//! Virtual KMS device
//!
//! An in-memory DRM device that needs no hardware. It exposes a small
//! topology through the same [`KmsDevice`] operations a card node does:
//!
//! - N connectors, the last of which carries the display
//! - 1 encoder (virtual) routed to one of the CRTCs
//! - 1..N CRTCs, the routed one scanning out a boot framebuffer
//! - a primary plane showing the boot framebuffer and an idle overlay plane
//!
//! Dumb buffers are backed by heap memory. Atomic commits are validated
//! against the topology (unknown objects or properties, framebuffer and
//! CRTC references, `possible_crtcs`) and recorded for inspection. As on a
//! real device, they are refused until the client enables the atomic cap.
//!
//! Every piece of the topology can be altered through [`SimpleGfxBuilder`]
//! so the failure paths of discovery and allocation can be exercised.

use spin::Mutex;

use super::atomic::{AtomicEntry, AtomicFlags, AtomicRequest};
use super::dumb::{DumbBuffer, Mapping};
use super::ioctl::{
    GFX_CAP_DUMB_BUFFER, GFX_CLIENT_CAP_ATOMIC, GFX_CLIENT_CAP_UNIVERSAL_PLANES,
    GFX_FORMAT_ARGB8888, GFX_FORMAT_XRGB8888, GFX_MODE_CONNECTED, GFX_MODE_CONNECTOR_VIRTUAL,
    GFX_MODE_DISCONNECTED, GFX_MODE_ENCODER_VIRTUAL, GFX_PLANE_TYPE_OVERLAY,
    GFX_PLANE_TYPE_PRIMARY,
};
use super::mode::{Connector, DisplayMode, Encoder, ModeResources, ObjectType, Plane};
use super::props::PropertyId;
use super::{GfxError, KmsDevice, BPP, BYTES_PER_PIXEL, DEPTH};

/// Device operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    CreateDumb,
    AddFb,
    MapDumb,
    Mmap,
    SetCrtc,
    AtomicCommit,
}

/// One call to `atomic_commit`, accepted or not
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub flags: AtomicFlags,
    pub entries: Vec<AtomicEntry>,
    pub result: Result<(), GfxError>,
}

// Property ids are global, as the kernel's are
const PROPERTIES: [(u32, &str); 13] = [
    (100, "type"),
    (101, "FB_ID"),
    (102, "CRTC_ID"),
    (103, "SRC_X"),
    (104, "SRC_Y"),
    (105, "SRC_W"),
    (106, "SRC_H"),
    (107, "CRTC_X"),
    (108, "CRTC_Y"),
    (109, "CRTC_W"),
    (110, "CRTC_H"),
    (111, "ACTIVE"),
    (112, "DPMS"),
];

fn prop(name: &str) -> u32 {
    PROPERTIES
        .iter()
        .find(|(_, n)| *n == name)
        .map_or(0, |(id, _)| *id)
}

#[derive(Debug, Clone)]
struct PlaneState {
    id: u32,
    possible_crtcs: u32,
    props: Vec<(u32, u64)>,
}

impl PlaneState {
    fn value(&self, name: &str) -> u64 {
        let id = prop(name);
        self.props
            .iter()
            .find(|(p, _)| *p == id)
            .map_or(0, |(_, v)| *v)
    }

    fn set(&mut self, name: &str, value: u64) {
        let id = prop(name);
        if let Some(slot) = self.props.iter_mut().find(|(p, _)| *p == id) {
            slot.1 = value;
        }
    }

    fn disable(&mut self) {
        self.set("FB_ID", 0);
        self.set("CRTC_ID", 0);
    }
}

#[derive(Debug, Clone)]
struct CrtcState {
    id: u32,
    fb_id: u32,
    mode: Option<DisplayMode>,
}

#[derive(Debug, Clone, Copy)]
struct FbState {
    id: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy)]
struct DumbState {
    buffer: DumbBuffer,
    offset: u64,
}

struct SimpleGfxState {
    resources: ModeResources,
    connectors: Vec<Connector>,
    encoder: Encoder,
    crtcs: Vec<CrtcState>,
    planes: Vec<PlaneState>,
    framebuffers: Vec<FbState>,
    dumb_buffers: Vec<DumbState>,
    next_fb_id: u32,
    next_handle: u32,
    client_caps: Vec<(u64, u64)>,
    commits: Vec<CommitRecord>,
}

impl SimpleGfxState {
    fn client_cap(&self, cap: u64) -> Option<u64> {
        self.client_caps
            .iter()
            .find(|(c, _)| *c == cap)
            .map(|(_, v)| *v)
    }

    fn plane_check(&self, plane: &PlaneState) -> Result<(), GfxError> {
        let fb_id = plane.value("FB_ID") as u32;
        let crtc_id = plane.value("CRTC_ID") as u32;

        match (fb_id, crtc_id) {
            (0, 0) => return Ok(()),
            (0, _) | (_, 0) => return Err(GfxError::InvalidArg),
            _ => {}
        }

        let fb = self
            .framebuffers
            .iter()
            .find(|fb| fb.id == fb_id)
            .ok_or(GfxError::NoSuchObject)?;
        let index = self
            .crtcs
            .iter()
            .position(|c| c.id == crtc_id)
            .ok_or(GfxError::NoSuchObject)?;
        if plane.possible_crtcs & 1u32.checked_shl(index as u32).unwrap_or(0) == 0 {
            return Err(GfxError::InvalidArg);
        }

        // Source rectangle is 16.16 and must lie inside the framebuffer
        let src_right = (plane.value("SRC_X") + plane.value("SRC_W")) >> 16;
        let src_bottom = (plane.value("SRC_Y") + plane.value("SRC_H")) >> 16;
        if src_right > fb.width as u64 || src_bottom > fb.height as u64 {
            return Err(GfxError::from_errno(libc::ENOSPC));
        }
        if plane.value("CRTC_W") == 0 || plane.value("CRTC_H") == 0 {
            return Err(GfxError::InvalidArg);
        }

        Ok(())
    }

    fn stage(&self, req: &AtomicRequest) -> Result<Vec<PlaneState>, GfxError> {
        let mut planes = self.planes.clone();

        for entry in req.entries() {
            let prop_id = entry.property.raw();
            if let Some(plane) = planes.iter_mut().find(|p| p.id == entry.object_id) {
                let slot = plane
                    .props
                    .iter_mut()
                    .find(|(p, _)| *p == prop_id)
                    .ok_or(GfxError::InvalidArg)?;
                slot.1 = entry.value;
            } else if self.crtcs.iter().any(|c| c.id == entry.object_id)
                || self.connectors.iter().any(|c| c.id == entry.object_id)
            {
                // CRTC and connector properties are read-only here
                return Err(GfxError::InvalidArg);
            } else {
                return Err(GfxError::NoSuchObject);
            }
        }

        for plane in &planes {
            self.plane_check(plane)?;
        }
        Ok(planes)
    }

    fn unbind_fb(&mut self, fb_id: u32) {
        for plane in &mut self.planes {
            if plane.value("FB_ID") == fb_id as u64 {
                plane.disable();
            }
        }
        for crtc in &mut self.crtcs {
            if crtc.fb_id == fb_id {
                crtc.fb_id = 0;
            }
        }
    }
}

/// Builder for a [`SimpleGfx`] topology
#[derive(Debug, Clone)]
pub struct SimpleGfxBuilder {
    width: u16,
    height: u16,
    connection: u32,
    with_modes: bool,
    disconnected_connectors: usize,
    active: bool,
    crtcs: usize,
    active_crtc: usize,
    primary_possible_crtcs: Option<u32>,
    overlay_possible_crtcs: Option<u32>,
    overlay_plane: bool,
    omitted: Vec<String>,
    failures: Vec<Failure>,
}

impl Default for SimpleGfxBuilder {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            connection: GFX_MODE_CONNECTED,
            with_modes: true,
            disconnected_connectors: 0,
            active: true,
            crtcs: 1,
            active_crtc: 0,
            primary_possible_crtcs: None,
            overlay_possible_crtcs: None,
            overlay_plane: true,
            omitted: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl SimpleGfxBuilder {
    /// Mode advertised by the display connector
    pub fn mode(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Connection state of the display connector
    pub fn connection(mut self, connection: u32) -> Self {
        self.connection = connection;
        self
    }

    /// Connected display that advertises no modes
    pub fn without_modes(mut self) -> Self {
        self.with_modes = false;
        self
    }

    /// Disconnected connectors listed ahead of the display connector
    pub fn disconnected_connectors(mut self, n: usize) -> Self {
        self.disconnected_connectors = n;
        self
    }

    /// Encoder not routed to any CRTC and nothing on screen
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn crtcs(mut self, n: usize) -> Self {
        self.crtcs = n.max(1);
        self
    }

    /// Index of the CRTC the encoder is routed to
    pub fn active_crtc(mut self, index: usize) -> Self {
        self.active_crtc = index;
        self
    }

    pub fn primary_possible_crtcs(mut self, mask: u32) -> Self {
        self.primary_possible_crtcs = Some(mask);
        self
    }

    pub fn overlay_possible_crtcs(mut self, mask: u32) -> Self {
        self.overlay_possible_crtcs = Some(mask);
        self
    }

    pub fn without_overlay_plane(mut self) -> Self {
        self.overlay_plane = false;
        self
    }

    /// Leave a property off every plane
    pub fn omit_plane_property(mut self, name: &str) -> Self {
        self.omitted.push(name.to_string());
        self
    }

    /// Make one device operation fail
    pub fn fail(mut self, failure: Failure) -> Self {
        self.failures.push(failure);
        self
    }

    pub fn build(self) -> SimpleGfx {
        let active_crtc = self.active_crtc.min(self.crtcs - 1);
        let crtc_ids: Vec<u32> = (0..self.crtcs)
            .map(|i| SimpleGfx::CRTC_BASE_ID + i as u32)
            .collect();
        let bound_crtc = if self.active { crtc_ids[active_crtc] } else { 0 };
        let bound_fb = if self.active { SimpleGfx::BOOT_FB_ID } else { 0 };
        let mode = DisplayMode::new(self.width, self.height, 60);

        let mut connectors = Vec::new();
        for i in 0..self.disconnected_connectors {
            let id = SimpleGfx::CONNECTOR_BASE_ID + i as u32;
            let mut conn = Connector::new(id, GFX_MODE_CONNECTOR_VIRTUAL, i as u32 + 1);
            conn.connection = GFX_MODE_DISCONNECTED;
            conn.add_encoder(SimpleGfx::ENCODER_ID);
            connectors.push(conn);
        }
        let display_id = SimpleGfx::CONNECTOR_BASE_ID + self.disconnected_connectors as u32;
        let mut display = Connector::new(
            display_id,
            GFX_MODE_CONNECTOR_VIRTUAL,
            self.disconnected_connectors as u32 + 1,
        );
        if self.with_modes {
            display.set_connected(mode.clone());
        }
        display.connection = self.connection;
        display.add_encoder(SimpleGfx::ENCODER_ID);
        display.encoder_id = SimpleGfx::ENCODER_ID;
        connectors.push(display);

        let mut encoder = Encoder::new(SimpleGfx::ENCODER_ID, GFX_MODE_ENCODER_VIRTUAL);
        encoder.crtc_id = bound_crtc;
        encoder.possible_crtcs = u32::MAX >> (32 - self.crtcs.min(32));

        let crtcs = crtc_ids
            .iter()
            .map(|&id| CrtcState {
                id,
                fb_id: if id == bound_crtc { bound_fb } else { 0 },
                mode: (id == bound_crtc).then(|| mode.clone()),
            })
            .collect();

        let active_mask = 1u32 << active_crtc;
        let plane_props = |kind: u64, fb: u32, crtc: u32| -> Vec<(u32, u64)> {
            let (w, h) = (self.width as u64, self.height as u64);
            let on = fb != 0;
            [
                ("type", kind),
                ("FB_ID", fb as u64),
                ("CRTC_ID", crtc as u64),
                ("SRC_X", 0),
                ("SRC_Y", 0),
                ("SRC_W", if on { w << 16 } else { 0 }),
                ("SRC_H", if on { h << 16 } else { 0 }),
                ("CRTC_X", 0),
                ("CRTC_Y", 0),
                ("CRTC_W", if on { w } else { 0 }),
                ("CRTC_H", if on { h } else { 0 }),
            ]
            .into_iter()
            .filter(|(name, _)| !self.omitted.iter().any(|o| o.as_str() == *name))
            .map(|(name, value)| (prop(name), value))
            .collect()
        };

        let mut planes = vec![PlaneState {
            id: SimpleGfx::PRIMARY_PLANE_ID,
            possible_crtcs: self.primary_possible_crtcs.unwrap_or(active_mask),
            props: plane_props(GFX_PLANE_TYPE_PRIMARY, bound_fb, bound_crtc),
        }];
        if self.overlay_plane {
            planes.push(PlaneState {
                id: SimpleGfx::OVERLAY_PLANE_ID,
                possible_crtcs: self.overlay_possible_crtcs.unwrap_or(active_mask),
                props: plane_props(GFX_PLANE_TYPE_OVERLAY, 0, 0),
            });
        }

        // The boot framebuffer stands in for whatever firmware left on screen.
        // A u16 width can't overflow the pitch.
        let boot_pitch = (self.width as u32 * BYTES_PER_PIXEL + 63) & !63;
        let boot_dumb = DumbBuffer {
            handle: SimpleGfx::BOOT_HANDLE,
            pitch: boot_pitch,
            size: boot_pitch as u64 * self.height as u64,
        };
        let boot_fb = FbState {
            id: SimpleGfx::BOOT_FB_ID,
            width: self.width as u32,
            height: self.height as u32,
        };

        let mut resources = ModeResources::new();
        resources.connector_ids = connectors.iter().map(|c| c.id).collect();
        resources.encoder_ids.push(SimpleGfx::ENCODER_ID);
        resources.crtc_ids = crtc_ids;
        resources.fb_ids.push(SimpleGfx::BOOT_FB_ID);
        resources.min_width = 1;
        resources.min_height = 1;
        resources.max_width = resources.max_width.max(self.width as u32);
        resources.max_height = resources.max_height.max(self.height as u32);

        let state = SimpleGfxState {
            resources,
            connectors,
            encoder,
            crtcs,
            planes,
            framebuffers: vec![boot_fb],
            dumb_buffers: vec![DumbState {
                buffer: boot_dumb,
                offset: SimpleGfx::mmap_offset(SimpleGfx::BOOT_HANDLE),
            }],
            next_fb_id: SimpleGfx::BOOT_FB_ID + 1,
            next_handle: SimpleGfx::BOOT_HANDLE + 1,
            client_caps: Vec::new(),
            commits: Vec::new(),
        };

        SimpleGfx {
            failures: self.failures,
            state: Mutex::new(state),
        }
    }
}

/// In-memory KMS device
pub struct SimpleGfx {
    failures: Vec<Failure>,
    state: Mutex<SimpleGfxState>,
}

impl SimpleGfx {
    const CONNECTOR_BASE_ID: u32 = 10;
    const ENCODER_ID: u32 = 20;
    const PRIMARY_PLANE_ID: u32 = 30;
    const OVERLAY_PLANE_ID: u32 = 31;
    const CRTC_BASE_ID: u32 = 40;
    /// Framebuffer scanned out before anyone touches the device
    const BOOT_FB_ID: u32 = 1;
    const BOOT_HANDLE: u32 = 1;

    /// Default topology with a `width` x `height` display
    pub fn new(width: u16, height: u16) -> Self {
        Self::builder().mode(width, height).build()
    }

    pub fn builder() -> SimpleGfxBuilder {
        SimpleGfxBuilder::default()
    }

    fn mmap_offset(handle: u32) -> u64 {
        (handle as u64) << 12
    }

    fn check(&self, failure: Failure, error: GfxError) -> Result<(), GfxError> {
        if self.failures.contains(&failure) {
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Id of the CRTC at `index` in the resource list
    pub fn crtc_id(&self, index: usize) -> u32 {
        Self::CRTC_BASE_ID + index as u32
    }

    pub fn primary_plane_id(&self) -> u32 {
        Self::PRIMARY_PLANE_ID
    }

    pub fn overlay_plane_id(&self) -> u32 {
        Self::OVERLAY_PLANE_ID
    }

    /// Global id of a property name
    pub fn property_id(&self, name: &str) -> Option<PropertyId> {
        PropertyId::new(prop(name))
    }

    /// Framebuffers created through `add_fb` and not yet removed
    pub fn live_framebuffers(&self) -> usize {
        let state = self.state.lock();
        state
            .framebuffers
            .iter()
            .filter(|fb| fb.id != Self::BOOT_FB_ID)
            .count()
    }

    /// Dumb buffers created through `create_dumb` and not yet destroyed
    pub fn live_dumb_buffers(&self) -> usize {
        let state = self.state.lock();
        state
            .dumb_buffers
            .iter()
            .filter(|d| d.buffer.handle != Self::BOOT_HANDLE)
            .count()
    }

    /// Framebuffer a CRTC scans out, `None` for an unknown CRTC
    pub fn crtc_framebuffer(&self, crtc_id: u32) -> Option<u32> {
        let state = self.state.lock();
        state.crtcs.iter().find(|c| c.id == crtc_id).map(|c| c.fb_id)
    }

    /// Current value of a plane property, by name
    pub fn plane_value(&self, plane_id: u32, name: &str) -> Option<u64> {
        let state = self.state.lock();
        let plane = state.planes.iter().find(|p| p.id == plane_id)?;
        let id = prop(name);
        plane.props.iter().find(|(p, _)| *p == id).map(|(_, v)| *v)
    }

    /// Every atomic commit submitted so far
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().commits.clone()
    }

    /// Value a client capability was set to
    pub fn client_cap(&self, cap: u64) -> Option<u64> {
        self.state.lock().client_cap(cap)
    }
}

impl KmsDevice for SimpleGfx {
    fn name(&self) -> &str {
        "simplegfx"
    }

    fn get_cap(&self, cap: u64) -> Result<u64, GfxError> {
        match cap {
            GFX_CAP_DUMB_BUFFER => Ok(1),
            _ => Ok(0),
        }
    }

    fn set_client_cap(&self, cap: u64, value: u64) -> Result<(), GfxError> {
        if !matches!(cap, GFX_CLIENT_CAP_UNIVERSAL_PLANES | GFX_CLIENT_CAP_ATOMIC) || value > 1 {
            return Err(GfxError::InvalidArg);
        }
        let mut state = self.state.lock();
        state.client_caps.retain(|(c, _)| *c != cap);
        state.client_caps.push((cap, value));
        Ok(())
    }

    fn get_resources(&self) -> Result<ModeResources, GfxError> {
        Ok(self.state.lock().resources.clone())
    }

    fn get_connector(&self, id: u32) -> Result<Connector, GfxError> {
        let state = self.state.lock();
        state
            .connectors
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(GfxError::NoSuchObject)
    }

    fn get_encoder(&self, id: u32) -> Result<Encoder, GfxError> {
        let state = self.state.lock();
        if id == state.encoder.id {
            Ok(state.encoder.clone())
        } else {
            Err(GfxError::NoSuchObject)
        }
    }

    fn get_plane_ids(&self) -> Result<Vec<u32>, GfxError> {
        Ok(self.state.lock().planes.iter().map(|p| p.id).collect())
    }

    fn get_plane(&self, id: u32) -> Result<Plane, GfxError> {
        let state = self.state.lock();
        let plane = state
            .planes
            .iter()
            .find(|p| p.id == id)
            .ok_or(GfxError::NoSuchObject)?;

        Ok(Plane {
            id,
            crtc_id: plane.value("CRTC_ID") as u32,
            fb_id: plane.value("FB_ID") as u32,
            possible_crtcs: plane.possible_crtcs,
            gamma_size: 0,
            formats: vec![GFX_FORMAT_XRGB8888, GFX_FORMAT_ARGB8888],
        })
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        _x: u32,
        _y: u32,
        connectors: &[u32],
        mode: Option<&DisplayMode>,
    ) -> Result<(), GfxError> {
        self.check(Failure::SetCrtc, GfxError::InvalidArg)?;
        let mut state = self.state.lock();

        if !state.crtcs.iter().any(|c| c.id == crtc_id) {
            return Err(GfxError::NoSuchObject);
        }
        // Unknown fb ids are rejected before touching the CRTC
        if fb_id != 0 && !state.framebuffers.iter().any(|fb| fb.id == fb_id) {
            return Err(GfxError::NoSuchObject);
        }
        if fb_id != 0 && mode.is_none() {
            return Err(GfxError::InvalidArg);
        }
        if connectors
            .iter()
            .any(|id| !state.connectors.iter().any(|c| c.id == *id))
        {
            return Err(GfxError::NoSuchObject);
        }

        let (width, height) = mode.map_or((0, 0), |m| (m.width() as u64, m.height() as u64));
        if let Some(crtc) = state.crtcs.iter_mut().find(|c| c.id == crtc_id) {
            crtc.fb_id = fb_id;
            crtc.mode = mode.cloned();
        }
        if !connectors.is_empty() {
            state.encoder.crtc_id = crtc_id;
        }

        // The legacy path drives the CRTC's primary plane
        if let Some(primary) = state
            .planes
            .iter_mut()
            .find(|p| p.id == Self::PRIMARY_PLANE_ID)
        {
            if fb_id == 0 {
                primary.disable();
            } else {
                primary.set("FB_ID", fb_id as u64);
                primary.set("CRTC_ID", crtc_id as u64);
                primary.set("SRC_W", width << 16);
                primary.set("SRC_H", height << 16);
                primary.set("CRTC_W", width);
                primary.set("CRTC_H", height);
            }
        }

        Ok(())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, GfxError> {
        self.check(Failure::CreateDumb, GfxError::NoMemory)?;
        if width == 0 || height == 0 || bpp == 0 {
            return Err(GfxError::InvalidArg);
        }

        let mut state = self.state.lock();
        let handle = state.next_handle;
        let buffer = DumbBuffer::new(handle, width, height, bpp).ok_or(GfxError::InvalidArg)?;
        state.next_handle += 1;

        state.dumb_buffers.push(DumbState {
            buffer,
            offset: Self::mmap_offset(handle),
        });
        Ok(buffer)
    }

    fn add_fb(
        &self,
        width: u32,
        height: u32,
        pitch: u32,
        bpp: u32,
        depth: u32,
        handle: u32,
    ) -> Result<u32, GfxError> {
        self.check(Failure::AddFb, GfxError::InvalidArg)?;
        if bpp != BPP || depth != DEPTH || width == 0 || height == 0 {
            return Err(GfxError::InvalidArg);
        }

        let mut state = self.state.lock();
        if width > state.resources.max_width || height > state.resources.max_height {
            return Err(GfxError::InvalidArg);
        }
        let dumb = state
            .dumb_buffers
            .iter()
            .find(|d| d.buffer.handle == handle)
            .ok_or(GfxError::NoSuchObject)?;
        let min_pitch = width as u64 * (bpp / 8) as u64;
        if (pitch as u64) * (height as u64) > dumb.buffer.size || (pitch as u64) < min_pitch {
            return Err(GfxError::InvalidArg);
        }

        let fb_id = state.next_fb_id;
        state.next_fb_id += 1;
        state.framebuffers.push(FbState {
            id: fb_id,
            width,
            height,
        });
        state.resources.fb_ids.push(fb_id);

        Ok(fb_id)
    }

    fn rm_fb(&self, fb_id: u32) -> Result<(), GfxError> {
        let mut state = self.state.lock();

        // The boot fb stays scanned out for the device's lifetime
        if fb_id == Self::BOOT_FB_ID {
            return Err(GfxError::Busy);
        }

        let pos = state
            .framebuffers
            .iter()
            .position(|fb| fb.id == fb_id)
            .ok_or(GfxError::NoSuchObject)?;

        state.framebuffers.remove(pos);
        state.resources.fb_ids.retain(|&id| id != fb_id);
        // Removing a framebuffer that is on screen turns its planes off
        state.unbind_fb(fb_id);

        Ok(())
    }

    fn map_dumb(&self, handle: u32) -> Result<u64, GfxError> {
        self.check(Failure::MapDumb, GfxError::InvalidArg)?;
        let state = self.state.lock();
        state
            .dumb_buffers
            .iter()
            .find(|d| d.buffer.handle == handle)
            .map(|d| d.offset)
            .ok_or(GfxError::NoSuchObject)
    }

    fn mmap(&self, offset: u64, len: usize) -> Result<Mapping, GfxError> {
        self.check(Failure::Mmap, GfxError::NoMemory)?;
        let state = self.state.lock();
        let dumb = state
            .dumb_buffers
            .iter()
            .find(|d| d.offset == offset)
            .ok_or(GfxError::InvalidArg)?;
        if len as u64 > dumb.buffer.size {
            return Err(GfxError::InvalidArg);
        }
        Ok(Mapping::anonymous(len))
    }

    fn destroy_dumb(&self, handle: u32) -> Result<(), GfxError> {
        let mut state = self.state.lock();

        // The boot fb still references handle 1
        if handle == Self::BOOT_HANDLE {
            return Err(GfxError::Busy);
        }

        let pos = state
            .dumb_buffers
            .iter()
            .position(|d| d.buffer.handle == handle)
            .ok_or(GfxError::NoSuchObject)?;

        state.dumb_buffers.remove(pos);
        Ok(())
    }

    fn object_properties(
        &self,
        obj_id: u32,
        obj_type: ObjectType,
    ) -> Result<Vec<(u32, u64)>, GfxError> {
        let state = self.state.lock();
        match obj_type {
            ObjectType::Plane => state
                .planes
                .iter()
                .find(|p| p.id == obj_id)
                .map(|p| p.props.clone())
                .ok_or(GfxError::NoSuchObject),
            ObjectType::Crtc => state
                .crtcs
                .iter()
                .find(|c| c.id == obj_id)
                .map(|c| vec![(prop("ACTIVE"), c.mode.is_some() as u64)])
                .ok_or(GfxError::NoSuchObject),
            ObjectType::Connector => state
                .connectors
                .iter()
                .find(|c| c.id == obj_id)
                .map(|_| vec![(prop("DPMS"), 0)])
                .ok_or(GfxError::NoSuchObject),
            ObjectType::Encoder => Err(GfxError::InvalidArg),
        }
    }

    fn property_name(&self, prop_id: u32) -> Result<String, GfxError> {
        PROPERTIES
            .iter()
            .find(|(id, _)| *id == prop_id)
            .map(|(_, name)| name.to_string())
            .ok_or(GfxError::NoSuchObject)
    }

    fn atomic_commit(&self, req: &AtomicRequest, flags: AtomicFlags) -> Result<(), GfxError> {
        let mut state = self.state.lock();

        let result = self
            .check(Failure::AtomicCommit, GfxError::InvalidArg)
            .and_then(|()| match state.client_cap(GFX_CLIENT_CAP_ATOMIC) {
                Some(1) => Ok(()),
                _ => Err(GfxError::InvalidArg),
            })
            .and_then(|()| {
                // Async flips only exist on the legacy page-flip path
                if flags.contains(AtomicFlags::PAGE_FLIP_ASYNC) {
                    Err(GfxError::InvalidArg)
                } else {
                    Ok(())
                }
            })
            .and_then(|()| state.stage(req));

        state.commits.push(CommitRecord {
            flags,
            entries: req.entries().to_vec(),
            result: result.as_ref().map(|_| ()).map_err(|e| *e),
        });

        let planes = result?;
        if !flags.contains(AtomicFlags::TEST_ONLY) {
            state.planes = planes;
        }
        Ok(())
    }
}
