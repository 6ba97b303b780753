//! DRM card node
//!
//! [`Card`] drives a `/dev/dri/cardN` node with raw ioctls. Queries that
//! return variable-length arrays are issued twice: once to learn the
//! counts, once with buffers of that size. A hotplug between the two calls
//! changes the counts, in which case the pair is repeated.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::{self, NonNull};

use log::{debug, info};

use super::atomic::{AtomicFlags, AtomicRequest};
use super::dumb::{DumbBuffer, Mapping};
use super::ioctl::*;
use super::mode::{Connector, DisplayMode, Encoder, ModeResources, ObjectType, Plane};
use super::{negotiate_caps, GfxError, KmsDevice};
use crate::error::OverlayError;

fn last_error() -> GfxError {
    GfxError::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
}

fn user_ptr<T>(buf: &mut [T]) -> u64 {
    if buf.is_empty() {
        0
    } else {
        buf.as_mut_ptr() as u64
    }
}

/// An open DRM card node
pub struct Card {
    fd: OwnedFd,
    name: String,
}

impl Card {
    /// Open a card node read/write and enable atomic mode setting on it
    ///
    /// The device must support dumb buffers and accept the universal-planes
    /// and atomic client capabilities.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let path = path.as_ref();
        let open_error = |source: io::Error| OverlayError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(open_error)?;

        let card = Self {
            fd: OwnedFd::from(file),
            name: path.display().to_string(),
        };

        match card.driver_name() {
            Ok(driver) => info!("{}: driver {}", card.name, driver),
            Err(e) => debug!("{}: version query failed: {}", card.name, e),
        }

        negotiate_caps(&card).map_err(|e| open_error(e.into()))?;
        Ok(card)
    }

    /// Issue an ioctl, restarting it when interrupted
    fn ioctl<T>(&self, request: u64, arg: &mut T) -> Result<(), GfxError> {
        loop {
            // SAFETY: every request number encodes size_of::<T>(), and any
            // user pointers inside `arg` point at live buffers of the
            // advertised length
            let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, arg as *mut T) };
            if ret >= 0 {
                return Ok(());
            }
            let err = last_error();
            if !matches!(err.errno(), libc::EINTR | libc::EAGAIN) {
                return Err(err);
            }
        }
    }

    /// Name of the kernel driver behind this node
    pub fn driver_name(&self) -> Result<String, GfxError> {
        let mut version = GfxVersion::default();
        self.ioctl(GFX_IOCTL_VERSION, &mut version)?;

        let mut name = vec![0u8; version.name_len];
        version = GfxVersion {
            name_len: name.len(),
            name: user_ptr(&mut name) as usize,
            ..GfxVersion::default()
        };
        self.ioctl(GFX_IOCTL_VERSION, &mut version)?;

        name.truncate(version.name_len);
        Ok(c_name(&name))
    }
}

impl KmsDevice for Card {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_cap(&self, cap: u64) -> Result<u64, GfxError> {
        let mut req = GfxGetCap {
            capability: cap,
            value: 0,
        };
        self.ioctl(GFX_IOCTL_GET_CAP, &mut req)?;
        Ok(req.value)
    }

    fn set_client_cap(&self, cap: u64, value: u64) -> Result<(), GfxError> {
        let mut req = GfxSetClientCap {
            capability: cap,
            value,
        };
        self.ioctl(GFX_IOCTL_SET_CLIENT_CAP, &mut req)
    }

    fn get_resources(&self) -> Result<ModeResources, GfxError> {
        loop {
            let mut res = GfxModeCardRes::default();
            self.ioctl(GFX_IOCTL_MODE_GETRESOURCES, &mut res)?;

            let mut fb_ids = vec![0u32; res.count_fbs as usize];
            let mut crtc_ids = vec![0u32; res.count_crtcs as usize];
            let mut connector_ids = vec![0u32; res.count_connectors as usize];
            let mut encoder_ids = vec![0u32; res.count_encoders as usize];

            let mut fill = GfxModeCardRes {
                fb_id_ptr: user_ptr(&mut fb_ids),
                crtc_id_ptr: user_ptr(&mut crtc_ids),
                connector_id_ptr: user_ptr(&mut connector_ids),
                encoder_id_ptr: user_ptr(&mut encoder_ids),
                count_fbs: res.count_fbs,
                count_crtcs: res.count_crtcs,
                count_connectors: res.count_connectors,
                count_encoders: res.count_encoders,
                ..GfxModeCardRes::default()
            };
            self.ioctl(GFX_IOCTL_MODE_GETRESOURCES, &mut fill)?;

            if (fill.count_fbs, fill.count_crtcs, fill.count_connectors, fill.count_encoders)
                != (res.count_fbs, res.count_crtcs, res.count_connectors, res.count_encoders)
            {
                debug!("{}: resources changed while reading, retrying", self.name);
                continue;
            }

            return Ok(ModeResources {
                connector_ids,
                encoder_ids,
                crtc_ids,
                fb_ids,
                min_width: fill.min_width,
                max_width: fill.max_width,
                min_height: fill.min_height,
                max_height: fill.max_height,
            });
        }
    }

    fn get_connector(&self, id: u32) -> Result<Connector, GfxError> {
        loop {
            let mut conn = GfxModeGetConnector {
                connector_id: id,
                ..GfxModeGetConnector::default()
            };
            self.ioctl(GFX_IOCTL_MODE_GETCONNECTOR, &mut conn)?;

            let mut modes = vec![GfxModeModeinfo::default(); conn.count_modes as usize];
            let mut encoders = vec![0u32; conn.count_encoders as usize];
            let mut props = vec![0u32; conn.count_props as usize];
            let mut values = vec![0u64; conn.count_props as usize];

            let mut fill = GfxModeGetConnector {
                connector_id: id,
                modes_ptr: user_ptr(&mut modes),
                encoders_ptr: user_ptr(&mut encoders),
                props_ptr: user_ptr(&mut props),
                prop_values_ptr: user_ptr(&mut values),
                count_modes: conn.count_modes,
                count_encoders: conn.count_encoders,
                count_props: conn.count_props,
                ..GfxModeGetConnector::default()
            };
            self.ioctl(GFX_IOCTL_MODE_GETCONNECTOR, &mut fill)?;

            if (fill.count_modes, fill.count_encoders, fill.count_props)
                != (conn.count_modes, conn.count_encoders, conn.count_props)
            {
                debug!("{}: connector {} changed while reading, retrying", self.name, id);
                continue;
            }

            let mut connector = Connector::new(id, fill.connector_type, fill.connector_type_id);
            connector.connection = fill.connection;
            connector.encoder_id = fill.encoder_id;
            connector.encoder_ids = encoders;
            connector.modes = modes.iter().map(DisplayMode::from).collect();
            connector.mm_width = fill.mm_width;
            connector.mm_height = fill.mm_height;
            connector.subpixel = fill.subpixel;
            return Ok(connector);
        }
    }

    fn get_encoder(&self, id: u32) -> Result<Encoder, GfxError> {
        let mut enc = GfxModeGetEncoder {
            encoder_id: id,
            ..GfxModeGetEncoder::default()
        };
        self.ioctl(GFX_IOCTL_MODE_GETENCODER, &mut enc)?;

        let mut encoder = Encoder::new(id, enc.encoder_type);
        encoder.crtc_id = enc.crtc_id;
        encoder.possible_crtcs = enc.possible_crtcs;
        encoder.possible_clones = enc.possible_clones;
        Ok(encoder)
    }

    fn get_plane_ids(&self) -> Result<Vec<u32>, GfxError> {
        loop {
            let mut res = GfxModeGetPlaneRes::default();
            self.ioctl(GFX_IOCTL_MODE_GETPLANERESOURCES, &mut res)?;

            let mut ids = vec![0u32; res.count_planes as usize];
            let mut fill = GfxModeGetPlaneRes {
                plane_id_ptr: user_ptr(&mut ids),
                count_planes: res.count_planes,
            };
            self.ioctl(GFX_IOCTL_MODE_GETPLANERESOURCES, &mut fill)?;

            if fill.count_planes == res.count_planes {
                return Ok(ids);
            }
        }
    }

    fn get_plane(&self, id: u32) -> Result<Plane, GfxError> {
        loop {
            let mut plane = GfxModeGetPlane {
                plane_id: id,
                ..GfxModeGetPlane::default()
            };
            self.ioctl(GFX_IOCTL_MODE_GETPLANE, &mut plane)?;

            let mut formats = vec![0u32; plane.count_format_types as usize];
            let mut fill = GfxModeGetPlane {
                plane_id: id,
                count_format_types: plane.count_format_types,
                format_type_ptr: user_ptr(&mut formats),
                ..GfxModeGetPlane::default()
            };
            self.ioctl(GFX_IOCTL_MODE_GETPLANE, &mut fill)?;

            if fill.count_format_types != plane.count_format_types {
                continue;
            }

            return Ok(Plane {
                id,
                crtc_id: fill.crtc_id,
                fb_id: fill.fb_id,
                possible_crtcs: fill.possible_crtcs,
                gamma_size: fill.gamma_size,
                formats,
            });
        }
    }

    fn set_crtc(
        &self,
        crtc_id: u32,
        fb_id: u32,
        x: u32,
        y: u32,
        connectors: &[u32],
        mode: Option<&DisplayMode>,
    ) -> Result<(), GfxError> {
        let mut connectors = connectors.to_vec();
        let mut req = GfxModeCrtc {
            set_connectors_ptr: user_ptr(&mut connectors),
            count_connectors: connectors.len() as u32,
            crtc_id,
            fb_id,
            x,
            y,
            ..GfxModeCrtc::default()
        };
        if let Some(mode) = mode {
            req.mode = GfxModeModeinfo::from(mode);
            req.mode_valid = 1;
        }

        debug!("{}: set crtc {} to fb {}", self.name, crtc_id, fb_id);
        self.ioctl(GFX_IOCTL_MODE_SETCRTC, &mut req)
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer, GfxError> {
        let mut req = GfxModeCreateDumb {
            width,
            height,
            bpp,
            ..GfxModeCreateDumb::default()
        };
        self.ioctl(GFX_IOCTL_MODE_CREATE_DUMB, &mut req)?;

        // The kernel decides pitch and size; keep what it reported
        Ok(DumbBuffer {
            handle: req.handle,
            pitch: req.pitch,
            size: req.size,
        })
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
        let mut req = GfxModeFbCmd {
            fb_id: 0,
            width,
            height,
            pitch,
            bpp,
            depth,
            handle,
        };
        self.ioctl(GFX_IOCTL_MODE_ADDFB, &mut req)?;
        Ok(req.fb_id)
    }

    fn rm_fb(&self, fb_id: u32) -> Result<(), GfxError> {
        let mut id = fb_id;
        self.ioctl(GFX_IOCTL_MODE_RMFB, &mut id)
    }

    fn map_dumb(&self, handle: u32) -> Result<u64, GfxError> {
        let mut req = GfxModeMapDumb {
            handle,
            ..GfxModeMapDumb::default()
        };
        self.ioctl(GFX_IOCTL_MODE_MAP_DUMB, &mut req)?;
        Ok(req.offset)
    }

    fn mmap(&self, offset: u64, len: usize) -> Result<Mapping, GfxError> {
        let offset = libc::off_t::try_from(offset).map_err(|_| GfxError::InvalidArg)?;

        // SAFETY: asks for a fresh mapping; no existing memory is touched
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(last_error());
        }
        let addr = NonNull::new(addr.cast::<u8>()).ok_or(GfxError::NoMemory)?;

        // SAFETY: addr is a new shared mapping of exactly len bytes
        Ok(unsafe { Mapping::from_raw_shared(addr, len) })
    }

    fn destroy_dumb(&self, handle: u32) -> Result<(), GfxError> {
        let mut req = GfxModeDestroyDumb { handle };
        self.ioctl(GFX_IOCTL_MODE_DESTROY_DUMB, &mut req)
    }

    fn object_properties(
        &self,
        obj_id: u32,
        obj_type: ObjectType,
    ) -> Result<Vec<(u32, u64)>, GfxError> {
        loop {
            let mut req = GfxModeObjGetProperties {
                obj_id,
                obj_type: obj_type.raw(),
                ..GfxModeObjGetProperties::default()
            };
            self.ioctl(GFX_IOCTL_MODE_OBJ_GETPROPERTIES, &mut req)?;

            let mut props = vec![0u32; req.count_props as usize];
            let mut values = vec![0u64; req.count_props as usize];
            let mut fill = GfxModeObjGetProperties {
                props_ptr: user_ptr(&mut props),
                prop_values_ptr: user_ptr(&mut values),
                count_props: req.count_props,
                obj_id,
                obj_type: obj_type.raw(),
            };
            self.ioctl(GFX_IOCTL_MODE_OBJ_GETPROPERTIES, &mut fill)?;

            if fill.count_props == req.count_props {
                return Ok(props.into_iter().zip(values).collect());
            }
        }
    }

    fn property_name(&self, prop_id: u32) -> Result<String, GfxError> {
        // Zero counts: only the fixed part (id, flags, name) is returned
        let mut req = GfxModeGetProperty {
            prop_id,
            ..GfxModeGetProperty::default()
        };
        self.ioctl(GFX_IOCTL_MODE_GETPROPERTY, &mut req)?;
        Ok(c_name(&req.name))
    }

    fn atomic_commit(&self, req: &AtomicRequest, flags: AtomicFlags) -> Result<(), GfxError> {
        let mut payload = req.payload();
        let mut atomic = GfxModeAtomic {
            flags: flags.bits(),
            count_objs: payload.objs.len() as u32,
            objs_ptr: user_ptr(&mut payload.objs),
            count_props_ptr: user_ptr(&mut payload.count_props),
            props_ptr: user_ptr(&mut payload.props),
            prop_values_ptr: user_ptr(&mut payload.values),
            ..GfxModeAtomic::default()
        };
        self.ioctl(GFX_IOCTL_MODE_ATOMIC, &mut atomic)
    }
}
