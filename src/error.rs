//! Pipeline error type
//!
//! Every step of presenting the overlay fails with its own variant, naming
//! the operation and the object involved. Device-level failures carry the
//! [`GfxError`] the ioctl reported.
//!
//! None of these are retried: the caller reports the error and exits.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::gfx::mode::ObjectType;
use crate::gfx::GfxError;

/// Overlay pipeline error
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Opening the device node or negotiating its capabilities failed
    #[error("cannot open display device {}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A mode object query failed
    #[error("querying {what} failed")]
    ResourceQuery {
        what: &'static str,
        #[source]
        source: GfxError,
    },

    /// No connector is connected with at least one mode
    #[error("no connected display with a usable mode")]
    NoDisplay,

    /// The display's encoder isn't routed to a CRTC
    #[error("connector {connector_id} has no CRTC assigned")]
    NoCrtc { connector_id: u32 },

    /// Legacy CRTC configuration was rejected
    #[error("setting CRTC {crtc_id} to framebuffer {fb_id} failed")]
    CrtcConfig {
        crtc_id: u32,
        fb_id: u32,
        #[source]
        source: GfxError,
    },

    /// Creating a dumb buffer failed
    #[error("allocating a {width}x{height} buffer failed")]
    Allocation {
        width: u32,
        height: u32,
        #[source]
        source: GfxError,
    },

    /// Registering a dumb buffer as a framebuffer failed
    #[error("registering buffer {handle} as a framebuffer failed")]
    Registration {
        handle: u32,
        #[source]
        source: GfxError,
    },

    /// Mapping a dumb buffer into memory failed
    #[error("mapping buffer {handle} failed")]
    Mapping {
        handle: u32,
        #[source]
        source: GfxError,
    },

    /// No plane can carry the overlay on the CRTC
    #[error("no usable overlay plane for CRTC {crtc_id}")]
    NoPlane { crtc_id: u32 },

    /// A mode object lacks a property the pipeline needs
    #[error("{object_type} {object_id} has no property {name:?}")]
    PropertyNotFound {
        object_id: u32,
        object_type: ObjectType,
        name: String,
    },

    /// A property assignment was refused while building a request
    #[error("cannot set property {property_id} on object {object_id}: {reason}")]
    PropertyAdd {
        object_id: u32,
        property_id: u32,
        reason: &'static str,
    },

    /// The kernel rejected the atomic request as a whole
    #[error("atomic commit of {entries} properties failed")]
    Commit {
        entries: usize,
        #[source]
        source: GfxError,
    },
}

pub type OverlayResult<T> = Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_messages_name_the_object() {
        let err = OverlayError::PropertyNotFound {
            object_id: 31,
            object_type: ObjectType::Plane,
            name: "SRC_W".to_string(),
        };
        assert_eq!(err.to_string(), "plane 31 has no property \"SRC_W\"");

        let err = OverlayError::NoCrtc { connector_id: 10 };
        assert_eq!(err.to_string(), "connector 10 has no CRTC assigned");
    }

    #[test]
    fn test_device_errors_are_the_source() {
        let err = OverlayError::Commit {
            entries: 10,
            source: GfxError::InvalidArg,
        };
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("invalid argument"));
    }
}
