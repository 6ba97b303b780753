//! Atomic KMS overlay presentation
//!
//! Drives a Linux DRM device directly: discovers the display, allocates
//! dumb buffers, and shows a small overlay on a hardware plane on top of a
//! full-screen primary surface with one atomic commit.
//!
//! The [`gfx`] module holds the device layer; [`overlay`] strings it
//! together. Everything runs against any [`gfx::KmsDevice`], either a card
//! node ([`gfx::card::Card`]) or the in-memory [`gfx::simplegfx::SimpleGfx`].

pub mod cmdline;
pub mod error;
pub mod gfx;
pub mod overlay;

pub use error::{OverlayError, OverlayResult};
