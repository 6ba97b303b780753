//! Surface drawing
//!
//! Just enough pixel work to make the overlay visible: a solid background
//! and a crosshair on a cleared overlay. Rows are always addressed through
//! the surface's pitch.

use core::ops::Range;

use super::dumb::Surface;

/// Fully transparent pixel
pub const TRANSPARENT: u32 = 0x0000_0000;

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const WHITE: Color = Color::new(255, 255, 255);

    /// Opaque 32bpp pixel; the top byte is 0xff so the color also reads
    /// as opaque when a plane interprets it as ARGB
    pub const fn to_pixel(&self) -> u32 {
        0xff00_0000 | ((self.r as u32) << 16) | ((self.g as u32) << 8) | (self.b as u32)
    }
}

/// Set every byte of the surface to `byte`
pub fn fill_background(surface: &mut Surface<'_>, byte: u8) {
    surface.fill_bytes(byte);
}

/// Make the whole surface transparent
pub fn clear(surface: &mut Surface<'_>) {
    surface.fill_bytes(0);
}

/// Rows (or columns) covered by a stroke of `thickness` centred on `center`
///
/// `[center - thickness/2, center + thickness/2)`, so odd thicknesses lose
/// a pixel and a thickness of 1 draws nothing.
pub fn cross_band(center: u32, thickness: u32) -> Range<u32> {
    let half = thickness / 2;
    center.saturating_sub(half)..center.saturating_add(half)
}

/// Centre point of a surface
pub fn center_of(surface: &Surface<'_>) -> (u32, u32) {
    (surface.width() / 2, surface.height() / 2)
}

/// Draw a full-width horizontal and a full-height vertical bar crossing
/// at `center`; bars are clipped to the surface
pub fn draw_cross(surface: &mut Surface<'_>, center: (u32, u32), thickness: u32, pixel: u32) {
    let (width, height) = (surface.width(), surface.height());
    let (cx, cy) = center;

    let rows = cross_band(cy, thickness);
    surface.fill_rect(0, rows.start, width, rows.end - rows.start, pixel);

    let cols = cross_band(cx, thickness);
    surface.fill_rect(cols.start, 0, cols.end - cols.start, height, pixel);
}
