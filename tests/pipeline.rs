//! End-to-end overlay presentation against the in-memory device

use kms_overlay::cmdline::Config;
use kms_overlay::gfx::atomic::{signed_value, AtomicFlags};
use kms_overlay::gfx::ioctl::GFX_MODE_DISCONNECTED;
use kms_overlay::gfx::simplegfx::{Failure, SimpleGfx};
use kms_overlay::gfx::{negotiate_caps, KmsDevice};
use kms_overlay::overlay::present;
use kms_overlay::OverlayError;

fn config(width: u32, height: u32) -> Config {
    Config {
        overlay_width: width,
        overlay_height: height,
        wait: false,
        ..Config::default()
    }
}

/// Device with the client caps a card gets on open
fn negotiated(dev: SimpleGfx) -> SimpleGfx {
    negotiate_caps(&dev).unwrap();
    dev
}

fn entry_value(dev: &SimpleGfx, entries: &[kms_overlay::gfx::atomic::AtomicEntry], name: &str) -> u64 {
    let id = dev.property_id(name).unwrap();
    entries
        .iter()
        .find(|e| e.property == id)
        .map(|e| e.value)
        .unwrap()
}

#[test]
fn full_hd_overlay_is_centred_in_one_commit() {
    let dev = negotiated(SimpleGfx::new(1920, 1080));
    let shown = present(&dev, &config(100, 100)).unwrap();

    let commits = dev.commits();
    assert_eq!(commits.len(), 1);
    let commit = &commits[0];
    assert!(commit.result.is_ok());
    assert_eq!(commit.flags, AtomicFlags::NONBLOCK);
    assert_eq!(commit.entries.len(), 10);
    assert!(commit.entries.iter().all(|e| e.object_id == dev.overlay_plane_id()));

    let value = |name| entry_value(&dev, &commit.entries, name);
    assert_eq!(value("CRTC_X"), 910);
    assert_eq!(value("CRTC_Y"), 490);
    assert_eq!(value("CRTC_W"), 100);
    assert_eq!(value("CRTC_H"), 100);
    assert_eq!(value("SRC_X"), 0);
    assert_eq!(value("SRC_Y"), 0);
    assert_eq!(value("SRC_W") >> 16, 100);
    assert_eq!(value("SRC_H"), 100 << 16);
    assert_eq!(value("FB_ID"), shown.overlay().fb_id() as u64);
    assert_eq!(value("CRTC_ID"), dev.crtc_id(0) as u64);

    shown.release().unwrap();
}

#[test]
fn overlay_pixels_hold_the_cross() {
    let dev = negotiated(SimpleGfx::new(1280, 720));
    let shown = present(&dev, &config(64, 64)).unwrap();

    let overlay = shown.overlay();
    assert_eq!(overlay.pixel(32, 32), Some(0xffff_ffff));
    assert_eq!(overlay.pixel(0, 0), Some(0));
    assert_eq!(shown.primary().pixel(0, 0), Some(0x2020_2020));
}

#[test]
fn no_display_allocates_nothing() {
    let dev = negotiated(SimpleGfx::builder().connection(GFX_MODE_DISCONNECTED).build());
    let err = present(&dev, &config(100, 100)).err().unwrap();

    assert!(matches!(err, OverlayError::NoDisplay));
    assert_eq!(dev.live_dumb_buffers(), 0);
    assert_eq!(dev.live_framebuffers(), 0);
    assert!(dev.commits().is_empty());
}

#[test]
fn missing_property_stops_before_commit() {
    let dev = negotiated(SimpleGfx::builder().omit_plane_property("SRC_W").build());
    let err = present(&dev, &config(100, 100)).err().unwrap();

    match err {
        OverlayError::PropertyNotFound { object_id, name, .. } => {
            assert_eq!(object_id, dev.overlay_plane_id());
            assert_eq!(name, "SRC_W");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(dev.commits().is_empty());
    // Both surfaces were unwound
    assert_eq!(dev.live_dumb_buffers(), 0);
    assert_eq!(dev.live_framebuffers(), 0);
}

#[test]
fn rejected_commit_is_reported_once() {
    let dev = negotiated(SimpleGfx::builder().fail(Failure::AtomicCommit).build());
    let err = present(&dev, &config(100, 100)).err().unwrap();

    assert!(matches!(err, OverlayError::Commit { entries: 10, .. }));
    assert_eq!(dev.commits().len(), 1);
    assert_eq!(dev.live_dumb_buffers(), 0);
}

#[test]
fn allocation_failure_is_terminal() {
    let dev = negotiated(SimpleGfx::builder().fail(Failure::CreateDumb).build());
    let err = present(&dev, &config(100, 100)).err().unwrap();

    assert!(matches!(err, OverlayError::Allocation { width: 1920, height: 1080, .. }));
    assert!(dev.commits().is_empty());
}

#[test]
fn plane_filter_follows_crtc_index() {
    let dev = negotiated(
        SimpleGfx::builder()
            .crtcs(3)
            .active_crtc(2)
            .primary_possible_crtcs(0b100)
            .overlay_possible_crtcs(0b110)
            .build(),
    );
    let shown = present(&dev, &config(100, 100)).unwrap();

    assert_eq!(shown.topology().crtc.index, 2);
    assert_eq!(shown.plane_id(), dev.overlay_plane_id());
    assert_eq!(
        dev.plane_value(dev.overlay_plane_id(), "CRTC_ID"),
        Some(dev.crtc_id(2) as u64)
    );
}

#[test]
fn first_connected_connector_wins() {
    let dev = negotiated(SimpleGfx::builder().disconnected_connectors(2).build());
    let shown = present(&dev, &config(100, 100)).unwrap();

    let res = dev.get_resources().unwrap();
    assert_eq!(res.connector_ids.len(), 3);
    assert_eq!(shown.topology().connector.id, res.connector_ids[2]);
}

#[test]
fn untyped_planes_fall_back_to_idle_plane() {
    let dev = negotiated(SimpleGfx::builder().omit_plane_property("type").build());
    let shown = present(&dev, &config(100, 100)).unwrap();
    assert_eq!(shown.plane_id(), dev.overlay_plane_id());
}

#[test]
fn crosshair_follows_configured_centre_and_colour() {
    let dev = negotiated(SimpleGfx::new(1280, 720));
    let config = Config::parse(None, ["size=64x64", "cross=8,40", "color=0xff00ff00", "nowait"]).unwrap();
    let shown = present(&dev, &config).unwrap();

    let overlay = shown.overlay();
    assert_eq!(overlay.pixel(8, 0), Some(0xff00_ff00));
    assert_eq!(overlay.pixel(63, 40), Some(0xff00_ff00));
    assert_eq!(overlay.pixel(32, 32), Some(0));
}

#[test]
fn oversized_size_option_is_an_allocation_error() {
    let dev = negotiated(SimpleGfx::new(1920, 1080));
    let config = Config::parse(None, ["device=virtual", "size=1100000000x1", "nowait"]).unwrap();
    let err = present(&dev, &config).err().unwrap();

    assert!(matches!(err, OverlayError::Allocation { width: 1_100_000_000, .. }));
    assert!(dev.commits().is_empty());
    assert_eq!(dev.live_dumb_buffers(), 0);
}

#[test]
fn oversized_overlay_gets_negative_position() {
    let dev = negotiated(SimpleGfx::new(640, 480));
    let shown = present(&dev, &config(800, 600)).unwrap();

    assert_eq!(shown.placement().dst_x, -80);
    let commits = dev.commits();
    assert_eq!(
        entry_value(&dev, &commits[0].entries, "CRTC_Y"),
        signed_value(-60)
    );
}
