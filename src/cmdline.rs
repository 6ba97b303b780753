//! Command line parsing
//!
//! Options are `key=value` tokens in the style of a kernel command line,
//! applied left to right on top of the defaults. The device can also come
//! from the environment; an explicit `device=` option wins over it.
//!
//! ## Supported Options
//!
//! - `device=<path>` - DRM card node, or `virtual` for the in-memory device
//!   - Examples: `device=/dev/dri/card1`, `device=virtual`
//! - `size=<W>x<H>` - Overlay size in pixels
//! - `thickness=<n>` - Stroke width of the overlay cross
//! - `background=<hex>` - Byte the primary surface is filled with
//! - `cross=<x>,<y>` - Crosshair centre in overlay pixels (default: centre)
//! - `color=<hex>` - Crosshair pixel value, e.g. `color=0xffff0000` for red
//! - `nowait` - Tear down right away instead of waiting for a keypress
//! - `virtual_mode=<W>x<H>` - Display mode of `device=virtual`

use std::path::PathBuf;

use thiserror::Error;

use crate::gfx::draw::Color;

/// Card node used when nothing else is configured
pub const DEFAULT_DEVICE: &str = "/dev/dri/card0";

/// Environment variable naming the device
pub const DEVICE_ENV: &str = "KMS_OVERLAY_DEVICE";

pub const USAGE: &str = "usage: kms-overlay [device=<path>|virtual] [size=<W>x<H>] \
[thickness=<n>] [background=<hex>] [cross=<x>,<y>] [color=<hex>] [nowait] \
[virtual_mode=<W>x<H>]";

/// Which device to drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelect {
    /// A DRM card node
    Path(PathBuf),
    /// The in-memory device
    Virtual,
}

impl DeviceSelect {
    fn parse(s: &str) -> Self {
        if s == "virtual" {
            DeviceSelect::Virtual
        } else {
            DeviceSelect::Path(PathBuf::from(s))
        }
    }
}

/// Malformed command line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    #[error("invalid value {value:?} for {option}")]
    InvalidValue { option: &'static str, value: String },
}

/// Run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device: DeviceSelect,
    pub overlay_width: u32,
    pub overlay_height: u32,
    /// Cross stroke width in pixels
    pub thickness: u32,
    /// Fill byte of the primary surface
    pub background: u8,
    /// Crosshair centre; `None` is the middle of the overlay
    pub cross: Option<(u32, u32)>,
    /// Crosshair pixel value
    pub color: u32,
    /// Wait for a keypress before tearing down
    pub wait: bool,
    /// Mode of the in-memory device
    pub virtual_mode: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceSelect::Path(PathBuf::from(DEFAULT_DEVICE)),
            overlay_width: 100,
            overlay_height: 100,
            thickness: 5,
            background: 0x20,
            cross: None,
            color: Color::WHITE.to_pixel(),
            wait: true,
            virtual_mode: (1920, 1080),
        }
    }
}

impl Config {
    /// Configuration from the process environment and arguments
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_device = std::env::var(DEVICE_ENV).ok();
        Self::parse(env_device.as_deref(), std::env::args().skip(1))
    }

    /// Apply `env_device` and then each option over the defaults
    pub fn parse<I, S>(env_device: Option<&str>, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Config::default();

        if let Some(device) = env_device.filter(|d| !d.is_empty()) {
            config.device = DeviceSelect::parse(device);
        }

        for arg in args {
            // Allow several options per argument, as a kernel cmdline would
            for option in arg.as_ref().split_whitespace() {
                config.apply(option)?;
            }
        }

        // Checked last so `size=` may come after `cross=`
        if let Some((x, y)) = config.cross {
            if x >= config.overlay_width || y >= config.overlay_height {
                return Err(ConfigError::InvalidValue {
                    option: "cross",
                    value: format!("{x},{y}"),
                });
            }
        }

        Ok(config)
    }

    fn apply(&mut self, option: &str) -> Result<(), ConfigError> {
        if option == "nowait" {
            self.wait = false;
            return Ok(());
        }

        let Some((key, value)) = option.split_once('=') else {
            return Err(ConfigError::UnknownOption(option.to_string()));
        };
        let invalid = |option: &'static str| ConfigError::InvalidValue {
            option,
            value: value.to_string(),
        };

        match key {
            "device" => {
                if value.is_empty() {
                    return Err(invalid("device"));
                }
                self.device = DeviceSelect::parse(value);
            }
            "size" => {
                let (w, h) = parse_size(value).ok_or_else(|| invalid("size"))?;
                self.overlay_width = w;
                self.overlay_height = h;
            }
            "thickness" => {
                self.thickness = value.parse().map_err(|_| invalid("thickness"))?;
            }
            "background" => {
                self.background = parse_hex_byte(value).ok_or_else(|| invalid("background"))?;
            }
            "cross" => {
                self.cross = Some(parse_point(value).ok_or_else(|| invalid("cross"))?);
            }
            "color" => {
                self.color = parse_hex_pixel(value).ok_or_else(|| invalid("color"))?;
            }
            "virtual_mode" => {
                let (w, h) = parse_size(value).ok_or_else(|| invalid("virtual_mode"))?;
                let w = u16::try_from(w).map_err(|_| invalid("virtual_mode"))?;
                let h = u16::try_from(h).map_err(|_| invalid("virtual_mode"))?;
                self.virtual_mode = (w, h);
            }
            _ => return Err(ConfigError::UnknownOption(option.to_string())),
        }

        Ok(())
    }
}

/// Parse `<W>x<H>` with both sides non-zero
fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Parse `<x>,<y>`
fn parse_point(s: &str) -> Option<(u32, u32)> {
    let (x, y) = s.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn hex_digits(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Parse a byte in hex, with or without a `0x` prefix
fn parse_hex_byte(s: &str) -> Option<u8> {
    u8::from_str_radix(hex_digits(s), 16).ok()
}

/// Parse a 32-bit pixel in hex, with or without a `0x` prefix
fn parse_hex_pixel(s: &str) -> Option<u32> {
    u32::from_str_radix(hex_digits(s), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        Config::parse(None, args.iter().copied())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.device, DeviceSelect::Path(DEFAULT_DEVICE.into()));
        assert_eq!((config.overlay_width, config.overlay_height), (100, 100));
        assert_eq!(config.cross, None);
        assert_eq!(config.color, 0xffff_ffff);
        assert!(config.wait);
    }

    #[test]
    fn test_crosshair_position_and_color() {
        let config = parse(&["cross=10,90", "color=0xffff0000"]).unwrap();
        assert_eq!(config.cross, Some((10, 90)));
        assert_eq!(config.color, 0xffff_0000);

        let config = parse(&["color=00ff00"]).unwrap();
        assert_eq!(config.color, 0x0000_ff00);
    }

    #[test]
    fn test_cross_checked_against_final_size() {
        // Order doesn't matter: the check runs after every option
        let config = parse(&["cross=150,20", "size=200x50"]).unwrap();
        assert_eq!(config.cross, Some((150, 20)));

        assert_eq!(
            parse(&["size=200x50", "cross=150,50"]),
            Err(ConfigError::InvalidValue {
                option: "cross",
                value: "150,50".into()
            })
        );
    }

    #[test]
    fn test_options() {
        let config = parse(&[
            "device=/dev/dri/card1",
            "size=64x32",
            "thickness=9",
            "background=0xff",
            "nowait",
        ])
        .unwrap();

        assert_eq!(config.device, DeviceSelect::Path("/dev/dri/card1".into()));
        assert_eq!((config.overlay_width, config.overlay_height), (64, 32));
        assert_eq!(config.thickness, 9);
        assert_eq!(config.background, 0xff);
        assert!(!config.wait);
    }

    #[test]
    fn test_virtual_device() {
        let config = parse(&["device=virtual", "virtual_mode=800x600"]).unwrap();
        assert_eq!(config.device, DeviceSelect::Virtual);
        assert_eq!(config.virtual_mode, (800, 600));
    }

    #[test]
    fn test_env_device_is_overridden_by_option() {
        let config = Config::parse(Some("/dev/dri/card2"), ["size=10x10"]).unwrap();
        assert_eq!(config.device, DeviceSelect::Path("/dev/dri/card2".into()));

        let config = Config::parse(Some("/dev/dri/card2"), ["device=virtual"]).unwrap();
        assert_eq!(config.device, DeviceSelect::Virtual);

        // An empty variable is the same as an unset one
        let config = Config::parse(Some(""), Vec::<String>::new()).unwrap();
        assert_eq!(config.device, DeviceSelect::Path(DEFAULT_DEVICE.into()));
    }

    #[test]
    fn test_whitespace_separated_options_in_one_argument() {
        let config = parse(&["nowait thickness=3"]).unwrap();
        assert!(!config.wait);
        assert_eq!(config.thickness, 3);
    }

    #[test]
    fn test_unknown_option() {
        assert_eq!(
            parse(&["verbose"]),
            Err(ConfigError::UnknownOption("verbose".into()))
        );
        assert_eq!(
            parse(&["colour=red"]),
            Err(ConfigError::UnknownOption("colour=red".into()))
        );
    }

    #[test]
    fn test_bad_values_name_the_option() {
        for (arg, option) in [
            ("size=100", "size"),
            ("size=0x10", "size"),
            ("thickness=-1", "thickness"),
            ("background=0x100", "background"),
            ("virtual_mode=70000x10", "virtual_mode"),
            ("device=", "device"),
            ("cross=5", "cross"),
            ("cross=-1,5", "cross"),
            ("color=0x1ffffffff", "color"),
            ("color=white", "color"),
        ] {
            match parse(&[arg]) {
                Err(ConfigError::InvalidValue { option: o, .. }) => assert_eq!(o, option, "{arg}"),
                other => panic!("{arg}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_hex_byte_forms() {
        assert_eq!(parse_hex_byte("20"), Some(0x20));
        assert_eq!(parse_hex_byte("0x20"), Some(0x20));
        assert_eq!(parse_hex_byte("0XfF"), Some(0xff));
        assert_eq!(parse_hex_byte("zz"), None);
    }
}
