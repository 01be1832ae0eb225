use anyhow::{bail, Context, Result};
use std::path::Path;

/// A single canvas color. Alpha never participates in comparisons, so it is
/// dropped as soon as pixels are read out of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Hex string in the wire format the set_pixel endpoint expects, e.g. "ff00a1".
    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 6 || !hex.is_ascii() {
            bail!("expected 6 hex digits, got {:?}", hex);
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).with_context(|| format!("invalid hex color {:?}", hex))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

/// One full read of the remote canvas: a width x height grid of RGB pixels.
/// Snapshots are never mutated, only replaced by a fresh fetch.
pub struct CanvasSnapshot {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CanvasSnapshot {
    /// Wraps the raw /get_pixels body (3 bytes per pixel, row-major).
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            bail!(
                "canvas buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            );
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        debug_assert!(x < self.width && y < self.height);
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Color::new(self.pixels[i], self.pixels[i + 1], self.pixels[i + 2])
    }
}

/// A decoded target frame: a width x height grid of RGBA pixels anchored
/// somewhere on the canvas. Alpha is kept in the buffer but discarded on read.
#[derive(Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// Wraps an RGBA buffer (4 bytes per pixel, row-major).
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            bail!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            );
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        debug_assert!(x < self.width && y < self.height);
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Color::new(self.pixels[i], self.pixels[i + 1], self.pixels[i + 2])
    }
}
